//! `upsync sync`: one full sync run.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use upsync_core::{config, CiSummary, CompatibilityAssessment, DiffReport, Outcome, RiskLevel};
use upsync_engine::{GitRepo, Orchestrator, RunFailure, RunReport, RunContext, SyncOptions};

use crate::StrategyArg;

/// Arguments for `upsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Report, assess and probe for conflicts without changing the repository.
    #[arg(long)]
    pub dry_run: bool,

    /// Integration strategy (merge or rebase). Defaults to the configured one.
    #[arg(long)]
    pub strategy: Option<StrategyArg>,

    /// Upstream ref to integrate, e.g. `upstream/main`.
    #[arg(long)]
    pub target: Option<String>,

    /// Remote to fetch when the target is not a remote-tracking ref of a
    /// configured remote (`other/main` always fetches `other`).
    #[arg(long)]
    pub remote: Option<String>,

    /// Proceed past a dirty tree, a missing remote, the confirmation prompt
    /// and failed checks.
    #[arg(long)]
    pub force: bool,

    /// Skip post-sync checks.
    #[arg(long)]
    pub no_ci: bool,

    /// Repository to sync (defaults to the current directory).
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Extra configuration file, applied over the user and repository layers.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl SyncArgs {
    pub fn run(self) -> Result<ExitCode> {
        let git = GitRepo::open(&self.repo)
            .with_context(|| format!("{} is not inside a git repository", self.repo.display()))?;
        let cfg = config::load(git.root(), self.config.as_deref())
            .context("failed to load configuration")?;

        let mut opts = SyncOptions::from_config(&cfg);
        if let Some(strategy) = self.strategy {
            opts.strategy = strategy.into();
        }
        if let Some(remote) = self.remote {
            opts.remote = remote;
        }
        if let Some(target) = self.target {
            opts.target_ref = target;
        }
        opts.dry_run = self.dry_run;
        opts.force = self.force;
        opts.no_ci = self.no_ci;
        tracing::debug!(?opts, "resolved sync options");

        let ctx = RunContext::new(&git, cfg, opts, Utc::now())
            .context("failed to prepare the report directory")?;
        let report = Orchestrator::new(git, ctx, super::confirm)
            .context("failed to start the sync run")?
            .run();

        print_report(&report);
        Ok(ExitCode::from(report.exit_code()))
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct BreakdownRow {
    #[tabled(rename = "category")]
    category: String,
    #[tabled(rename = "files")]
    files: usize,
    #[tabled(rename = "weight")]
    weight: u32,
    #[tabled(rename = "score")]
    score: u32,
}

fn print_report(report: &RunReport) {
    if let Some(diff) = &report.report {
        print_diff(diff);
    }
    if let Some(assessment) = &report.assessment {
        print_assessment(assessment);
    }
    if !report.probe_conflicts.is_empty() {
        println!(
            "\n{} {} file(s) would conflict:",
            "!".yellow().bold(),
            report.probe_conflicts.len()
        );
        for file in &report.probe_conflicts {
            println!("  {} ({})", file.path, file.category);
        }
    }
    if let Some(ci) = &report.ci {
        print_ci(ci);
    }

    println!();
    match report.outcome() {
        Outcome::Success if report.run.dry_run => {
            println!("{} dry run complete; repository unchanged", "✓".green().bold())
        }
        Outcome::Success => {
            println!("{} synced {}", "✓".green().bold(), report.run.target_ref.bold());
            if let Some(backup) = &report.backup {
                println!("  backup branch: {}", backup.name);
            }
        }
        Outcome::Aborted => println!(
            "{} aborted at the confirmation prompt; repository unchanged",
            "-".yellow().bold()
        ),
        Outcome::Failed => {
            if let Some(failure) = &report.failure {
                print_failure(failure);
            }
        }
    }
    println!("  reports: {}", report.report_dir().display());
}

fn print_diff(diff: &DiffReport) {
    println!(
        "{} {} file(s) changed ({} added, {} modified, {} deleted, {} renamed), +{} -{}, {} commit(s)",
        "upstream".bold(),
        diff.counts.total(),
        diff.counts.added,
        diff.counts.modified,
        diff.counts.deleted,
        diff.counts.renamed,
        diff.insertions,
        diff.deletions,
        diff.commit_count,
    );
}

fn print_assessment(assessment: &CompatibilityAssessment) {
    if !assessment.breakdown.is_empty() {
        let rows: Vec<BreakdownRow> = assessment
            .breakdown
            .iter()
            .map(|b| BreakdownRow {
                category: b.category.to_string(),
                files: b.files,
                weight: b.weight,
                score: b.score,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let level = match assessment.level {
        RiskLevel::Low => assessment.level.to_string().green(),
        RiskLevel::Medium => assessment.level.to_string().yellow(),
        RiskLevel::High => assessment.level.to_string().red(),
    };
    println!(
        "risk: {} (score {}{})",
        level.bold(),
        assessment.total_score,
        if assessment.adaptation_required {
            ", manual adaptation required"
        } else {
            ""
        }
    );
    for breaking in &assessment.breaking_changes {
        println!(
            "  {} {} {} [{}]",
            "breaking?".red(),
            breaking.sha.short(),
            breaking.subject,
            breaking.phrase
        );
    }
    for recommendation in &assessment.recommendations {
        println!("  - {recommendation}");
    }
}

fn print_ci(ci: &CiSummary) {
    if ci.skipped {
        println!("\nchecks: {}", "skipped".dimmed());
        return;
    }
    println!("\nchecks:");
    for result in &ci.results {
        if result.passed {
            println!("  {} {} ({} ms)", "✓".green(), result.name, result.duration_ms);
        } else {
            println!("  {} {} ({} ms)", "✗".red(), result.name, result.duration_ms);
            println!("    fix: {}", result.remediation);
        }
    }
}

fn print_failure(failure: &RunFailure) {
    eprintln!("{} {failure}", "✗".red().bold());
    for line in &failure.guidance {
        eprintln!("  {line}");
    }
    if !failure.recovery.is_empty() {
        eprintln!("  recover with:");
        for command in &failure.recovery {
            eprintln!("    {command}");
        }
    }
}
