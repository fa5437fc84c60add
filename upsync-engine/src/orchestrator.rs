//! Sync orchestrator.
//!
//! ```text
//! Init → SafetyChecked → Fetched → Reported → Analyzed ─┬→ DryRunComplete ─┐
//!                                                       └→ Confirmed → Executed → Validated ─┤
//!                                                                                            └→ Summarized
//! ```
//!
//! Any step may end in `Failed`. [`Orchestrator::run`] always writes
//! `summary.md` and `run.json`, whichever phase the run stopped in.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use upsync_core::{
    BackupBranch, BranchName, CiSummary, CompatibilityAssessment, DiffReport, Outcome, Phase,
    Strategy, SyncConfig, SyncRun,
};
use upsync_renderer::{ReportKind, ReportRenderer, SummaryContext};

use crate::artifact::{Artifact, ArtifactWriter};
use crate::backup;
use crate::compat;
use crate::conflict::{self, ConflictFile};
use crate::context::{RunContext, SyncOptions, EXECUTION_LOG};
use crate::error::SyncError;
use crate::report::{self, DiffReporter};
use crate::validator::{Validator, CI_SUMMARY_JSON};
use crate::vcs::GitRepo;

pub const RUN_JSON: &str = "run.json";

// ---------------------------------------------------------------------------
// Confirmation gate
// ---------------------------------------------------------------------------

/// Asked before mutating when the assessment requires manual adaptation.
/// Returning `false` aborts the run without touching the repository.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// Why a run failed, with everything an operator needs to recover.
#[derive(Debug)]
pub struct RunFailure {
    /// Phase the run was trying to reach.
    pub phase: Phase,
    pub error: SyncError,
    pub backup: Option<BranchName>,
    pub conflicts: Vec<ConflictFile>,
    /// Conflict resolution guidance, grouped by category.
    pub guidance: Vec<String>,
    /// Copy-paste shell commands.
    pub recovery: Vec<String>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync failed while reaching '{}' [{}]: {}",
            self.phase,
            self.error.kind(),
            self.error
        )?;
        if let Some(backup) = &self.backup {
            write!(f, " (backup branch: {backup})")?;
        }
        Ok(())
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    /// Finalized run record.
    pub run: SyncRun,
    /// Last phase completed before the run ended.
    pub last_phase: Phase,
    pub report: Option<DiffReport>,
    pub assessment: Option<CompatibilityAssessment>,
    pub ci: Option<CiSummary>,
    pub backup: Option<BackupBranch>,
    /// Paths a dry-run merge probe found conflicting.
    pub probe_conflicts: Vec<ConflictFile>,
    pub failure: Option<RunFailure>,
    pub artifacts: Vec<Artifact>,
    /// `None` only when the summary itself could not be written.
    pub summary_path: Option<PathBuf>,
}

impl RunReport {
    pub fn outcome(&self) -> Outcome {
        self.run.outcome.unwrap_or(Outcome::Failed)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome() == Outcome::Success
    }

    /// Process exit code: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    pub fn report_dir(&self) -> &Path {
        &self.run.report_dir
    }
}

/// `run.json`: the run record plus error and artifact manifest.
#[derive(Serialize)]
struct RunRecord<'a> {
    #[serde(flatten)]
    run: &'a SyncRun,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorRecord>,
    artifacts: &'a [Artifact],
}

#[derive(Serialize)]
struct ErrorRecord {
    phase: Phase,
    kind: &'static str,
    message: String,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

enum Completion {
    Synced,
    DryRun,
    Declined,
}

struct Progress {
    attempting: Phase,
    reached: Phase,
    report: Option<DiffReport>,
    assessment: Option<CompatibilityAssessment>,
    ci: Option<CiSummary>,
    backup: Option<BackupBranch>,
    probe_conflicts: Vec<ConflictFile>,
}

impl Progress {
    fn new() -> Self {
        Self {
            attempting: Phase::Init,
            reached: Phase::Init,
            report: None,
            assessment: None,
            ci: None,
            backup: None,
            probe_conflicts: Vec::new(),
        }
    }
}

pub struct Orchestrator<C: Confirm> {
    git: GitRepo,
    ctx: RunContext,
    renderer: ReportRenderer,
    artifacts: ArtifactWriter,
    confirm: C,
    source_ref: String,
    progress: Progress,
}

/// Open `repo`, build the run context and drive one sync to completion.
///
/// Errors are returned only when the run cannot start at all (not a git
/// repository, report directory not writable, broken template overrides).
/// Every other failure is carried in [`RunReport::failure`].
pub fn sync<C: Confirm>(
    repo: &Path,
    config: SyncConfig,
    options: SyncOptions,
    confirm: C,
) -> Result<RunReport, SyncError> {
    let git = GitRepo::open(repo)?;
    let ctx = RunContext::new(&git, config, options, Utc::now())?;
    Ok(Orchestrator::new(git, ctx, confirm)?.run())
}

impl<C: Confirm> Orchestrator<C> {
    /// Fails only if the run cannot start. In that case the report
    /// directory still gets a plain `summary.md` naming the error.
    pub fn new(git: GitRepo, ctx: RunContext, confirm: C) -> Result<Self, SyncError> {
        let git = git
            .with_log(ctx.log.clone())
            .with_fetch_timeout(ctx.fetch_timeout());
        let prepared = ReportRenderer::new(ctx.config.templates_dir.as_deref())
            .map_err(SyncError::from)
            .and_then(|renderer| {
                let source_ref = match git.current_branch()? {
                    Some(branch) => branch,
                    None => git.head_sha()?.0,
                };
                Ok((renderer, ArtifactWriter::new(&ctx.report_dir)?, source_ref))
            });
        let (renderer, artifacts, source_ref) = match prepared {
            Ok(parts) => parts,
            Err(err) => {
                write_startup_failure(&ctx, &err);
                return Err(err);
            }
        };
        Ok(Self {
            git,
            ctx,
            renderer,
            artifacts,
            confirm,
            source_ref,
            progress: Progress::new(),
        })
    }

    /// Drive the state machine, then summarize. Never fails: the outcome
    /// and any error are in the returned report.
    pub fn run(mut self) -> RunReport {
        let result = self.drive();
        self.finish(result)
    }

    fn drive(&mut self) -> Result<Completion, SyncError> {
        let mut opts = self.ctx.options.clone();
        if let Some(remote) = self.git.remote_of(&opts.target_ref)? {
            if remote != opts.remote {
                tracing::info!(%remote, target = %opts.target_ref, "fetching the target's own remote");
                self.ctx
                    .log
                    .note(&format!("REMOTE {remote} (owner of {})", opts.target_ref));
                opts.remote = remote;
            }
        }

        self.enter(Phase::SafetyChecked);
        self.safety_check(&opts)?;
        self.complete();

        self.enter(Phase::Fetched);
        if opts.force && !self.git.has_remote(&opts.remote)? {
            self.override_note(&format!(
                "remote '{}' is not configured; using local refs",
                opts.remote
            ));
        } else {
            let refs = self.git.fetch_remote(&opts.remote)?;
            tracing::debug!(remote = %refs.remote, refs = refs.refs.len(), "fetched");
        }
        self.git.resolve_ref(&opts.target_ref)?;
        self.complete();

        self.enter(Phase::Reported);
        let merge_base = self.git.merge_base("HEAD", &opts.target_ref)?;
        let changes = DiffReporter::new(&self.git, &self.ctx.config.layout)
            .collect(&merge_base, &opts.target_ref)?;
        let diff = report::summarize(&changes);
        report::write(&diff, &self.renderer, &mut self.artifacts)?;
        self.progress.report = Some(diff);
        self.complete();

        self.enter(Phase::Analyzed);
        let assessment = compat::assess(
            &changes.entries,
            &changes.commits,
            &self.ctx.config.thresholds,
        );
        compat::write(
            &assessment,
            &opts.target_ref,
            &self.renderer,
            &mut self.artifacts,
        )?;
        let prompt = gate_prompt(&assessment, &opts.target_ref, &self.source_ref);
        let gated = assessment.adaptation_required;
        self.progress.assessment = Some(assessment);
        self.complete();

        if opts.dry_run {
            self.enter(Phase::DryRunComplete);
            self.progress.probe_conflicts = self.probe(&opts.target_ref)?;
            self.complete();
            return Ok(Completion::DryRun);
        }

        self.enter(Phase::Confirmed);
        if gated {
            if opts.force {
                self.override_note("adaptation required; confirmation skipped");
            } else if !self.confirm.confirm(&prompt) {
                self.ctx.log.note("DECLINED confirmation gate");
                tracing::info!("sync declined at the confirmation gate");
                return Ok(Completion::Declined);
            }
        }
        self.complete();

        self.enter(Phase::Executed);
        let backup = backup::create_backup(&self.git, &self.ctx.backup_name(), Utc::now())?;
        self.progress.backup = Some(backup);
        match opts.strategy {
            Strategy::Merge => {
                let message = self.ctx.config.merge_message_for(&opts.target_ref);
                self.git.merge_into(&opts.target_ref, true, &message)?
            }
            Strategy::Rebase => self.git.rebase_onto(&opts.target_ref)?,
        };
        self.complete();

        self.enter(Phase::Validated);
        let ci = if opts.no_ci {
            CiSummary::skipped()
        } else {
            let ci = Validator::new(&self.ctx.repo_root)
                .var("target_ref", opts.target_ref.as_str())
                .var("report_dir", self.ctx.report_dir.display().to_string())
                .with_log(self.ctx.log.clone())
                .run(&self.ctx.config.checks)?;
            self.artifacts.write_json(CI_SUMMARY_JSON, &ci)?;
            ci
        };
        let failed: Vec<String> = ci.failures().map(|r| r.name.clone()).collect();
        self.progress.ci = Some(ci);
        if !failed.is_empty() {
            if !opts.force {
                return Err(SyncError::CheckFailed { failed });
            }
            self.override_note(&format!("checks failed: {}", failed.join(", ")));
        }
        self.complete();

        Ok(Completion::Synced)
    }

    /// Clean tracked tree, nothing mid-flight, remote configured. `force`
    /// downgrades the dirty-tree and missing-remote checks to warnings; an
    /// operation in progress always blocks.
    fn safety_check(&self, opts: &SyncOptions) -> Result<(), SyncError> {
        if let Some(op) = self.git.operation_in_progress()? {
            return Err(SyncError::DirtyTree {
                detail: format!("a {op} is in progress"),
            });
        }
        let status = self.git.status_porcelain()?;
        let dirty = status.lines().filter(|l| !l.trim().is_empty()).count();
        if dirty > 0 {
            let detail = format!("{dirty} tracked file(s) modified or staged");
            if !opts.force {
                return Err(SyncError::DirtyTree { detail });
            }
            self.override_note(&detail);
        }
        if !self.git.has_remote(&opts.remote)? && !opts.force {
            return Err(SyncError::MissingRemote {
                remote: opts.remote.clone(),
            });
        }
        Ok(())
    }

    /// Merge probe for dry runs. Skipped when local changes could be lost
    /// by the abort.
    fn probe(&self, target: &str) -> Result<Vec<ConflictFile>, SyncError> {
        if !self.git.status_porcelain()?.trim().is_empty() {
            self.override_note("working tree has local changes; merge probe skipped");
            return Ok(Vec::new());
        }
        let paths = self.git.probe_merge(target)?;
        Ok(conflict::classify_all(paths, &self.ctx.config.layout))
    }

    fn enter(&mut self, phase: Phase) {
        self.progress.attempting = phase;
        tracing::debug!(%phase, "entering phase");
    }

    fn complete(&mut self) {
        let phase = self.progress.attempting;
        self.progress.reached = phase;
        tracing::info!(%phase, "phase complete");
        self.ctx.log.note(&format!("PHASE {phase}"));
    }

    fn override_note(&self, message: &str) {
        tracing::warn!("--force: {message}");
        self.ctx.log.note(&format!("FORCED {message}"));
    }

    // -----------------------------------------------------------------------
    // Finalization
    // -----------------------------------------------------------------------

    fn finish(mut self, result: Result<Completion, SyncError>) -> RunReport {
        let (outcome, final_phase, failure, note) = match result {
            Ok(Completion::Synced) => (Outcome::Success, Phase::Summarized, None, None),
            Ok(Completion::DryRun) => (
                Outcome::Success,
                Phase::Summarized,
                None,
                Some("Dry run: reports and merge probe only; the repository was not changed."),
            ),
            Ok(Completion::Declined) => (
                Outcome::Aborted,
                Phase::Summarized,
                None,
                Some("Declined at the confirmation gate; the repository was not changed."),
            ),
            Err(error) => (Outcome::Failed, Phase::Failed, Some(self.failure(error)), None),
        };

        let run = SyncRun::start(
            self.ctx.started_at,
            self.source_ref.clone(),
            self.ctx.options.target_ref.clone(),
            self.ctx.options.strategy,
            self.ctx.options.dry_run,
            self.ctx.report_dir.clone(),
        )
        .finalize(
            outcome,
            final_phase,
            self.progress.backup.as_ref().map(|b| b.name.clone()),
        );

        if let Some(f) = &failure {
            tracing::error!(phase = %f.phase, kind = f.error.kind(), "{}", f.error);
            self.ctx.log.note(&format!("FAIL {f}"));
        }
        self.ctx
            .log
            .note(&format!("END outcome={outcome} last_phase={}", self.progress.reached));

        let summary_path = match self.write_summary(&run, failure.as_ref(), note) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::error!(error = %err, "could not write run summary");
                None
            }
        };

        RunReport {
            run,
            last_phase: self.progress.reached,
            report: self.progress.report,
            assessment: self.progress.assessment,
            ci: self.progress.ci,
            backup: self.progress.backup,
            probe_conflicts: self.progress.probe_conflicts,
            failure,
            artifacts: self.artifacts.manifest().to_vec(),
            summary_path,
        }
    }

    fn failure(&self, error: SyncError) -> RunFailure {
        let backup = self.progress.backup.as_ref().map(|b| b.name.clone());
        let (conflicts, operation) = match &error {
            SyncError::Conflict { operation, paths } => (
                conflict::classify_all(paths.clone(), &self.ctx.config.layout),
                Some(*operation),
            ),
            _ => (Vec::new(), None),
        };
        let guidance = conflict::guidance(&conflicts, &self.ctx.config.conflict_guide);
        let recovery = match &backup {
            Some(branch) => backup::recovery_commands(branch, operation),
            None => retry_steps(&error),
        };
        RunFailure {
            phase: self.progress.attempting,
            error,
            backup,
            conflicts,
            guidance,
            recovery,
        }
    }

    fn write_summary(
        &mut self,
        run: &SyncRun,
        failure: Option<&RunFailure>,
        note: Option<&str>,
    ) -> Result<PathBuf, SyncError> {
        let mut ctx = SummaryContext::from_run(run);
        if let Some(report) = &self.progress.report {
            ctx = ctx.with_report(report);
        }
        if let Some(assessment) = &self.progress.assessment {
            ctx = ctx.with_assessment(assessment);
        }
        if let Some(ci) = &self.progress.ci {
            ctx = ctx.with_ci(ci);
        }
        if let Some(note) = note {
            ctx = ctx.with_note(note);
        }
        if !self.progress.probe_conflicts.is_empty() {
            ctx = ctx.with_conflicts(conflict::guidance(
                &self.progress.probe_conflicts,
                &self.ctx.config.conflict_guide,
            ));
        }
        if let Some(f) = failure {
            ctx = ctx
                .with_error(f.phase.to_string(), f.error.kind(), f.error.to_string())
                .with_conflicts(f.guidance.clone())
                .with_recovery(f.recovery.clone());
        }
        let mut linked = self.artifacts.names();
        linked.push(EXECUTION_LOG.to_string());
        linked.push(RUN_JSON.to_string());
        ctx = ctx.with_artifacts(linked);

        let summary = self.renderer.render_summary(&ctx)?;
        let path = self.artifacts.write(ReportKind::Summary.file_name(), &summary)?;

        let error = failure.map(|f| ErrorRecord {
            phase: f.phase,
            kind: f.error.kind(),
            message: f.error.to_string(),
        });
        let manifest = self.artifacts.manifest().to_vec();
        self.artifacts.write_json(
            RUN_JSON,
            &RunRecord {
                run,
                error,
                artifacts: &manifest,
            },
        )?;
        Ok(path)
    }
}

fn gate_prompt(assessment: &CompatibilityAssessment, target: &str, source: &str) -> String {
    format!(
        "Upstream changes need manual adaptation (risk {}, score {}). Integrate {target} into {source}?",
        assessment.level, assessment.total_score
    )
}

/// Next steps for failures that happened before any backup existed.
fn retry_steps(error: &SyncError) -> Vec<String> {
    match error {
        SyncError::DirtyTree { .. } => vec![
            "git status".to_string(),
            "git stash push -m 'before upsync'".to_string(),
            "upsync sync".to_string(),
        ],
        SyncError::MissingRemote { remote } => vec![
            format!("git remote add {remote} <upstream-url>"),
            "upsync sync".to_string(),
        ],
        SyncError::Network { .. } | SyncError::Auth { .. } => vec!["upsync sync".to_string()],
        _ => Vec::new(),
    }
}

/// Summary for a run that never reached its first phase. Rendered without
/// tera, since a broken template override is one way to get here.
fn write_startup_failure(ctx: &RunContext, err: &SyncError) {
    ctx.log.note(&format!("FAIL startup [{}]: {err}", err.kind()));
    ctx.log.note("END outcome=failed last_phase=init");
    let summary = format!(
        "# Upstream sync summary\n\n\
         - Target: `{}`\n\
         - Status: **FAILED**\n\n\
         The run could not start [{}]: {err}\n\n\
         The repository was not changed.\n",
        ctx.options.target_ref,
        err.kind(),
    );
    let written = ArtifactWriter::new(&ctx.report_dir)
        .and_then(|mut out| out.write(ReportKind::Summary.file_name(), &summary));
    if let Err(write_err) = written {
        tracing::error!(error = %write_err, "could not write startup failure summary");
    }
}
