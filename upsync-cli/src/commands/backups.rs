//! `upsync backups`: list pre-sync backup branches.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use upsync_core::config;
use upsync_engine::{context::STAMP_FORMAT, list_backups, GitRepo};

/// Arguments for `upsync backups`.
#[derive(Args, Debug)]
pub struct BackupsArgs {
    /// Repository to inspect (defaults to the current directory).
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Extra configuration file (for a non-default backup prefix).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct BackupJson {
    branch: String,
    tip: String,
    created_at: Option<String>,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "tip")]
    tip: String,
    #[tabled(rename = "created")]
    created: String,
}

impl BackupsArgs {
    pub fn run(self) -> Result<ExitCode> {
        let git = GitRepo::open(&self.repo)
            .with_context(|| format!("{} is not inside a git repository", self.repo.display()))?;
        let cfg = config::load(git.root(), self.config.as_deref())
            .context("failed to load configuration")?;
        let backups = list_backups(&git, &cfg.backup_prefix).context("failed to list branches")?;

        let entries: Vec<BackupJson> = backups
            .iter()
            .map(|(name, tip)| BackupJson {
                branch: name.to_string(),
                tip: tip.to_string(),
                created_at: created_at(&name.0, &cfg.backup_prefix),
            })
            .collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(ExitCode::SUCCESS);
        }

        if entries.is_empty() {
            println!("no backup branches matching '{}*'", cfg.backup_prefix);
            return Ok(ExitCode::SUCCESS);
        }

        let rows: Vec<BackupRow> = entries
            .into_iter()
            .map(|e| BackupRow {
                tip: e.tip.chars().take(12).collect(),
                created: e.created_at.unwrap_or_else(|| "-".to_string()),
                branch: e.branch,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(ExitCode::SUCCESS)
    }
}

/// Creation time encoded in the branch name, if it parses.
fn created_at(branch: &str, prefix: &str) -> Option<String> {
    let stamp = branch.strip_prefix(prefix)?;
    let naive = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive).to_rfc3339())
}
