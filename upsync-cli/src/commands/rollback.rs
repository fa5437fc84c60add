//! `upsync rollback`: restore the branch tip saved before a sync.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use upsync_engine::{rollback, GitRepo};

/// Arguments for `upsync rollback`.
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Backup branch to reset to.
    pub branch: String,

    /// Repository to roll back (defaults to the current directory).
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Do not ask for confirmation.
    #[arg(long)]
    pub yes: bool,
}

impl RollbackArgs {
    pub fn run(self) -> Result<ExitCode> {
        let git = GitRepo::open(&self.repo)
            .with_context(|| format!("{} is not inside a git repository", self.repo.display()))?;

        let prompt = format!(
            "Hard-reset the current branch to '{}'? Uncommitted changes are lost.",
            self.branch
        );
        if !self.yes && !super::confirm(&prompt) {
            println!("rollback cancelled");
            return Ok(ExitCode::from(1));
        }

        let head = rollback(&git, &self.branch)
            .with_context(|| format!("failed to roll back to '{}'", self.branch))?;
        println!(
            "{} HEAD is now {} ({})",
            "✓".green().bold(),
            head.short(),
            self.branch
        );
        Ok(ExitCode::SUCCESS)
    }
}
