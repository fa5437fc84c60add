//! Per-run context threaded through every component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use upsync_core::{Strategy, SyncConfig};

use crate::error::{io_err, SyncError};
use crate::exec_log::ExecutionLog;
use crate::vcs::GitRepo;

/// `YYYYMMDD-HHMMSS`, used for report directories and backup branches.
pub const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

pub const EXECUTION_LOG: &str = "execution.log";

/// Operator choices for one run. Starts from configuration; the CLI
/// overrides individual fields from flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub remote: String,
    pub target_ref: String,
    pub strategy: Strategy,
    pub dry_run: bool,
    pub force: bool,
    pub no_ci: bool,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            remote: config.remote.clone(),
            target_ref: config.target_ref.clone(),
            strategy: config.strategy,
            dry_run: false,
            force: false,
            no_ci: false,
        }
    }
}

/// Everything a run needs, built once before the first phase.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub repo_root: PathBuf,
    pub config: SyncConfig,
    pub options: SyncOptions,
    pub started_at: DateTime<Utc>,
    pub report_dir: PathBuf,
    pub log: ExecutionLog,
}

impl RunContext {
    /// Create the run's report directory and execution log.
    ///
    /// Reports go under `config.report_root`, or `<git-dir>/upsync/reports`
    /// so that they never show up in `git status`.
    pub fn new(
        git: &GitRepo,
        config: SyncConfig,
        options: SyncOptions,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let report_root = match &config.report_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => git.root().join(root),
            None => git.git_dir()?.join("upsync").join("reports"),
        };
        let report_dir = unique_dir(&report_root, &started_at.format(STAMP_FORMAT).to_string())?;
        let log = ExecutionLog::create(report_dir.join(EXECUTION_LOG))?;
        log.note(&format!(
            "START sync target={} strategy={} dry_run={} force={} no_ci={}",
            options.target_ref, options.strategy, options.dry_run, options.force, options.no_ci
        ));

        Ok(Self {
            repo_root: git.root().to_path_buf(),
            config,
            options,
            started_at,
            report_dir,
            log,
        })
    }

    /// Configured fetch limit; zero disables it.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.config.fetch_timeout_secs > 0)
            .then(|| Duration::from_secs(self.config.fetch_timeout_secs))
    }

    /// Backup branch name for this run.
    pub fn backup_name(&self) -> String {
        format!(
            "{}{}",
            self.config.backup_prefix,
            self.started_at.format(STAMP_FORMAT)
        )
    }
}

/// `root/stamp`, or `root/stamp-2`, `-3`, … when a run in the same second
/// already claimed it.
fn unique_dir(root: &Path, stamp: &str) -> Result<PathBuf, SyncError> {
    std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    let mut n = 1;
    loop {
        let name = if n == 1 {
            stamp.to_string()
        } else {
            format!("{stamp}-{n}")
        };
        let candidate = root.join(name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(io_err(&candidate, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unique_dir_suffixes_collisions() {
        let root = TempDir::new().expect("tempdir");
        let first = unique_dir(root.path(), "20260101-000000").expect("first");
        let second = unique_dir(root.path(), "20260101-000000").expect("second");
        assert!(first.ends_with("20260101-000000"));
        assert!(second.ends_with("20260101-000000-2"));
    }

    #[test]
    fn options_start_from_config() {
        let config = SyncConfig::default();
        let options = SyncOptions::from_config(&config);
        assert_eq!(options.remote, "upstream");
        assert_eq!(options.target_ref, "upstream/main");
        assert_eq!(options.strategy, Strategy::Merge);
        assert!(!options.dry_run && !options.force && !options.no_ci);
    }
}
