//! Post-sync validator.
//!
//! Checks run one after another in the repository root. A non-zero exit or
//! a timeout fails the check; a check whose program cannot be started at
//! all is a [`SyncError::CheckExecution`].

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use upsync_core::{CheckSpec, CiCheckResult, CiSummary};

use crate::error::SyncError;
use crate::exec_log::ExecutionLog;
use crate::process;

pub const CI_SUMMARY_JSON: &str = "ci-summary.json";

pub struct Validator {
    workdir: PathBuf,
    vars: Vec<(String, String)>,
    log: Option<ExecutionLog>,
}

impl Validator {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            vars: Vec::new(),
            log: None,
        }
    }

    /// Replace `{key}` with `value` in every check argument.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{{{key}}}"), value.into()));
        self
    }

    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Run every check in order. Stops early only on an execution error.
    pub fn run(&self, checks: &[CheckSpec]) -> Result<CiSummary, SyncError> {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            results.push(self.run_one(check)?);
        }
        let summary = CiSummary::from_results(results);
        tracing::info!(
            checks = summary.results.len(),
            passed = summary.passed,
            "post-sync validation finished"
        );
        Ok(summary)
    }

    fn run_one(&self, check: &CheckSpec) -> Result<CiCheckResult, SyncError> {
        let Some((program, args)) = check.command.split_first() else {
            return Err(SyncError::CheckExecution {
                name: check.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let mut cmd = Command::new(self.resolve_program(program));
        cmd.args(args.iter().map(|a| self.substitute(a)))
            .current_dir(&self.workdir);

        self.note(&format!("BEGIN check {}", check.name));
        let timeout = (check.timeout_secs > 0).then(|| Duration::from_secs(check.timeout_secs));
        let output = process::run(cmd, timeout).map_err(|source| {
            self.note(&format!("FAIL check {}: could not start: {source}", check.name));
            SyncError::CheckExecution {
                name: check.name.clone(),
                source,
            }
        })?;

        let mut text = output.combined();
        if output.timed_out {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("timed out after {}s", check.timeout_secs));
        }
        let passed = output.success && !output.timed_out;
        self.note(&format!(
            "{} check {} ({} ms)",
            if passed { "OK" } else { "FAIL" },
            check.name,
            output.elapsed.as_millis()
        ));
        if !passed {
            tracing::warn!(check = %check.name, exit_code = ?output.exit_code, "check failed");
        }

        Ok(CiCheckResult {
            name: check.name.clone(),
            passed,
            duration_ms: output.elapsed.as_millis() as u64,
            exit_code: output.exit_code,
            output: text,
            remediation: check.remediation.clone(),
        })
    }

    /// Relative programs with a path separator are taken relative to the
    /// work dir; bare names go through `PATH`.
    fn resolve_program(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.is_relative() && program.contains('/') {
            self.workdir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    fn substitute(&self, arg: &str) -> String {
        self.vars
            .iter()
            .fold(arg.to_string(), |acc, (key, value)| acc.replace(key, value))
    }

    fn note(&self, message: &str) {
        if let Some(log) = &self.log {
            log.note(message);
        }
    }
}
