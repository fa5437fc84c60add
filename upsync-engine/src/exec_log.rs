//! Append-only execution log for one run (`execution.log`).
//!
//! Every mutating git operation and every phase transition lands here with
//! an RFC 3339 timestamp, so a failed run can be reconstructed afterwards.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::error::{io_err, SyncError};

/// Handle to a run's execution log. Cheap to clone; each record opens the
/// file in append mode.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    path: PathBuf,
}

impl ExecutionLog {
    /// Create (or truncate) the log at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        std::fs::write(&path, b"").map_err(|e| io_err(&path, e))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn record(&self, message: &str) -> Result<(), SyncError> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        writeln!(file, "{stamp} {message}").map_err(|e| io_err(&self.path, e))
    }

    /// [`record`](Self::record), downgrading a write failure to a warning.
    pub(crate) fn note(&self, message: &str) {
        if let Err(err) = self.record(message) {
            tracing::warn!(error = %err, "could not append to execution log");
        }
    }
}
