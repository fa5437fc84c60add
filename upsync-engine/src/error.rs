//! Error types for upsync-engine.

use std::path::PathBuf;

use thiserror::Error;

use upsync_core::ConfigError;
use upsync_renderer::RenderError;

/// All errors that can arise from a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Tracked files are modified, or a merge/rebase is already in progress.
    #[error("working tree is not clean: {detail}")]
    DirtyTree { detail: String },

    #[error("remote '{remote}' is not configured")]
    MissingRemote { remote: String },

    /// Fetch failed or timed out.
    #[error("fetching '{remote}' failed: {message}")]
    Network { remote: String, message: String },

    #[error("authentication to '{remote}' failed: {message}")]
    Auth { remote: String, message: String },

    #[error("'{local}' and '{target}' have no common ancestor")]
    NoCommonAncestor { local: String, target: String },

    #[error("'{reference}' does not resolve to a commit")]
    UnknownRef { reference: String },

    /// The merge or rebase stopped on conflicts; the tree is left conflicted.
    #[error("{operation} stopped with {} conflicted file(s)", .paths.len())]
    Conflict {
        operation: &'static str,
        paths: Vec<String>,
    },

    #[error("branch '{name}' already exists")]
    BranchExists { name: String },

    /// A post-sync check could not be started at all.
    #[error("could not run check '{name}': {source}")]
    CheckExecution {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// One or more post-sync checks ran and failed.
    #[error("post-sync checks failed: {}", .failed.join(", "))]
    CheckFailed { failed: Vec<String> },

    /// Any other git failure.
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (structured reports).
    #[error("report JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Stable label printed to operators and written to the summary.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::DirtyTree { .. } => "dirty-tree",
            SyncError::MissingRemote { .. } => "missing-remote",
            SyncError::Network { .. } => "network",
            SyncError::Auth { .. } => "auth",
            SyncError::NoCommonAncestor { .. } => "no-common-ancestor",
            SyncError::UnknownRef { .. } => "unknown-ref",
            SyncError::Conflict { .. } => "conflict",
            SyncError::BranchExists { .. } => "branch-exists",
            SyncError::CheckExecution { .. } => "check-execution",
            SyncError::CheckFailed { .. } => "check-failed",
            SyncError::Git { .. } => "git",
            SyncError::Config(_) => "config",
            SyncError::Render(_) => "render",
            SyncError::Io { .. } => "io",
            SyncError::Json(_) => "json",
        }
    }

    /// Failures that leave the repository exactly as it was before the run.
    pub fn is_non_mutating(&self) -> bool {
        matches!(
            self,
            SyncError::DirtyTree { .. }
                | SyncError::MissingRemote { .. }
                | SyncError::Network { .. }
                | SyncError::Auth { .. }
                | SyncError::NoCommonAncestor { .. }
                | SyncError::UnknownRef { .. }
        )
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
