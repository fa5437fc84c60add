//! # upsync-engine
//!
//! Git adapter, change reporting, risk analysis, post-sync validation and
//! the sync state machine.
//!
//! Call [`sync`] to drive one run end to end, or assemble a
//! [`RunContext`] and [`Orchestrator`] yourself to supply the confirmation
//! gate and start time.

pub mod artifact;
pub mod backup;
pub mod compat;
pub mod conflict;
pub mod context;
pub mod error;
pub mod exec_log;
pub mod orchestrator;
mod process;
pub mod report;
pub mod validator;
pub mod vcs;

pub use artifact::{Artifact, ArtifactWriter};
pub use backup::{create_backup, list_backups, rollback};
pub use compat::{assess, assess_refs};
pub use conflict::ConflictFile;
pub use context::{RunContext, SyncOptions};
pub use error::SyncError;
pub use exec_log::ExecutionLog;
pub use orchestrator::{sync, Confirm, Orchestrator, RunFailure, RunReport};
pub use report::{ChangeSet, DiffReporter};
pub use validator::Validator;
pub use vcs::{GitRepo, RawChange, RefSet};
