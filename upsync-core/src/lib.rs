//! upsync core library: domain types, change taxonomy, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes and run/report value objects
//! - [`category`]: the single [`Category`] taxonomy shared by reporter and analyzer
//! - [`config`]: layered YAML configuration ([`SyncConfig`])
//! - [`error`]: [`ConfigError`]

pub mod category;
pub mod config;
pub mod error;
pub mod types;

pub use category::Category;
pub use config::{CheckSpec, Layout, RiskThresholds, SyncConfig};
pub use error::ConfigError;
pub use types::{
    BackupBranch, BranchName, BreakingChange, CategoryScore, ChangeCounts, ChangeEntry,
    ChangeKind, CiCheckResult, CiSummary, CommitId, CommitInfo, CompatibilityAssessment,
    DiffReport, Outcome, Phase, RiskLevel, Strategy, SyncRun,
};
