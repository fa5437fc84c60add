//! Domain types for an upstream sync run.
//!
//! Filesystem locations use `PathBuf`. Paths *inside* the repository (as
//! reported by git) stay `String`: they are `/`-separated regardless of host
//! and are what the classifier matches against.
//!
//! Every type here is serializable; the structured reports are these values
//! passed straight through serde_json.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A full commit sha.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    /// First seven characters, the way `git log --oneline` abbreviates.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A local branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(pub String);

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BranchName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BranchName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How upstream changes are integrated into the local branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Merge,
    Rebase,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Merge => write!(f, "merge"),
            Strategy::Rebase => write!(f, "rebase"),
        }
    }
}

/// Final outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
    /// The operator declined the confirmation gate.
    Aborted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// File-level change kind between merge base and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Renamed => write!(f, "renamed"),
        }
    }
}

/// Aggregate sync risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Orchestrator state. Runs move strictly forward through these; `Failed`
/// is reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    SafetyChecked,
    Fetched,
    Reported,
    Analyzed,
    DryRunComplete,
    Confirmed,
    Executed,
    Validated,
    Summarized,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::SafetyChecked => "safety-checked",
            Phase::Fetched => "fetched",
            Phase::Reported => "reported",
            Phase::Analyzed => "analyzed",
            Phase::DryRunComplete => "dry-run-complete",
            Phase::Confirmed => "confirmed",
            Phase::Executed => "executed",
            Phase::Validated => "validated",
            Phase::Summarized => "summarized",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Change list
// ---------------------------------------------------------------------------

/// One file-level change between the merge base and the target ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub path: String,
    /// Source path for renames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    pub category: Category,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub risk_weight: u32,
}

impl ChangeEntry {
    /// Build an entry; the risk weight is derived from category and kind.
    pub fn new(
        path: impl Into<String>,
        old_path: Option<String>,
        kind: ChangeKind,
        category: Category,
        lines_added: u64,
        lines_removed: u64,
    ) -> Self {
        Self {
            path: path.into(),
            old_path,
            kind,
            category,
            lines_added,
            lines_removed,
            risk_weight: risk_weight(category, kind),
        }
    }
}

/// Category weight, doubled for deletions.
pub fn risk_weight(category: Category, kind: ChangeKind) -> u32 {
    let base = category.weight();
    if kind == ChangeKind::Deleted {
        base * 2
    } else {
        base
    }
}

/// A commit in the `merge_base..target` range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: CommitId,
    pub subject: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub body: String,
}

impl CommitInfo {
    /// Subject and body joined, as scanned for breaking-change phrases.
    pub fn message(&self) -> String {
        if self.body.is_empty() {
            self.subject.clone()
        } else {
            format!("{}\n\n{}", self.subject, self.body)
        }
    }
}

/// Per-kind file counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangeCounts {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted + self.renamed
    }
}

/// Aggregated view of the upstream change set.
///
/// Both the structured and narrative change reports are rendered from one
/// instance of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub merge_base: CommitId,
    pub target_ref: String,
    pub target_sha: CommitId,
    pub counts: ChangeCounts,
    pub insertions: u64,
    pub deletions: u64,
    pub categories: BTreeMap<Category, usize>,
    pub entries: Vec<ChangeEntry>,
    /// Number of commits in the range, before capping.
    pub commit_count: usize,
    /// Newest-first commit log, capped.
    pub commits: Vec<CommitInfo>,
    /// Commits beyond the cap.
    pub commits_omitted: usize,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.commit_count == 0
    }
}

// ---------------------------------------------------------------------------
// Compatibility
// ---------------------------------------------------------------------------

/// A commit whose message carries a breaking-change indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChange {
    pub sha: CommitId,
    pub subject: String,
    /// First indicator phrase that matched.
    pub phrase: String,
}

/// Risk contribution of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: Category,
    pub files: usize,
    pub weight: u32,
    pub score: u32,
}

/// Aggregate compatibility verdict for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityAssessment {
    pub total_score: u32,
    pub base_score: u32,
    pub breaking_bonus: u32,
    pub level: RiskLevel,
    pub adaptation_required: bool,
    pub breaking_changes: Vec<BreakingChange>,
    pub recommendations: Vec<String>,
    pub breakdown: Vec<CategoryScore>,
}

// ---------------------------------------------------------------------------
// Backups and validation
// ---------------------------------------------------------------------------

/// Snapshot of the pre-sync branch tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupBranch {
    pub name: BranchName,
    pub tip: CommitId,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one post-sync check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCheckResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    /// `None` when the check was killed on timeout.
    pub exit_code: Option<i32>,
    pub output: String,
    pub remediation: String,
}

/// All post-sync check results for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiSummary {
    pub passed: bool,
    pub skipped: bool,
    pub results: Vec<CiCheckResult>,
}

impl CiSummary {
    /// Overall pass is the AND of every result.
    pub fn from_results(results: Vec<CiCheckResult>) -> Self {
        Self {
            passed: results.iter().all(|r| r.passed),
            skipped: false,
            results,
        }
    }

    /// Validation was turned off for this run.
    pub fn skipped() -> Self {
        Self {
            passed: true,
            skipped: true,
            results: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &CiCheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

// ---------------------------------------------------------------------------
// SyncRun
// ---------------------------------------------------------------------------

/// One invocation of the sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub started_at: DateTime<Utc>,
    /// Local branch name, or the HEAD sha when detached.
    pub source_ref: String,
    pub target_ref: String,
    pub strategy: Strategy,
    pub dry_run: bool,
    pub report_dir: PathBuf,
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_branch: Option<BranchName>,
}

impl SyncRun {
    pub fn start(
        started_at: DateTime<Utc>,
        source_ref: impl Into<String>,
        target_ref: impl Into<String>,
        strategy: Strategy,
        dry_run: bool,
        report_dir: PathBuf,
    ) -> Self {
        Self {
            started_at,
            source_ref: source_ref.into(),
            target_ref: target_ref.into(),
            strategy,
            dry_run,
            report_dir,
            outcome: None,
            finished_at: None,
            final_phase: None,
            backup_branch: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    /// Record the outcome. A run that already carries an outcome is returned
    /// unchanged.
    pub fn finalize(
        mut self,
        outcome: Outcome,
        final_phase: Phase,
        backup_branch: Option<BranchName>,
    ) -> Self {
        if self.is_finalized() {
            return self;
        }
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
        self.final_phase = Some(final_phase);
        self.backup_branch = backup_branch;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(CommitId::from("abc").to_string(), "abc");
        assert_eq!(BranchName::from("main").to_string(), "main");
    }

    #[test]
    fn short_sha_is_seven_chars_or_whole() {
        let full = CommitId::from("0123456789abcdef");
        assert_eq!(full.short(), "0123456");
        assert_eq!(CommitId::from("abc").short(), "abc");
    }

    #[test]
    fn deletion_doubles_weight() {
        let entry = ChangeEntry::new(
            "templates/plan-template.md",
            None,
            ChangeKind::Deleted,
            Category::Templates,
            0,
            40,
        );
        assert_eq!(entry.risk_weight, 10);
        assert_eq!(risk_weight(Category::Scripts, ChangeKind::Modified), 3);
    }

    #[test]
    fn ci_summary_is_and_of_results() {
        let ok = CiCheckResult {
            name: "a".into(),
            passed: true,
            duration_ms: 1,
            exit_code: Some(0),
            output: String::new(),
            remediation: String::new(),
        };
        let bad = CiCheckResult {
            name: "b".into(),
            passed: false,
            exit_code: Some(1),
            ..ok.clone()
        };
        assert!(CiSummary::from_results(vec![ok.clone()]).passed);
        assert!(!CiSummary::from_results(vec![ok, bad]).passed);
        assert!(CiSummary::from_results(vec![]).passed);
        assert!(CiSummary::skipped().skipped);
    }

    #[test]
    fn finalize_is_write_once() {
        let run = SyncRun::start(
            Utc::now(),
            "main",
            "upstream/main",
            Strategy::Merge,
            false,
            PathBuf::from("/tmp/r"),
        );
        let done = run.finalize(Outcome::Failed, Phase::Failed, None);
        let again = done
            .clone()
            .finalize(Outcome::Success, Phase::Summarized, None);
        assert_eq!(again.outcome, Some(Outcome::Failed));
        assert_eq!(again.final_phase, Some(Phase::Failed));
        assert_eq!(again.finished_at, done.finished_at);
    }

    #[test]
    fn enums_serialize_lowercase() {
        let json = serde_json::to_string(&RiskLevel::High).expect("serialize");
        assert_eq!(json, "\"high\"");
        let json = serde_json::to_string(&Phase::DryRunComplete).expect("serialize");
        assert_eq!(json, "\"dry_run_complete\"");
    }
}
