//! Rendering payloads built from core report values.
//!
//! Each context is a flat, template-friendly projection of exactly one typed
//! value: shas are pre-abbreviated, enums pre-stringified, and optional
//! sections are `None` rather than empty placeholders.

use serde::{Deserialize, Serialize};

use upsync_core::{CiSummary, CompatibilityAssessment, DiffReport, SyncRun};

use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Change report
// ---------------------------------------------------------------------------

/// Narrative change report payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesContext {
    pub target_ref: String,
    pub target_sha: String,
    pub merge_base: String,
    pub total_files: usize,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub insertions: u64,
    pub deletions: u64,
    pub categories: Vec<CategoryCountCtx>,
    pub entries: Vec<EntryCtx>,
    pub commit_count: usize,
    pub commits: Vec<CommitCtx>,
    pub commits_omitted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCountCtx {
    pub category: String,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryCtx {
    pub path: String,
    pub old_path: Option<String>,
    pub kind: String,
    pub category: String,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub risk_weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitCtx {
    pub sha: String,
    pub subject: String,
}

impl ChangesContext {
    pub fn from_report(report: &DiffReport) -> Self {
        ChangesContext {
            target_ref: report.target_ref.clone(),
            target_sha: report.target_sha.short().to_string(),
            merge_base: report.merge_base.short().to_string(),
            total_files: report.counts.total(),
            added: report.counts.added,
            modified: report.counts.modified,
            deleted: report.counts.deleted,
            renamed: report.counts.renamed,
            insertions: report.insertions,
            deletions: report.deletions,
            categories: report
                .categories
                .iter()
                .map(|(category, files)| CategoryCountCtx {
                    category: category.to_string(),
                    files: *files,
                })
                .collect(),
            entries: report
                .entries
                .iter()
                .map(|e| EntryCtx {
                    path: e.path.clone(),
                    old_path: e.old_path.clone(),
                    kind: e.kind.to_string(),
                    category: e.category.to_string(),
                    lines_added: e.lines_added,
                    lines_removed: e.lines_removed,
                    risk_weight: e.risk_weight,
                })
                .collect(),
            commit_count: report.commit_count,
            commits: report
                .commits
                .iter()
                .map(|c| CommitCtx {
                    sha: c.sha.short().to_string(),
                    subject: c.subject.clone(),
                })
                .collect(),
            commits_omitted: report.commits_omitted,
        }
    }
}

// ---------------------------------------------------------------------------
// Compatibility report
// ---------------------------------------------------------------------------

/// Narrative compatibility report payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityContext {
    pub target_ref: String,
    pub level: String,
    pub level_upper: String,
    pub total_score: u32,
    pub base_score: u32,
    pub breaking_bonus: u32,
    pub adaptation_required: bool,
    pub breakdown: Vec<BreakdownCtx>,
    pub breaking_changes: Vec<BreakingCtx>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownCtx {
    pub category: String,
    pub files: usize,
    pub weight: u32,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakingCtx {
    pub sha: String,
    pub subject: String,
    pub phrase: String,
}

impl CompatibilityContext {
    pub fn from_assessment(assessment: &CompatibilityAssessment, target_ref: &str) -> Self {
        CompatibilityContext {
            target_ref: target_ref.to_string(),
            level: assessment.level.to_string(),
            level_upper: assessment.level.to_string().to_uppercase(),
            total_score: assessment.total_score,
            base_score: assessment.base_score,
            breaking_bonus: assessment.breaking_bonus,
            adaptation_required: assessment.adaptation_required,
            breakdown: assessment
                .breakdown
                .iter()
                .map(|b| BreakdownCtx {
                    category: b.category.to_string(),
                    files: b.files,
                    weight: b.weight,
                    score: b.score,
                })
                .collect(),
            breaking_changes: assessment
                .breaking_changes
                .iter()
                .map(|b| BreakingCtx {
                    sha: b.sha.short().to_string(),
                    subject: b.subject.clone(),
                    phrase: b.phrase.clone(),
                })
                .collect(),
            recommendations: assessment.recommendations.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Run summary payload. Sections the run never reached stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryContext {
    pub outcome: String,
    pub final_phase: String,
    pub started_at: String,
    pub finished_at: String,
    pub source_ref: String,
    pub target_ref: String,
    pub strategy: String,
    pub dry_run: bool,
    pub report_dir: String,
    pub backup_branch: Option<String>,
    pub changes: Option<SummaryChangesCtx>,
    pub risk: Option<SummaryRiskCtx>,
    pub ci: Option<SummaryCiCtx>,
    pub error: Option<SummaryErrorCtx>,
    pub note: Option<String>,
    /// Conflict resolution guidance, one line per entry.
    pub conflicts: Vec<String>,
    pub recovery: Vec<String>,
    pub artifacts: Vec<String>,
    pub upsync_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryChangesCtx {
    pub files: usize,
    pub insertions: u64,
    pub deletions: u64,
    pub commits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRiskCtx {
    pub level: String,
    pub score: u32,
    pub adaptation_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCiCtx {
    pub skipped: bool,
    pub passed: bool,
    pub results: Vec<SummaryCheckCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCheckCtx {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub remediation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryErrorCtx {
    pub phase: String,
    pub kind: String,
    pub message: String,
}

impl SummaryContext {
    /// Start from a finalized run. Optional sections are attached with the
    /// `with_*` methods.
    pub fn from_run(run: &SyncRun) -> Self {
        SummaryContext {
            outcome: run
                .outcome
                .map(|o| o.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            final_phase: run
                .final_phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            started_at: run.started_at.to_rfc3339(),
            finished_at: run
                .finished_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            source_ref: run.source_ref.clone(),
            target_ref: run.target_ref.clone(),
            strategy: run.strategy.to_string(),
            dry_run: run.dry_run,
            report_dir: run.report_dir.display().to_string(),
            backup_branch: run.backup_branch.as_ref().map(|b| b.0.clone()),
            changes: None,
            risk: None,
            ci: None,
            error: None,
            note: None,
            conflicts: Vec::new(),
            recovery: Vec::new(),
            artifacts: Vec::new(),
            upsync_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_report(mut self, report: &DiffReport) -> Self {
        self.changes = Some(SummaryChangesCtx {
            files: report.counts.total(),
            insertions: report.insertions,
            deletions: report.deletions,
            commits: report.commit_count,
        });
        self
    }

    pub fn with_assessment(mut self, assessment: &CompatibilityAssessment) -> Self {
        self.risk = Some(SummaryRiskCtx {
            level: assessment.level.to_string(),
            score: assessment.total_score,
            adaptation_required: assessment.adaptation_required,
        });
        self
    }

    pub fn with_ci(mut self, ci: &CiSummary) -> Self {
        self.ci = Some(SummaryCiCtx {
            skipped: ci.skipped,
            passed: ci.passed,
            results: ci
                .results
                .iter()
                .map(|r| SummaryCheckCtx {
                    name: r.name.clone(),
                    passed: r.passed,
                    duration_ms: r.duration_ms,
                    remediation: r.remediation.clone(),
                })
                .collect(),
        });
        self
    }

    pub fn with_error(
        mut self,
        phase: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.error = Some(SummaryErrorCtx {
            phase: phase.into(),
            kind: kind.into(),
            message: message.into(),
        });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_conflicts(mut self, guidance: Vec<String>) -> Self {
        self.conflicts = guidance;
        self
    }

    pub fn with_recovery(mut self, steps: Vec<String>) -> Self {
        self.recovery = steps;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Convert any payload to a [`tera::Context`].
pub(crate) fn to_tera_context<T: Serialize>(ctx: &T) -> Result<tera::Context, RenderError> {
    tera::Context::from_serialize(ctx).map_err(RenderError::from)
}
