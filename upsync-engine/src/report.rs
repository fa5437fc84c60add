//! Diff reporter: turns a merge-base..target range into a [`DiffReport`]
//! and writes `changes.json` / `changes.md`.
//!
//! The structured report carries no timestamps, so the same commit pair
//! always serializes to the same bytes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use upsync_core::{
    Category, ChangeCounts, ChangeEntry, ChangeKind, CommitId, CommitInfo, DiffReport, Layout,
};
use upsync_renderer::{ReportKind, ReportRenderer};

use crate::artifact::ArtifactWriter;
use crate::error::SyncError;
use crate::vcs::{GitRepo, RawChange};

/// Commits listed individually in a report; the rest are summarized.
pub const COMMIT_LOG_CAP: usize = 50;

pub const CHANGES_JSON: &str = "changes.json";

/// Classified changes and the full commit list for one range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub merge_base: CommitId,
    pub target_ref: String,
    pub target_sha: CommitId,
    /// Sorted by path.
    pub entries: Vec<ChangeEntry>,
    /// Newest first, uncapped.
    pub commits: Vec<CommitInfo>,
}

pub struct DiffReporter<'a> {
    git: &'a GitRepo,
    layout: &'a Layout,
}

impl<'a> DiffReporter<'a> {
    pub fn new(git: &'a GitRepo, layout: &'a Layout) -> Self {
        Self { git, layout }
    }

    /// Read and classify every change between `merge_base` and `target_ref`.
    pub fn collect(&self, merge_base: &CommitId, target_ref: &str) -> Result<ChangeSet, SyncError> {
        let target_sha = self.git.resolve_ref(target_ref)?;
        let raw = self.git.diff_stat(&merge_base.0, &target_sha.0)?;
        let commits = self.git.commit_log(&merge_base.0, &target_sha.0)?;
        Ok(ChangeSet {
            merge_base: merge_base.clone(),
            target_ref: target_ref.to_string(),
            target_sha,
            entries: classify(raw, self.layout),
            commits,
        })
    }

    /// [`collect`](Self::collect) then [`summarize`].
    pub fn generate(&self, merge_base: &CommitId, target_ref: &str) -> Result<DiffReport, SyncError> {
        Ok(summarize(&self.collect(merge_base, target_ref)?))
    }
}

/// Classify raw changes, sorted by path.
pub fn classify(raw: Vec<RawChange>, layout: &Layout) -> Vec<ChangeEntry> {
    let mut entries: Vec<ChangeEntry> = raw
        .into_iter()
        .map(|c| {
            let category = Category::classify(&c.path, layout);
            ChangeEntry::new(c.path, c.old_path, c.kind, category, c.lines_added, c.lines_removed)
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

/// Aggregate a change set into a report. The commit list is capped at
/// [`COMMIT_LOG_CAP`].
pub fn summarize(changes: &ChangeSet) -> DiffReport {
    let mut counts = ChangeCounts::default();
    let mut categories: BTreeMap<Category, usize> = BTreeMap::new();
    let (mut insertions, mut deletions) = (0, 0);

    for entry in &changes.entries {
        match entry.kind {
            ChangeKind::Added => counts.added += 1,
            ChangeKind::Modified => counts.modified += 1,
            ChangeKind::Deleted => counts.deleted += 1,
            ChangeKind::Renamed => counts.renamed += 1,
        }
        *categories.entry(entry.category).or_default() += 1;
        insertions += entry.lines_added;
        deletions += entry.lines_removed;
    }

    let commit_count = changes.commits.len();
    let commits: Vec<CommitInfo> = changes.commits.iter().take(COMMIT_LOG_CAP).cloned().collect();

    DiffReport {
        merge_base: changes.merge_base.clone(),
        target_ref: changes.target_ref.clone(),
        target_sha: changes.target_sha.clone(),
        counts,
        insertions,
        deletions,
        categories,
        entries: changes.entries.clone(),
        commit_count,
        commits_omitted: commit_count - commits.len(),
        commits,
    }
}

/// Write the structured and narrative change reports.
pub fn write(
    report: &DiffReport,
    renderer: &ReportRenderer,
    out: &mut ArtifactWriter,
) -> Result<Vec<PathBuf>, SyncError> {
    let json = out.write_json(CHANGES_JSON, report)?;
    let md = out.write(ReportKind::Changes.file_name(), &renderer.render_changes(report)?)?;
    tracing::info!(
        files = report.counts.total(),
        commits = report.commit_count,
        "change report written"
    );
    Ok(vec![json, md])
}
