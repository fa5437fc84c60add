//! Compatibility analyzer.
//!
//! [`assess`] is pure: the same entries, commits and thresholds always give
//! the same assessment. [`assess_refs`] is the git-backed entry point.

use upsync_core::{
    BreakingChange, Category, CategoryScore, ChangeEntry, CommitInfo, CompatibilityAssessment,
    Layout, RiskLevel, RiskThresholds,
};
use upsync_renderer::{ReportKind, ReportRenderer};

use crate::artifact::ArtifactWriter;
use crate::error::SyncError;
use crate::report::DiffReporter;
use crate::vcs::GitRepo;

pub const COMPATIBILITY_JSON: &str = "compatibility.json";

/// Case-insensitive substrings that flag a commit as potentially breaking.
pub const BREAKING_PHRASES: &[&str] = &[
    "breaking change",
    "breaking:",
    "incompatible",
    "removed",
    "deprecated",
    "renamed",
    "moved",
];

/// Points added per breaking commit, however many phrases it matches.
pub const BREAKING_BONUS: u32 = 3;

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Level(RiskLevel),
    Category(Category),
    Breaking,
    NoChanges,
}

/// Recommendation rules, evaluated top to bottom. Every matching rule
/// contributes its text once.
const RULES: &[(Trigger, &str)] = &[
    (
        Trigger::NoChanges,
        "No upstream file changes; the sync only records upstream history",
    ),
    (
        Trigger::Level(RiskLevel::High),
        "Schedule a manual review before merging and keep the backup branch until checks pass",
    ),
    (
        Trigger::Level(RiskLevel::Medium),
        "Read the change report and run the full test suite after merging",
    ),
    (
        Trigger::Level(RiskLevel::Low),
        "Low risk: merge and spot-check the change report",
    ),
    (
        Trigger::Breaking,
        "Read the flagged commits and update local extensions that depend on what they change",
    ),
    (
        Trigger::Category(Category::Templates),
        "Review template changes for workflow impact",
    ),
    (
        Trigger::Category(Category::Cli),
        "Re-test CLI commands and re-apply local CLI patches",
    ),
    (
        Trigger::Category(Category::Scripts),
        "Compare automation scripts with local modifications before running them",
    ),
    (
        Trigger::Category(Category::Ci),
        "Check CI workflow changes for runners, secrets and required status checks",
    ),
    (
        Trigger::Category(Category::Tests),
        "Run the upstream test changes against local extensions",
    ),
    (
        Trigger::Category(Category::Documentation),
        "Skim documentation changes for policy or process updates",
    ),
    (
        Trigger::Category(Category::Dependencies),
        "Reinstall dependencies and regenerate lock files",
    ),
];

/// First phrase found in `message`, if any.
pub fn breaking_phrase(message: &str) -> Option<&'static str> {
    let lowered = message.to_lowercase();
    BREAKING_PHRASES.iter().copied().find(|p| lowered.contains(p))
}

/// Score a change set.
pub fn assess(
    entries: &[ChangeEntry],
    commits: &[CommitInfo],
    thresholds: &RiskThresholds,
) -> CompatibilityAssessment {
    let breakdown = breakdown(entries);
    let base_score: u32 = entries.iter().map(|e| e.risk_weight).sum();

    let breaking_changes: Vec<BreakingChange> = commits
        .iter()
        .filter_map(|c| {
            breaking_phrase(&c.message()).map(|phrase| BreakingChange {
                sha: c.sha.clone(),
                subject: c.subject.clone(),
                phrase: phrase.to_string(),
            })
        })
        .collect();
    let breaking_bonus = BREAKING_BONUS * breaking_changes.len() as u32;

    let total_score = base_score + breaking_bonus;
    let level = thresholds.level(total_score);
    let adaptation_required = level == RiskLevel::High
        || entries.iter().any(|e| e.category.requires_adaptation());

    let recommendations = recommend(level, &breakdown, !breaking_changes.is_empty());

    CompatibilityAssessment {
        total_score,
        base_score,
        breaking_bonus,
        level,
        adaptation_required,
        breaking_changes,
        recommendations,
        breakdown,
    }
}

/// Compute the merge base of `local` and `target`, collect the range and
/// assess it. Fails with `NoCommonAncestor` when the histories are unrelated.
pub fn assess_refs(
    git: &GitRepo,
    local: &str,
    target: &str,
    layout: &Layout,
    thresholds: &RiskThresholds,
) -> Result<CompatibilityAssessment, SyncError> {
    let merge_base = git.merge_base(local, target)?;
    let changes = DiffReporter::new(git, layout).collect(&merge_base, target)?;
    Ok(assess(&changes.entries, &changes.commits, thresholds))
}

/// Write the structured and narrative compatibility reports.
pub fn write(
    assessment: &CompatibilityAssessment,
    target_ref: &str,
    renderer: &ReportRenderer,
    out: &mut ArtifactWriter,
) -> Result<(), SyncError> {
    out.write_json(COMPATIBILITY_JSON, assessment)?;
    out.write(
        ReportKind::Compatibility.file_name(),
        &renderer.render_compatibility(assessment, target_ref)?,
    )?;
    tracing::info!(
        level = %assessment.level,
        score = assessment.total_score,
        adaptation_required = assessment.adaptation_required,
        "compatibility report written"
    );
    Ok(())
}

/// Per-category totals in precedence order; absent categories are omitted.
fn breakdown(entries: &[ChangeEntry]) -> Vec<CategoryScore> {
    Category::all()
        .iter()
        .filter_map(|&category| {
            let matching: Vec<&ChangeEntry> =
                entries.iter().filter(|e| e.category == category).collect();
            (!matching.is_empty()).then(|| CategoryScore {
                category,
                files: matching.len(),
                weight: category.weight(),
                score: matching.iter().map(|e| e.risk_weight).sum(),
            })
        })
        .collect()
}

fn recommend(level: RiskLevel, breakdown: &[CategoryScore], breaking: bool) -> Vec<String> {
    RULES
        .iter()
        .filter(|(trigger, _)| match trigger {
            Trigger::Level(l) => *l == level,
            Trigger::Category(c) => breakdown.iter().any(|b| b.category == *c),
            Trigger::Breaking => breaking,
            Trigger::NoChanges => breakdown.is_empty(),
        })
        .map(|(_, text)| text.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use upsync_core::{ChangeKind, CommitId};

    fn entry(path: &str, kind: ChangeKind, category: Category) -> ChangeEntry {
        ChangeEntry::new(path, None, kind, category, 1, 1)
    }

    fn commit(sha: &str, subject: &str, body: &str) -> CommitInfo {
        CommitInfo {
            sha: CommitId::from(sha),
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn docs_only_change_is_low_risk() {
        let entries = [entry("docs/x.md", ChangeKind::Modified, Category::Documentation)];
        let a = assess(&entries, &[commit("a1", "docs: clarify x", "")], &RiskThresholds::default());
        assert_eq!(a.total_score, 1);
        assert_eq!(a.level, RiskLevel::Low);
        assert!(!a.adaptation_required);
        assert!(a.breaking_changes.is_empty());
    }

    #[test]
    fn deleted_template_is_high_risk() {
        let entries = [entry(
            "templates/plan-template.md",
            ChangeKind::Deleted,
            Category::Templates,
        )];
        let a = assess(&entries, &[], &RiskThresholds::default());
        assert_eq!(a.base_score, 10);
        assert_eq!(a.level, RiskLevel::High);
        assert!(a.adaptation_required);
        assert!(a
            .recommendations
            .contains(&"Review template changes for workflow impact".to_string()));
    }

    #[test]
    fn breaking_commit_adds_bonus() {
        let entries = [entry("scripts/bash/setup.sh", ChangeKind::Modified, Category::Scripts)];
        let commits = [commit("b2", "feat: new setup flow", "BREAKING CHANGE: flags renamed")];
        let a = assess(&entries, &commits, &RiskThresholds::default());
        assert_eq!(a.base_score, 3);
        assert_eq!(a.breaking_bonus, 3);
        assert_eq!(a.total_score, 6);
        assert_eq!(a.level, RiskLevel::High);
        assert_eq!(a.breaking_changes[0].phrase, "breaking change");
    }

    #[test]
    fn commit_matching_several_phrases_counts_once() {
        let commits = [commit("c3", "Removed and renamed things", "deprecated, moved")];
        let a = assess(&[], &commits, &RiskThresholds::default());
        assert_eq!(a.breaking_bonus, BREAKING_BONUS);
        assert_eq!(a.breaking_changes.len(), 1);
    }

    #[rstest]
    #[case("BREAKING: drop flag", Some("breaking:"))]
    #[case("Incompatible config format", Some("incompatible"))]
    #[case("mark old api Deprecated", Some("deprecated"))]
    #[case("fix typo", None)]
    fn phrase_matching_is_case_insensitive(#[case] message: &str, #[case] expected: Option<&str>) {
        assert_eq!(breaking_phrase(message), expected);
    }

    #[test]
    fn score_never_decreases_as_entries_are_appended() {
        let thresholds = RiskThresholds::default();
        let kinds = [
            ChangeKind::Added,
            ChangeKind::Modified,
            ChangeKind::Deleted,
            ChangeKind::Renamed,
        ];
        let mut entries = Vec::new();
        let mut previous = 0;
        for (i, category) in Category::all().iter().cycle().take(40).enumerate() {
            entries.push(entry(&format!("f{i}"), kinds[i % kinds.len()], *category));
            let score = assess(&entries, &[], &thresholds).total_score;
            assert!(score >= previous, "score fell from {previous} to {score}");
            previous = score;
        }
    }

    #[test]
    fn docs_only_risk_follows_file_count_against_thresholds() {
        let thresholds = RiskThresholds::default();
        let docs = |n: usize| -> Vec<ChangeEntry> {
            (0..n)
                .map(|i| entry(&format!("docs/{i}.md"), ChangeKind::Modified, Category::Documentation))
                .collect()
        };

        let one = assess(&docs(1), &[], &thresholds);
        assert_eq!(one.level, RiskLevel::Low);
        assert!(!one.adaptation_required);

        for n in [2, 3, 4] {
            let a = assess(&docs(n), &[], &thresholds);
            assert_eq!(a.total_score, n as u32);
            assert_eq!(a.level, RiskLevel::Medium, "{n} doc files");
            assert!(!a.adaptation_required, "{n} doc files");
        }

        // Only the level rule can force adaptation for documentation.
        let five = assess(&docs(5), &[], &thresholds);
        assert_eq!(five.level, RiskLevel::High);
        assert!(five.adaptation_required);
    }

    #[test]
    fn template_change_requires_adaptation_even_at_low_score() {
        let thresholds = RiskThresholds { medium: 50, high: 100 };
        let entries = [entry("templates/a.md", ChangeKind::Modified, Category::Templates)];
        let a = assess(&entries, &[], &thresholds);
        assert_eq!(a.level, RiskLevel::Low);
        assert!(a.adaptation_required);
    }

    #[test]
    fn cli_change_requires_adaptation() {
        let entries = [entry("src/cli.py", ChangeKind::Modified, Category::Cli)];
        let a = assess(&entries, &[], &RiskThresholds::default());
        assert_eq!(a.level, RiskLevel::Medium);
        assert!(a.adaptation_required);
    }

    #[test]
    fn breakdown_follows_precedence_order() {
        let entries = [
            entry("README.md", ChangeKind::Modified, Category::Documentation),
            entry("templates/a.md", ChangeKind::Deleted, Category::Templates),
            entry("templates/b.md", ChangeKind::Added, Category::Templates),
        ];
        let a = assess(&entries, &[], &RiskThresholds::default());
        assert_eq!(a.breakdown.len(), 2);
        assert_eq!(a.breakdown[0].category, Category::Templates);
        assert_eq!(a.breakdown[0].files, 2);
        assert_eq!(a.breakdown[0].score, 15);
        assert_eq!(a.breakdown[1].category, Category::Documentation);
    }

    #[test]
    fn empty_range_gets_single_level_recommendation_plus_no_changes_note() {
        let a = assess(&[], &[], &RiskThresholds::default());
        assert_eq!(a.level, RiskLevel::Low);
        assert_eq!(a.recommendations.len(), 2);
        assert!(a.recommendations[0].starts_with("No upstream file changes"));
    }
}
