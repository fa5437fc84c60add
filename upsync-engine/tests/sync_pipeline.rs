mod common;

use chrono::Utc;
use common::{config, git, Fixture};
use upsync_core::{CheckSpec, Outcome, Phase, RiskLevel, Strategy};
use upsync_engine::{
    rollback, sync, GitRepo, Orchestrator, RunContext, RunReport, SyncError, SyncOptions,
};

fn options(dry_run: bool) -> SyncOptions {
    SyncOptions {
        dry_run,
        ..SyncOptions::from_config(&config())
    }
}

fn never_asked(prompt: &str) -> bool {
    panic!("unexpected confirmation prompt: {prompt}");
}

fn run_with(fx: &Fixture, cfg: upsync_core::SyncConfig, opts: SyncOptions, answer: bool) -> RunReport {
    sync(fx.fork_path(), cfg, opts, move |_: &str| answer).expect("run starts")
}

fn read_artifact(report: &RunReport, name: &str) -> String {
    std::fs::read_to_string(report.report_dir().join(name)).expect(name)
}

fn failing_check() -> CheckSpec {
    CheckSpec {
        name: "template-drift".to_string(),
        command: vec!["sh".to_string(), "-c".to_string(), "echo drift; exit 1".to_string()],
        remediation: "reconcile templates".to_string(),
        timeout_secs: 30,
    }
}

#[test]
fn docs_only_sync_merges_and_summarizes() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "line one\nline 2\nline three\nline four\n")], "docs: expand x");
    let before = fx.head();

    let report = sync(fx.fork_path(), config(), options(false), never_asked).expect("run");

    assert_eq!(report.outcome(), Outcome::Success, "{:?}", report.failure);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.last_phase, Phase::Validated);
    assert_eq!(report.run.final_phase, Some(Phase::Summarized));

    let assessment = report.assessment.as_ref().expect("assessment");
    assert_eq!(assessment.total_score, 1);
    assert_eq!(assessment.level, RiskLevel::Low);
    assert!(!assessment.adaptation_required);

    // The merge commit's first parent is the pre-sync HEAD, which the backup keeps.
    let backup = report.backup.as_ref().expect("backup");
    assert_eq!(backup.tip.0, before);
    assert_eq!(git(fx.fork_path(), &["rev-parse", "HEAD^1"]), before);
    assert_eq!(
        git(fx.fork_path(), &["rev-parse", &backup.name.0]),
        before,
        "backup tip must equal pre-merge HEAD"
    );
    assert_eq!(
        git(fx.fork_path(), &["log", "-1", "--format=%s"]),
        "Merge upstream changes from upstream/main"
    );

    for name in [
        "changes.json",
        "changes.md",
        "compatibility.json",
        "compatibility.md",
        "execution.log",
        "ci-summary.json",
        "summary.md",
        "run.json",
    ] {
        assert!(report.report_dir().join(name).is_file(), "missing {name}");
    }
    assert!(read_artifact(&report, "summary.md").contains("Status: **SUCCESS**"));
    let log = read_artifact(&report, "execution.log");
    assert!(log.contains("BEGIN git fetch --prune upstream"));
    assert!(log.contains("OK git merge --no-ff upstream/main"));
    assert!(log.contains("PHASE validated"));
    assert_eq!(fx.status(), "", "reports must not dirty the tree");
}

#[test]
fn dry_run_changes_nothing() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("templates/plan-template.md", "")], "drop plan template");
    let head = fx.head();
    let branches = fx.branches();

    let report = sync(fx.fork_path(), config(), options(true), never_asked).expect("run");

    assert_eq!(report.outcome(), Outcome::Success);
    assert_eq!(report.last_phase, Phase::DryRunComplete);
    assert!(report.backup.is_none());
    assert_eq!(fx.head(), head);
    assert_eq!(fx.branches(), branches);
    assert_eq!(fx.status(), "");

    let assessment = report.assessment.as_ref().expect("assessment");
    assert_eq!(assessment.base_score, 10);
    assert_eq!(assessment.level, RiskLevel::High);
    assert!(assessment.adaptation_required);
    assert!(read_artifact(&report, "summary.md").contains("Dry run"));
}

#[test]
fn target_under_another_remote_fetches_that_remote() {
    let fx = Fixture::new();
    let source = fx.upstream.path().to_string_lossy().to_string();
    git(fx.fork_path(), &["remote", "add", "other", &source]);
    git(fx.fork_path(), &["fetch", "-q", "other"]);
    fx.upstream_commit(&[("docs/x.md", "line one\nline two\nline three\n")], "docs: more");

    let opts = SyncOptions {
        target_ref: "other/main".to_string(),
        ..options(true)
    };
    let report = sync(fx.fork_path(), config(), opts, never_asked).expect("run");

    assert_eq!(report.outcome(), Outcome::Success);
    let diff = report.report.as_ref().expect("report");
    assert_eq!(diff.commit_count, 1);
    assert_eq!(diff.counts.modified, 1);
    assert!(read_artifact(&report, "execution.log").contains("fetch --prune other"));
}

#[test]
fn dry_run_probe_reports_conflicts_without_leaving_them() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("templates/spec-template.md", "# Spec\n\n## Upstream\n")], "upstream");
    fx.fork_commit(&[("templates/spec-template.md", "# Spec\n\n## Local\n")], "local");

    let report = sync(fx.fork_path(), config(), options(true), never_asked).expect("run");

    assert_eq!(report.outcome(), Outcome::Success);
    assert_eq!(report.probe_conflicts.len(), 1);
    assert_eq!(report.probe_conflicts[0].path, "templates/spec-template.md");
    assert_eq!(fx.status(), "");
    assert!(read_artifact(&report, "summary.md").contains("## Conflicts"));
}

#[test]
fn breaking_commit_pushes_scripts_change_to_high() {
    let fx = Fixture::new();
    fx.upstream_commit(
        &[("scripts/bash/setup.sh", "#!/bin/sh\necho setup --new\n")],
        "feat: new setup flags\n\nBREAKING CHANGE: old flags are gone",
    );

    let report = sync(fx.fork_path(), config(), options(true), never_asked).expect("run");
    let assessment = report.assessment.as_ref().expect("assessment");
    assert_eq!(assessment.base_score, 3);
    assert_eq!(assessment.breaking_bonus, 3);
    assert_eq!(assessment.total_score, 6);
    assert_eq!(assessment.level, RiskLevel::High);
}

#[test]
fn conflict_fails_with_backup_and_guidance() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("templates/spec-template.md", "# Spec\n\n## Upstream\n")], "upstream");
    let before = fx.fork_commit(&[("templates/spec-template.md", "# Spec\n\n## Local\n")], "local");

    let report = run_with(&fx, config(), options(false), true);

    assert_eq!(report.outcome(), Outcome::Failed);
    assert_eq!(report.exit_code(), 1);
    let failure = report.failure.as_ref().expect("failure");
    assert_eq!(failure.phase, Phase::Executed);
    assert_eq!(failure.error.kind(), "conflict");
    assert_eq!(failure.conflicts[0].path, "templates/spec-template.md");
    assert!(failure.guidance[0].starts_with("templates (1 file(s))"));
    assert_eq!(failure.recovery[0], "git merge --abort");

    // Conflicted state is left for the operator; the backup holds the old tip.
    let backup = failure.backup.as_ref().expect("backup");
    assert_eq!(git(fx.fork_path(), &["rev-parse", &backup.0]), before);
    assert!(fx.status().contains("UU templates/spec-template.md"));

    let summary = read_artifact(&report, "summary.md");
    assert!(summary.contains("Status: **FAILED**"));
    assert!(summary.contains("Kind: conflict"));
    assert!(summary.contains(&format!("git reset --hard {}", backup.0)));
}

#[test]
fn rollback_from_a_conflicted_merge_restores_the_backup_tip() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("src/cli.py", "print('upstream')\n")], "upstream cli");
    let before = fx.fork_commit(&[("src/cli.py", "print('local')\n")], "local cli");

    let report = run_with(&fx, config(), options(false), true);
    let backup = report.failure.as_ref().and_then(|f| f.backup.clone()).expect("backup");
    assert!(fx.status().contains("UU src/cli.py"));

    let git_repo = GitRepo::open(fx.fork_path()).expect("open");
    let head = rollback(&git_repo, &backup.0).expect("rollback");
    assert_eq!(head.0, before);
    assert_eq!(fx.head(), before);
    assert!(fx.status().is_empty());
    assert_eq!(git_repo.operation_in_progress().expect("state"), None);
}

#[test]
fn rebase_strategy_replays_local_commits() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "upstream docs\n")], "docs upstream");
    fx.fork_commit(&[("NOTES.txt", "local notes\n")], "local notes");

    let opts = SyncOptions {
        strategy: Strategy::Rebase,
        ..options(false)
    };
    let report = sync(fx.fork_path(), config(), opts, never_asked).expect("run");
    assert_eq!(report.outcome(), Outcome::Success, "{:?}", report.failure);

    let upstream_tip = git(fx.fork_path(), &["rev-parse", "upstream/main"]);
    assert_eq!(git(fx.fork_path(), &["rev-parse", "HEAD^"]), upstream_tip);
    assert_eq!(git(fx.fork_path(), &["log", "-1", "--format=%s"]), "local notes");
}

#[test]
fn declining_the_gate_aborts_without_mutation() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("src/cli.py", "print('v2')\n")], "cli: v2");
    let head = fx.head();
    let branches = fx.branches();

    let mut prompts = Vec::new();
    let report = sync(fx.fork_path(), config(), options(false), |p: &str| {
        prompts.push(p.to_string());
        false
    })
    .expect("run");

    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("manual adaptation"));
    assert_eq!(report.outcome(), Outcome::Aborted);
    assert_eq!(report.exit_code(), 1);
    assert!(report.failure.is_none());
    assert_eq!(fx.head(), head);
    assert_eq!(fx.branches(), branches);
    assert!(read_artifact(&report, "summary.md").contains("Status: **ABORTED**"));
}

#[test]
fn force_skips_the_gate() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("src/cli.py", "print('v2')\n")], "cli: v2");

    let opts = SyncOptions {
        force: true,
        ..options(false)
    };
    let report = sync(fx.fork_path(), config(), opts, never_asked).expect("run");
    assert_eq!(report.outcome(), Outcome::Success, "{:?}", report.failure);
}

#[test]
fn dirty_tree_fails_before_fetch() {
    let fx = Fixture::new();
    common::write(fx.fork_path(), "docs/x.md", "local edit\n");

    let report = sync(fx.fork_path(), config(), options(false), never_asked).expect("run");
    let failure = report.failure.as_ref().expect("failure");
    assert_eq!(failure.phase, Phase::SafetyChecked);
    assert!(matches!(failure.error, SyncError::DirtyTree { .. }));
    assert!(failure.backup.is_none());
    assert_eq!(report.last_phase, Phase::Init);
    assert!(report.report.is_none());

    let summary = read_artifact(&report, "summary.md");
    assert!(summary.contains("Kind: dirty-tree"));
    assert!(!summary.contains("## Changes"));
    assert!(!read_artifact(&report, "execution.log").contains("fetch"));
}

#[test]
fn untracked_files_do_not_block() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "new\n")], "docs");
    common::write(fx.fork_path(), "scratch.txt", "untracked\n");

    let report = sync(fx.fork_path(), config(), options(true), never_asked).expect("run");
    assert_eq!(report.outcome(), Outcome::Success, "{:?}", report.failure);
}

#[test]
fn missing_remote_fails_safety_check() {
    let fx = Fixture::new();
    git(fx.fork_path(), &["remote", "remove", "upstream"]);

    let report = sync(fx.fork_path(), config(), options(false), never_asked).expect("run");
    let failure = report.failure.as_ref().expect("failure");
    assert_eq!(failure.error.kind(), "missing-remote");
    assert_eq!(failure.recovery[0], "git remote add upstream <upstream-url>");
}

#[test]
fn failed_check_blocks_success_but_keeps_merge() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "new\n")], "docs");
    let mut cfg = config();
    cfg.checks = vec![failing_check()];

    let report = run_with(&fx, cfg, options(false), true);
    assert_eq!(report.outcome(), Outcome::Failed);
    let failure = report.failure.as_ref().expect("failure");
    assert_eq!(failure.phase, Phase::Validated);
    assert_eq!(failure.error.kind(), "check-failed");

    let merged = git(fx.fork_path(), &["rev-list", "--parents", "-n", "1", "HEAD"]);
    assert_eq!(merged.split(' ').count(), 3, "merge commit stays in place");
    let ci = report.ci.as_ref().expect("ci");
    assert!(!ci.passed);
    assert!(read_artifact(&report, "ci-summary.json").contains("\"template-drift\""));
    assert!(read_artifact(&report, "summary.md").contains("FAIL template-drift"));
}

#[test]
fn forced_run_tolerates_failed_checks() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "new\n")], "docs");
    let mut cfg = config();
    cfg.checks = vec![failing_check()];
    let opts = SyncOptions {
        force: true,
        ..options(false)
    };

    let report = run_with(&fx, cfg, opts, true);
    assert_eq!(report.outcome(), Outcome::Success);
    assert!(!report.ci.as_ref().expect("ci").passed);
}

#[test]
fn no_ci_skips_validation() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "new\n")], "docs");
    let mut cfg = config();
    cfg.checks = vec![failing_check()];
    let opts = SyncOptions {
        no_ci: true,
        ..options(false)
    };

    let report = run_with(&fx, cfg, opts, true);
    assert_eq!(report.outcome(), Outcome::Success);
    assert!(report.ci.as_ref().expect("ci").skipped);
    assert!(!report.report_dir().join("ci-summary.json").exists());
}

#[test]
fn missing_check_program_is_fatal() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "new\n")], "docs");
    let mut cfg = config();
    cfg.checks = vec![CheckSpec {
        name: "structure-lint".to_string(),
        command: vec!["scripts/sdd/validate_structure.py".to_string()],
        remediation: String::new(),
        timeout_secs: 30,
    }];

    let report = run_with(&fx, cfg, options(false), true);
    let failure = report.failure.as_ref().expect("failure");
    assert_eq!(failure.error.kind(), "check-execution");
    assert!(failure.backup.is_some());
}

#[test]
fn backup_name_collision_fails_before_merge() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "new\n")], "docs");
    let head = fx.head();

    let repo = GitRepo::open(fx.fork_path()).expect("open");
    let started_at = Utc::now();
    let ctx = RunContext::new(&repo, config(), options(false), started_at).expect("context");
    git(fx.fork_path(), &["branch", &ctx.backup_name()]);

    let report = Orchestrator::new(repo, ctx, never_asked).expect("orchestrator").run();
    let failure = report.failure.as_ref().expect("failure");
    assert_eq!(failure.error.kind(), "branch-exists");
    assert_eq!(failure.phase, Phase::Executed);
    assert_eq!(fx.head(), head);
}

#[test]
fn broken_template_override_still_leaves_a_summary() {
    let fx = Fixture::new();
    let templates = tempfile::TempDir::new().expect("templates");
    std::fs::write(templates.path().join("summary.md.tera"), "{% if %}").expect("write");
    let mut cfg = config();
    cfg.templates_dir = Some(templates.path().to_path_buf());
    let head = fx.head();

    let repo = GitRepo::open(fx.fork_path()).expect("open");
    let ctx = RunContext::new(&repo, cfg, options(false), Utc::now()).expect("context");
    let report_dir = ctx.report_dir.clone();

    let err = Orchestrator::new(repo, ctx, never_asked)
        .err()
        .expect("startup fails");
    assert_eq!(err.kind(), "render");

    let summary = std::fs::read_to_string(report_dir.join("summary.md")).expect("summary");
    assert!(summary.contains("Status: **FAILED**"));
    assert!(summary.contains("could not start [render]"));
    let log = std::fs::read_to_string(report_dir.join("execution.log")).expect("log");
    assert!(log.contains("FAIL startup [render]"));
    assert_eq!(fx.head(), head);
}

#[test]
fn unknown_target_ref_fails_after_fetch() {
    let fx = Fixture::new();
    let opts = SyncOptions {
        target_ref: "upstream/nope".to_string(),
        ..options(true)
    };
    let report = sync(fx.fork_path(), config(), opts, never_asked).expect("run");
    let failure = report.failure.as_ref().expect("failure");
    assert_eq!(failure.phase, Phase::Fetched);
    assert_eq!(failure.error.kind(), "unknown-ref");
}

#[test]
fn run_json_records_outcome_and_artifact_digests() {
    let fx = Fixture::new();
    fx.upstream_commit(&[("docs/x.md", "new\n")], "docs");

    let report = sync(fx.fork_path(), config(), options(true), never_asked).expect("run");
    let run: serde_json::Value =
        serde_json::from_str(&read_artifact(&report, "run.json")).expect("run.json");
    assert_eq!(run["outcome"], "success");
    assert_eq!(run["final_phase"], "summarized");
    assert_eq!(run["dry_run"], true);
    let names: Vec<&str> = run["artifacts"]
        .as_array()
        .expect("artifacts")
        .iter()
        .filter_map(|a| a["name"].as_str())
        .collect();
    assert!(names.contains(&"changes.json"));
    assert!(names.contains(&"summary.md"));
    assert!(run["artifacts"][0]["sha256"].as_str().expect("digest").len() == 64);
}
