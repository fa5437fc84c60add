//! Backup branches and operator-driven rollback.

use chrono::{DateTime, Utc};

use upsync_core::{BackupBranch, BranchName, CommitId};

use crate::error::SyncError;
use crate::vcs::GitRepo;

/// Create `name` at the current HEAD.
pub fn create_backup(
    git: &GitRepo,
    name: &str,
    created_at: DateTime<Utc>,
) -> Result<BackupBranch, SyncError> {
    let tip = git.head_sha()?;
    let name = git.create_branch(name, &tip)?;
    tracing::info!(branch = %name, tip = %tip.short(), "backup branch created");
    Ok(BackupBranch {
        name,
        tip,
        created_at,
    })
}

/// Local branches carrying the backup prefix, oldest first (names embed
/// their creation time).
pub fn list_backups(git: &GitRepo, prefix: &str) -> Result<Vec<(BranchName, CommitId)>, SyncError> {
    git.list_branches(prefix)
}

/// Abort any merge or rebase in flight, then hard-reset the current branch
/// to `branch`. Returns the new HEAD.
pub fn rollback(git: &GitRepo, branch: &str) -> Result<CommitId, SyncError> {
    if !git.branch_exists(branch)? {
        return Err(SyncError::UnknownRef {
            reference: branch.to_string(),
        });
    }
    match git.operation_in_progress()? {
        Some("merge") => git.abort_merge()?,
        Some("rebase") => git.abort_rebase()?,
        _ => {}
    }
    let head = git.reset_hard(&format!("refs/heads/{branch}"))?;
    tracing::info!(branch, head = %head.short(), "rolled back");
    Ok(head)
}

/// Copy-paste commands that undo a run that created `backup`. The last
/// line is a shell comment naming the one-step alternative, so pasting the
/// whole list resets exactly once.
pub fn recovery_commands(backup: &BranchName, operation: Option<&str>) -> Vec<String> {
    let mut steps = Vec::new();
    match operation {
        Some("merge") => steps.push("git merge --abort".to_string()),
        Some("rebase") => steps.push("git rebase --abort".to_string()),
        _ => {}
    }
    steps.push(format!("git reset --hard {backup}"));
    steps.push(format!("# or, in one step: upsync rollback {backup} --yes"));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_for_a_stopped_merge_aborts_first() {
        let steps = recovery_commands(&BranchName::from("backup/pre-sync-1"), Some("merge"));
        assert_eq!(
            steps,
            vec![
                "git merge --abort",
                "git reset --hard backup/pre-sync-1",
                "# or, in one step: upsync rollback backup/pre-sync-1 --yes",
            ]
        );
    }

    #[test]
    fn recovery_resets_only_once() {
        let steps = recovery_commands(&BranchName::from("b"), Some("rebase"));
        let executable: Vec<&String> = steps.iter().filter(|s| !s.starts_with('#')).collect();
        assert_eq!(executable, vec!["git rebase --abort", "git reset --hard b"]);
        assert!(steps.last().is_some_and(|s| s.contains("upsync rollback b --yes")));
    }

    #[test]
    fn recovery_after_checks_is_a_plain_reset() {
        let steps = recovery_commands(&BranchName::from("b"), None);
        assert_eq!(steps[0], "git reset --hard b");
    }
}
