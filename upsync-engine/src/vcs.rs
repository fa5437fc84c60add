//! Git adapter.
//!
//! Every repository interaction goes through [`GitRepo`], which drives the
//! `git` binary. Read-only queries run directly; operations that change refs,
//! the index or the working tree are bracketed by `BEGIN`/`OK`/`FAIL` lines
//! in the run's [`ExecutionLog`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use upsync_core::{BranchName, ChangeKind, CommitId, CommitInfo};

use crate::error::SyncError;
use crate::exec_log::ExecutionLog;
use crate::process;

/// stderr fragments (lowercased) that mark a fetch failure as an
/// authentication problem rather than a network one.
const AUTH_MARKERS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "access denied",
    "returned error: 403",
    "returned error: 401",
];

/// Markers inside the git dir that mean another operation is mid-flight.
const IN_PROGRESS_MARKERS: &[(&str, &str)] = &[
    ("MERGE_HEAD", "merge"),
    ("rebase-merge", "rebase"),
    ("rebase-apply", "rebase"),
    ("CHERRY_PICK_HEAD", "cherry-pick"),
    ("REVERT_HEAD", "revert"),
];

/// One file-level change as git reports it, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: String,
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    pub lines_added: u64,
    pub lines_removed: u64,
}

/// Remote-tracking refs after a fetch, keyed by short name (`upstream/main`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefSet {
    pub remote: String,
    pub refs: BTreeMap<String, CommitId>,
}

impl RefSet {
    pub fn get(&self, name: &str) -> Option<&CommitId> {
        self.refs.get(name)
    }
}

/// A git work tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    fetch_timeout: Option<Duration>,
    log: Option<ExecutionLog>,
}

impl GitRepo {
    /// Open the work tree containing `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let output = git_output(path, &["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(SyncError::Git {
                command: "rev-parse --show-toplevel".to_string(),
                message: format!(
                    "{} is not inside a git work tree: {}",
                    path.display(),
                    stderr_of(&output)
                ),
            });
        }
        Ok(Self {
            root: PathBuf::from(stdout_of(&output).trim()),
            fetch_timeout: None,
            log: None,
        })
    }

    /// Mirror mutating operations into `log`.
    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Kill `fetch` after `timeout`. `None` waits indefinitely.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Absolute path of the `.git` directory.
    pub fn git_dir(&self) -> Result<PathBuf, SyncError> {
        let out = self.read(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    pub fn head_sha(&self) -> Result<CommitId, SyncError> {
        self.resolve_ref("HEAD")
    }

    /// Checked-out branch, or `None` when HEAD is detached.
    pub fn current_branch(&self) -> Result<Option<String>, SyncError> {
        let output = self.exec(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let name = stdout_of(&output).trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    /// Resolve any revision to the commit it names.
    pub fn resolve_ref(&self, reference: &str) -> Result<CommitId, SyncError> {
        let spec = format!("{reference}^{{commit}}");
        let output = self.exec(&["rev-parse", "--verify", "--quiet", &spec])?;
        let sha = stdout_of(&output).trim().to_string();
        if !output.status.success() || sha.is_empty() {
            return Err(SyncError::UnknownRef {
                reference: reference.to_string(),
            });
        }
        Ok(CommitId(sha))
    }

    /// Tracked-file status in porcelain form. Untracked files are ignored.
    pub fn status_porcelain(&self) -> Result<String, SyncError> {
        self.read(&["status", "--porcelain", "--untracked-files=no"])
    }

    /// Name of a merge, rebase, cherry-pick or revert that is mid-flight.
    pub fn operation_in_progress(&self) -> Result<Option<&'static str>, SyncError> {
        let dir = self.git_dir()?;
        Ok(IN_PROGRESS_MARKERS
            .iter()
            .find(|(marker, _)| dir.join(marker).exists())
            .map(|(_, label)| *label))
    }

    /// Configured remote names.
    pub fn remotes(&self) -> Result<Vec<String>, SyncError> {
        let out = self.read(&["remote"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn has_remote(&self, name: &str) -> Result<bool, SyncError> {
        Ok(self.remotes()?.iter().any(|r| r == name))
    }

    /// Remote a remote-tracking ref belongs to: the longest configured
    /// remote `r` such that `reference` is `r/…` or `refs/remotes/r/…`.
    pub fn remote_of(&self, reference: &str) -> Result<Option<String>, SyncError> {
        let short = reference.strip_prefix("refs/remotes/").unwrap_or(reference);
        Ok(self
            .remotes()?
            .into_iter()
            .filter(|r| {
                short
                    .strip_prefix(r.as_str())
                    .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
            })
            .max_by_key(|r| r.len()))
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool, SyncError> {
        let full = format!("refs/heads/{name}");
        Ok(self
            .exec(&["rev-parse", "--verify", "--quiet", &full])?
            .status
            .success())
    }

    /// Local branches whose name starts with `prefix`, sorted by name.
    pub fn list_branches(&self, prefix: &str) -> Result<Vec<(BranchName, CommitId)>, SyncError> {
        let out = self.read(&["for-each-ref", "--format=%(objectname) %(refname)", "refs/heads"])?;
        Ok(out
            .lines()
            .filter_map(|line| line.split_once(' '))
            .filter_map(|(sha, refname)| {
                let name = refname.strip_prefix("refs/heads/")?;
                name.starts_with(prefix)
                    .then(|| (BranchName::from(name), CommitId::from(sha)))
            })
            .collect())
    }

    /// Remote-tracking refs currently known for `remote`.
    pub fn remote_refs(&self, remote: &str) -> Result<RefSet, SyncError> {
        let pattern = format!("refs/remotes/{remote}");
        let out = self.read(&["for-each-ref", "--format=%(objectname) %(refname)", &pattern])?;
        let refs = out
            .lines()
            .filter_map(|line| line.split_once(' '))
            .filter_map(|(sha, refname)| {
                let name = refname.strip_prefix("refs/remotes/")?;
                (!name.ends_with("/HEAD")).then(|| (name.to_string(), CommitId::from(sha)))
            })
            .collect();
        Ok(RefSet {
            remote: remote.to_string(),
            refs,
        })
    }

    /// Best common ancestor of two revisions.
    pub fn merge_base(&self, local: &str, target: &str) -> Result<CommitId, SyncError> {
        let local_sha = self.resolve_ref(local)?;
        let target_sha = self.resolve_ref(target)?;
        let output = self.exec(&["merge-base", &local_sha.0, &target_sha.0])?;
        if output.status.success() {
            return Ok(CommitId(stdout_of(&output).trim().to_string()));
        }
        if output.status.code() == Some(1) {
            return Err(SyncError::NoCommonAncestor {
                local: local.to_string(),
                target: target.to_string(),
            });
        }
        Err(SyncError::Git {
            command: "merge-base".to_string(),
            message: stderr_of(&output),
        })
    }

    /// File-level changes between two revisions, with rename detection and
    /// per-file line counts. Binary files count zero lines.
    pub fn diff_stat(&self, from: &str, to: &str) -> Result<Vec<RawChange>, SyncError> {
        let status = self.read(&["diff", "--no-ext-diff", "--name-status", "-z", "-M", from, to])?;
        let numstat = self.read(&["diff", "--no-ext-diff", "--numstat", "-z", "-M", from, to])?;
        let counts = parse_numstat(&numstat);
        let mut changes = parse_name_status(&status);
        for change in &mut changes {
            if let Some((added, removed)) = counts.get(&change.path) {
                change.lines_added = *added;
                change.lines_removed = *removed;
            }
        }
        Ok(changes)
    }

    /// Commits reachable from `to` but not `from`, newest first.
    pub fn commit_log(&self, from: &str, to: &str) -> Result<Vec<CommitInfo>, SyncError> {
        let range = format!("{from}..{to}");
        let out = self.read(&["log", "--no-color", "--format=%H%x1f%s%x1f%b%x1e", &range])?;
        Ok(parse_log(&out))
    }

    /// Paths currently unmerged in the index.
    pub fn conflicted_paths(&self) -> Result<Vec<String>, SyncError> {
        let out = self.read(&["diff", "--name-only", "--diff-filter=U", "-z"])?;
        let mut paths: Vec<String> = out
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        paths.dedup();
        Ok(paths)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Fetch `remote` and return its refs. Authentication failures are told
    /// apart from network failures; a timeout is a network failure.
    pub fn fetch_remote(&self, remote: &str) -> Result<RefSet, SyncError> {
        if !self.has_remote(remote)? {
            return Err(SyncError::MissingRemote {
                remote: remote.to_string(),
            });
        }
        self.logged(&format!("fetch --prune {remote}"), || {
            let mut cmd = self.command(&["fetch", "--prune", remote]);
            cmd.env("GIT_TERMINAL_PROMPT", "0");
            let output = process::run(cmd, self.fetch_timeout).map_err(|e| SyncError::Git {
                command: "fetch".to_string(),
                message: format!("could not run git: {e}"),
            })?;
            if output.timed_out {
                return Err(SyncError::Network {
                    remote: remote.to_string(),
                    message: format!("timed out after {}", describe_limit(self.fetch_timeout)),
                });
            }
            if !output.success {
                return Err(classify_fetch_failure(remote, &output.stderr, output.exit_code));
            }
            Ok(())
        })?;
        self.remote_refs(remote)
    }

    /// Merge `target` into the current branch, always with a merge commit
    /// when `no_ff` is set. Returns the new HEAD. On conflicts the tree is
    /// left conflicted.
    pub fn merge_into(&self, target: &str, no_ff: bool, message: &str) -> Result<CommitId, SyncError> {
        let ff = if no_ff { "--no-ff" } else { "--ff" };
        self.logged(&format!("merge {ff} {target}"), || {
            let output = self.exec(&["merge", ff, "--no-edit", "-m", message, target])?;
            if output.status.success() {
                return self.head_sha();
            }
            let paths = self.conflicted_paths()?;
            if !paths.is_empty() {
                return Err(SyncError::Conflict {
                    operation: "merge",
                    paths,
                });
            }
            Err(SyncError::Git {
                command: "merge".to_string(),
                message: stderr_of(&output),
            })
        })
    }

    /// Replay the current branch onto `target`. Returns the new HEAD. On
    /// conflicts the rebase is left stopped.
    pub fn rebase_onto(&self, target: &str) -> Result<CommitId, SyncError> {
        self.logged(&format!("rebase {target}"), || {
            let output = self.exec(&["rebase", target])?;
            if output.status.success() {
                return self.head_sha();
            }
            let paths = self.conflicted_paths()?;
            if !paths.is_empty() || self.operation_in_progress()? == Some("rebase") {
                return Err(SyncError::Conflict {
                    operation: "rebase",
                    paths,
                });
            }
            Err(SyncError::Git {
                command: "rebase".to_string(),
                message: stderr_of(&output),
            })
        })
    }

    /// Attempt a merge of `target` without committing, collect the paths
    /// that would conflict, then abort. HEAD, index and tree end where they
    /// started.
    pub fn probe_merge(&self, target: &str) -> Result<Vec<String>, SyncError> {
        self.logged(&format!("probe merge {target}"), || {
            let output = self.exec(&["merge", "--no-commit", "--no-ff", target])?;
            let paths = self.conflicted_paths()?;
            if self.git_dir()?.join("MERGE_HEAD").exists() {
                self.read(&["merge", "--abort"])?;
            }
            if !output.status.success() && paths.is_empty() {
                return Err(SyncError::Git {
                    command: "merge --no-commit".to_string(),
                    message: stderr_of(&output),
                });
            }
            Ok(paths)
        })
    }

    pub fn abort_merge(&self) -> Result<(), SyncError> {
        self.logged("merge --abort", || self.read(&["merge", "--abort"]).map(|_| ()))
    }

    pub fn abort_rebase(&self) -> Result<(), SyncError> {
        self.logged("rebase --abort", || self.read(&["rebase", "--abort"]).map(|_| ()))
    }

    /// Create branch `name` at `at` without checking it out.
    pub fn create_branch(&self, name: &str, at: &CommitId) -> Result<BranchName, SyncError> {
        self.logged(&format!("branch {name} {}", at.short()), || {
            if self.branch_exists(name)? {
                return Err(SyncError::BranchExists {
                    name: name.to_string(),
                });
            }
            self.read(&["branch", name, &at.0])?;
            Ok(BranchName::from(name))
        })
    }

    /// Move the current branch, index and tree to `rev`.
    pub fn reset_hard(&self, rev: &str) -> Result<CommitId, SyncError> {
        self.logged(&format!("reset --hard {rev}"), || {
            self.read(&["reset", "--hard", "--quiet", rev])?;
            self.head_sha()
        })
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn command(&self, args: &[&str]) -> Command {
        git_command(&self.root, args)
    }

    fn exec(&self, args: &[&str]) -> Result<Output, SyncError> {
        git_output(&self.root, args)
    }

    /// Run and return stdout, failing on a non-zero exit.
    fn read(&self, args: &[&str]) -> Result<String, SyncError> {
        let output = self.exec(args)?;
        if !output.status.success() {
            return Err(SyncError::Git {
                command: args.join(" "),
                message: stderr_of(&output),
            });
        }
        Ok(stdout_of(&output))
    }

    fn logged<T>(
        &self,
        action: &str,
        op: impl FnOnce() -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        tracing::info!(repo = %self.root.display(), "git {action}");
        self.note(&format!("BEGIN git {action}"));
        let result = op();
        match &result {
            Ok(_) => self.note(&format!("OK git {action}")),
            Err(err) => {
                tracing::warn!(error = %err, "git {action} failed");
                self.note(&format!("FAIL git {action}: [{}] {err}", err.kind()));
            }
        }
        result
    }

    fn note(&self, message: &str) {
        if let Some(log) = &self.log {
            log.note(message);
        }
    }
}

fn git_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .env("GIT_EDITOR", "true");
    cmd
}

fn git_output(dir: &Path, args: &[&str]) -> Result<Output, SyncError> {
    git_command(dir, args).output().map_err(|e| SyncError::Git {
        command: args.join(" "),
        message: format!("could not run git: {e}"),
    })
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

fn classify_fetch_failure(remote: &str, stderr: &str, code: Option<i32>) -> SyncError {
    let lowered = stderr.to_lowercase();
    let message = match stderr.trim() {
        "" => format!("git fetch exited with {code:?}"),
        s => s.to_string(),
    };
    if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        SyncError::Auth {
            remote: remote.to_string(),
            message,
        }
    } else {
        SyncError::Network {
            remote: remote.to_string(),
            message,
        }
    }
}

/// Parse `git diff --name-status -z -M`.
fn parse_name_status(raw: &str) -> Vec<RawChange> {
    let mut tokens = raw.split('\0').filter(|t| !t.is_empty());
    let mut changes = Vec::new();
    while let Some(status) = tokens.next() {
        let code = status.chars().next().unwrap_or('M');
        let (kind, path, old_path) = match code {
            'R' | 'C' => {
                let (Some(old), Some(new)) = (tokens.next(), tokens.next()) else {
                    break;
                };
                if code == 'R' {
                    (ChangeKind::Renamed, new, Some(old.to_string()))
                } else {
                    (ChangeKind::Added, new, None)
                }
            }
            _ => {
                let Some(path) = tokens.next() else {
                    break;
                };
                let kind = match code {
                    'A' => ChangeKind::Added,
                    'D' => ChangeKind::Deleted,
                    _ => ChangeKind::Modified,
                };
                (kind, path, None)
            }
        };
        changes.push(RawChange {
            path: path.to_string(),
            old_path,
            kind,
            lines_added: 0,
            lines_removed: 0,
        });
    }
    changes
}

/// Parse `git diff --numstat -z -M` into `path -> (added, removed)`.
/// Renames are keyed by their new path.
fn parse_numstat(raw: &str) -> HashMap<String, (u64, u64)> {
    let mut tokens = raw.split('\0');
    let mut counts = HashMap::new();
    while let Some(token) = tokens.next() {
        if token.is_empty() {
            continue;
        }
        let mut fields = token.splitn(3, '\t');
        let added = fields.next().and_then(|n| n.parse().ok()).unwrap_or(0);
        let removed = fields.next().and_then(|n| n.parse().ok()).unwrap_or(0);
        let path = match fields.next() {
            Some(p) if !p.is_empty() => p,
            _ => {
                let _old = tokens.next();
                match tokens.next() {
                    Some(new) => new,
                    None => break,
                }
            }
        };
        counts.insert(path.to_string(), (added, removed));
    }
    counts
}

/// Parse `git log --format=%H%x1f%s%x1f%b%x1e`.
fn parse_log(raw: &str) -> Vec<CommitInfo> {
    raw.split('\x1e')
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            if record.trim().is_empty() {
                return None;
            }
            let mut fields = record.splitn(3, '\x1f');
            let sha = fields.next()?.trim();
            Some(CommitInfo {
                sha: CommitId::from(sha),
                subject: fields.next().unwrap_or("").trim().to_string(),
                body: fields.next().unwrap_or("").trim().to_string(),
            })
        })
        .collect()
}

/// `Ns` for whole seconds, `Nms` below that.
fn describe_limit(limit: Option<Duration>) -> String {
    match limit {
        Some(d) if d.subsec_millis() == 0 => format!("{}s", d.as_secs()),
        Some(d) => format!("{}ms", d.as_millis()),
        None => "no limit".to_string(),
    }
}
