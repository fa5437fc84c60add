//! Throwaway upstream/fork repository pairs driven by the `git` CLI.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;
use upsync_core::SyncConfig;

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(path, content).expect("write file");
}

pub fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

fn configure(dir: &Path) {
    git(dir, &["config", "user.name", "test-user"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    configure(dir);
}

/// An upstream repository and a fork cloned from it, with the clone's
/// remote renamed to `upstream`.
pub struct Fixture {
    pub upstream: TempDir,
    pub fork: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let upstream = TempDir::new().expect("upstream dir");
        init_repo(upstream.path());
        write(upstream.path(), "README.md", "# project\n");
        write(upstream.path(), "docs/x.md", "line one\nline two\n");
        write(
            upstream.path(),
            "templates/plan-template.md",
            "# Plan\n\n## Summary\n",
        );
        write(
            upstream.path(),
            "templates/spec-template.md",
            "# Spec\n\n## Goals\n",
        );
        write(upstream.path(), "scripts/bash/setup.sh", "#!/bin/sh\necho setup\n");
        write(upstream.path(), "src/cli.py", "print('hello')\n");
        commit_all(upstream.path(), "initial");

        let fork = TempDir::new().expect("fork dir");
        let source = upstream.path().to_string_lossy().to_string();
        let target = fork.path().to_string_lossy().to_string();
        git(upstream.path(), &["clone", "-q", &source, &target]);
        git(fork.path(), &["remote", "rename", "origin", "upstream"]);
        configure(fork.path());

        Self { upstream, fork }
    }

    pub fn fork_path(&self) -> &Path {
        self.fork.path()
    }

    /// Commit `files` upstream; an empty content deletes the path.
    pub fn upstream_commit(&self, files: &[(&str, &str)], message: &str) -> String {
        apply(self.upstream.path(), files);
        commit_all(self.upstream.path(), message)
    }

    pub fn fork_commit(&self, files: &[(&str, &str)], message: &str) -> String {
        apply(self.fork.path(), files);
        commit_all(self.fork.path(), message)
    }

    pub fn fetch(&self) {
        git(self.fork.path(), &["fetch", "-q", "upstream"]);
    }

    pub fn head(&self) -> String {
        git(self.fork.path(), &["rev-parse", "HEAD"])
    }

    pub fn branches(&self) -> Vec<String> {
        git(
            self.fork.path(),
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )
        .lines()
        .map(str::to_string)
        .collect()
    }

    pub fn status(&self) -> String {
        git(self.fork.path(), &["status", "--porcelain"])
    }
}

fn apply(dir: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        if content.is_empty() {
            std::fs::remove_file(dir.join(rel)).expect("remove file");
        } else {
            write(dir, rel, content);
        }
    }
}

/// Defaults with no post-sync checks.
pub fn config() -> SyncConfig {
    SyncConfig {
        checks: Vec::new(),
        ..SyncConfig::default()
    }
}
