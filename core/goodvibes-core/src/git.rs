//! Git adapter for checkpoint and branch automation.
//!
//! A thin, explicit wrapper over `git` subprocess calls made through a
//! [`CommandExecutor`]. Every call passes an argument array, so commit
//! messages and branch names never reach a shell.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::process::{CommandExecutor, ExecResult};

/// Wrapper for executing git commands in a working directory.
pub struct Git<'a> {
    executor: &'a dyn CommandExecutor,
    workdir: PathBuf,
    timeout: Duration,
}

impl<'a> Git<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn run(&self, args: &[&str]) -> ExecResult {
        let result = self.executor.exec("git", args, &self.workdir, self.timeout);
        if !result.success() {
            debug!(
                ?args,
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "git command failed"
            );
        }
        result
    }

    /// Whether `git status --porcelain` reports anything, including untracked files.
    /// `None` when the status call itself fails (not a repository, timeout).
    #[instrument(skip_all)]
    pub fn uncommitted_changes(&self) -> Option<bool> {
        let result = self.run(&["status", "--porcelain"]);
        result.success().then(|| !result.stdout.trim().is_empty())
    }

    pub fn stage_all(&self) -> ExecResult {
        self.run(&["add", "-A"])
    }

    pub fn commit(&self, message: &str) -> ExecResult {
        self.run(&["commit", "-m", message])
    }

    /// Short hash of HEAD, if resolvable.
    pub fn head_short_hash(&self) -> Option<String> {
        let result = self.run(&["rev-parse", "--short", "HEAD"]);
        let hash = result.stdout.trim();
        (result.success() && !hash.is_empty()).then(|| hash.to_string())
    }

    /// Current branch name; `None` on detached HEAD or failure.
    pub fn current_branch(&self) -> Option<String> {
        let result = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]);
        let name = result.stdout.trim();
        if !result.success() || name.is_empty() || name == "HEAD" {
            return None;
        }
        Some(name.to_string())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        let reference = format!("refs/heads/{name}");
        self.run(&["rev-parse", "--verify", "--quiet", &reference])
            .success()
    }

    pub fn checkout_new_branch(&self, name: &str) -> ExecResult {
        self.run(&["checkout", "-b", name])
    }

    pub fn checkout(&self, name: &str) -> ExecResult {
        self.run(&["checkout", name])
    }

    pub fn merge_no_ff(&self, branch: &str, message: &str) -> ExecResult {
        self.run(&["merge", "--no-ff", branch, "-m", message])
    }

    pub fn merge_abort(&self) -> ExecResult {
        self.run(&["merge", "--abort"])
    }

    /// Non-force delete: refuses to delete an unmerged branch.
    pub fn delete_branch(&self, name: &str) -> ExecResult {
        self.run(&["branch", "-d", name])
    }
}
