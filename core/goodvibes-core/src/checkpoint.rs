//! Automatic checkpoint commits.
//!
//! ## State Machine
//!
//! ```text
//! below-threshold ──(count >= fileThreshold or forced)──▶ triggered
//! triggered ──(clean tree)──────────▶ below-threshold   "No changes to checkpoint"
//! triggered ──(add + commit ok)─────▶ below-threshold   tracking cleared, record prepended
//! triggered ──(git step fails)──────▶ triggered         no mutation, "Checkpoint failed"
//! ```
//!
//! The untriggered path spawns nothing.

use chrono::Utc;

use crate::config::CheckpointConfig;
use crate::git::Git;
use crate::state::{CheckpointRecord, SessionState};
use crate::tracker;

pub const MESSAGE_PREFIX: &str = "checkpoint: ";

const MAX_REASON_CHARS: usize = 200;
const SHELL_METACHARACTERS: &[char] = &[
    '`', '$', '\\', '"', '\'', '|', '&', '<', '>', '{', '}', '(', ')', '!', '#', '*', '?', '~', ';',
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointDecision {
    pub triggered: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub created: bool,
    pub message: String,
}

impl CheckpointOutcome {
    fn skipped(message: impl Into<String>) -> Self {
        Self {
            created: false,
            message: message.into(),
        }
    }
}

pub fn evaluate(state: &SessionState, config: &CheckpointConfig) -> CheckpointDecision {
    let count = tracker::count(state);
    CheckpointDecision {
        triggered: count >= config.file_threshold,
        reason: format!("{count} files modified"),
    }
}

/// Removes shell metacharacters and collapses whitespace.
pub fn sanitize_message(message: &str) -> String {
    let stripped: String = message
        .chars()
        .filter(|c| !SHELL_METACHARACTERS.contains(c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_REASON_CHARS).collect()
}

pub fn maybe_checkpoint(
    state: &mut SessionState,
    forced_reason: Option<&str>,
    git: &Git<'_>,
    config: &CheckpointConfig,
) -> CheckpointOutcome {
    let decision = evaluate(state, config);
    let reason = match forced_reason {
        Some(reason) => reason.to_string(),
        None if decision.triggered => decision.reason,
        None => return CheckpointOutcome::skipped(""),
    };

    match git.uncommitted_changes() {
        Some(true) => {}
        Some(false) => {
            tracing::debug!(%reason, "Checkpoint skipped: clean working tree");
            return CheckpointOutcome::skipped("No changes to checkpoint");
        }
        None => {
            tracing::warn!(%reason, "Checkpoint skipped: git status failed");
            return CheckpointOutcome::skipped("Checkpoint failed");
        }
    }

    let message = format!("{MESSAGE_PREFIX}{}", sanitize_message(&reason));

    let staged = git.stage_all();
    if !staged.success() {
        tracing::warn!(stderr = %staged.stderr.trim(), "Checkpoint staging failed");
        return CheckpointOutcome::skipped("Checkpoint failed");
    }

    let committed = git.commit(&message);
    if !committed.success() {
        tracing::warn!(stderr = %committed.stderr.trim(), "Checkpoint commit failed");
        return CheckpointOutcome::skipped("Checkpoint failed");
    }

    let hash = git
        .head_short_hash()
        .unwrap_or_else(|| "unknown".to_string());
    tracker::clear_checkpoint_tracking(state);
    state.git.checkpoints.insert(
        0,
        CheckpointRecord {
            hash: hash.clone(),
            message: message.clone(),
            timestamp: Utc::now(),
        },
    );
    state.git.checkpoints.truncate(config.max_history.max(1));

    tracing::info!(%hash, %message, "Checkpoint created");
    CheckpointOutcome {
        created: true,
        message: format!("Created {message} ({hash})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExecResult;
    use crate::testing::ScriptedExecutor;
    use std::time::Duration;

    fn state_with(count: usize) -> SessionState {
        let mut state = SessionState::default();
        for i in 0..count {
            tracker::track_modification(&mut state, &format!("src/f{i}.ts"));
        }
        state
    }

    fn git(executor: &ScriptedExecutor) -> Git<'_> {
        Git::new(executor, "/repo", Duration::from_secs(5))
    }

    #[test]
    fn test_threshold_is_exact() {
        let config = CheckpointConfig::default();
        assert!(!evaluate(&state_with(4), &config).triggered);

        let decision = evaluate(&state_with(5), &config);
        assert!(decision.triggered);
        assert_eq!(decision.reason, "5 files modified");
    }

    #[test]
    fn test_untriggered_spawns_nothing() {
        let executor = ScriptedExecutor::new();
        let mut state = state_with(2);
        let outcome =
            maybe_checkpoint(&mut state, None, &git(&executor), &CheckpointConfig::default());
        assert!(!outcome.created);
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn test_clean_tree_short_circuits() {
        let executor = ScriptedExecutor::new();
        executor.respond(&["status"], ExecResult::ok(""));
        let mut state = state_with(5);

        let outcome =
            maybe_checkpoint(&mut state, None, &git(&executor), &CheckpointConfig::default());
        assert_eq!(
            outcome,
            CheckpointOutcome {
                created: false,
                message: "No changes to checkpoint".into()
            }
        );
        assert_eq!(executor.count_matching(&["add"]), 0);
        assert_eq!(executor.count_matching(&["commit"]), 0);
        assert_eq!(tracker::count(&state), 5);
    }

    #[test]
    fn test_commit_failure_leaves_state_untouched() {
        let executor = ScriptedExecutor::new();
        executor.respond(&["status"], ExecResult::ok(" M src/f0.ts\n"));
        executor.respond(&["commit"], ExecResult::failed(1, "hook rejected"));
        let mut state = state_with(5);
        let before = state.clone();

        let outcome =
            maybe_checkpoint(&mut state, None, &git(&executor), &CheckpointConfig::default());
        assert_eq!(outcome.message, "Checkpoint failed");
        assert_eq!(state, before);
    }

    #[test]
    fn test_failed_status_is_not_a_clean_tree() {
        let executor = ScriptedExecutor::new();
        executor.respond(&["status"], ExecResult::failed(128, "fatal: not a git repository"));
        let mut state = state_with(5);

        let outcome =
            maybe_checkpoint(&mut state, None, &git(&executor), &CheckpointConfig::default());
        assert_eq!(outcome.message, "Checkpoint failed");
        assert!(!outcome.created);
        assert_eq!(executor.count_matching(&["add"]), 0);
        assert_eq!(tracker::count(&state), 5);
    }

    #[test]
    fn test_stage_failure_skips_commit() {
        let executor = ScriptedExecutor::new();
        executor.respond(&["status"], ExecResult::ok("?? new.ts\n"));
        executor.respond(&["add"], ExecResult::failed(128, "index.lock exists"));
        let mut state = state_with(5);

        let outcome =
            maybe_checkpoint(&mut state, None, &git(&executor), &CheckpointConfig::default());
        assert!(!outcome.created);
        assert_eq!(executor.count_matching(&["commit"]), 0);
    }

    #[test]
    fn test_forced_reason_is_sanitized_and_passed_as_single_argument() {
        let executor = ScriptedExecutor::new();
        executor.respond(&["status"], ExecResult::ok(" M a.ts\n"));
        executor.respond(&["rev-parse"], ExecResult::ok("abc1234\n"));
        let mut state = state_with(1);

        let outcome = maybe_checkpoint(
            &mut state,
            Some("pre-compact $(rm -rf ~) `id` && echo"),
            &git(&executor),
            &CheckpointConfig::default(),
        );
        assert!(outcome.created);

        let commit = executor
            .calls()
            .into_iter()
            .find(|call| call.first().map(String::as_str) == Some("commit"))
            .unwrap();
        assert_eq!(commit.len(), 3);
        assert_eq!(commit[2], "checkpoint: pre-compact rm -rf id echo");
        assert_eq!(state.git.checkpoints[0].hash, "abc1234");
    }

    #[test]
    fn test_history_is_capped_newest_first() {
        let executor = ScriptedExecutor::new();
        executor.respond(&["status"], ExecResult::ok(" M a.ts\n"));
        executor.respond(&["rev-parse"], ExecResult::ok("fff0000\n"));
        let config = CheckpointConfig {
            max_history: 2,
            ..CheckpointConfig::default()
        };
        let mut state = SessionState::default();
        for _ in 0..3 {
            maybe_checkpoint(&mut state, Some("manual"), &git(&executor), &config);
        }
        assert_eq!(state.git.checkpoints.len(), 2);
        assert!(state.git.checkpoints[0].timestamp >= state.git.checkpoints[1].timestamp);
    }

    #[test]
    fn test_sanitize_message_strips_metacharacters() {
        assert_eq!(
            sanitize_message("a`b$c\\d\"e'f|g&h<i>j{k}l(m)n!o#p*q?r~s;t"),
            "abcdefghijklmnopqrst"
        );
        assert_eq!(sanitize_message("  two\n\nlines  "), "two lines");
    }
}
