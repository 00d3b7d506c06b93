//! Error fix-loop engine.
//!
//! Recurring failures are deduplicated by a content signature and walked up
//! an escalation ladder instead of being retried blindly:
//!
//! ```text
//! Initial ──(phaseAttempts >= threshold)──▶ Alternative ──(phaseAttempts >= threshold)──▶ AskHuman
//! ```
//!
//! `AskHuman` is terminal. Independently of phase, once total attempts pass
//! `maxAttempts` the failure is reported as exhausted and surfaced verbatim.
//!
//! Classification and normalization are ordered rule tables so they can be
//! tested without any process execution.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::FixLoopConfig;
use crate::state::{ErrorCategory, ErrorState, FixPhase, SessionState};

/// Characters of the error message echoed back in the fix context.
pub const PREVIEW_CHARS: usize = 500;

/// Entries untouched for this long are dropped at session start.
pub const STALE_AFTER_HOURS: i64 = 24;

const DIGEST_HEX_CHARS: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered: the first rule with a matching keyword wins.
const CATEGORY_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::DependencyInstall,
        &[
            "cannot find module",
            "module not found",
            "modulenotfounderror",
            "no module named",
            "could not resolve dependency",
            "eresolve",
            "npm err",
            "err_pnpm",
            "no matching version",
            "package not found",
            "unresolved import",
            "failed to select a version",
        ],
    ),
    (
        ErrorCategory::TypeError,
        &[
            "error ts",
            "type error",
            "is not assignable to",
            "does not exist on type",
            "cannot find name",
            "mismatched types",
            "type mismatch",
            "expected type",
            "incompatible types",
        ],
    ),
    (
        ErrorCategory::TestFailure,
        &[
            "test failed",
            "tests failed",
            "test suite failed",
            "assertionerror",
            "assertion failed",
            "expected:",
            "failing test",
            "fail ",
        ],
    ),
    (
        ErrorCategory::LintFailure,
        &[
            "eslint",
            "stylelint",
            "prettier",
            "clippy",
            "ruff",
            "lint error",
            "linting",
        ],
    ),
    (
        ErrorCategory::RuntimeException,
        &[
            "exception",
            "traceback",
            "panicked at",
            "typeerror:",
            "referenceerror",
            "rangeerror",
            "uncaught",
            "unhandled",
            "segmentation fault",
            "timed out",
            "timeout",
            "connection refused",
            "connection reset",
            "econnrefused",
            "out of memory",
            "permission denied",
            "no such file",
            "enoent",
        ],
    ),
];

/// Case-insensitive keyword classification; `Unknown` when nothing matches.
pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

// ─────────────────────────────────────────────────────────────────────────────
// Normalization
// ─────────────────────────────────────────────────────────────────────────────

fn rule(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid normalization regex")
}

/// Volatile substrings, applied in order.
static NORMALIZATION_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        // ISO-8601: 2024-01-15T10:30:00.123Z
        (
            rule(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?"),
            "",
        ),
        // Common log: 15/Jan/2024:10:30:00
        (rule(r"\d{2}/\w{3}/\d{4}:\d{2}:\d{2}:\d{2}"), ""),
        // Syslog: Jan 15 10:30:00
        (rule(r"\b[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}"), ""),
        // Bare clock: 10:30:00.123
        (rule(r"\b\d{1,2}:\d{2}:\d{2}(?:\.\d+)?\b"), ""),
        // Absolute paths keep only their final component.
        (
            rule(r#"(?P<lead>^|[\s'"(\[=])(?:[A-Za-z]:\\|/)(?:[^\s/\\'"():]+[/\\])+"#),
            "${lead}",
        ),
        // (12,5)
        (rule(r"\(\d+,\s*\d+\)"), ""),
        // :12:5 and :12
        (rule(r":\d+(?::\d+)?\b"), ""),
        // line 12, column 5
        (rule(r"(?i)\bline\s+\d+(?:,\s*col(?:umn)?\s+\d+)?"), "line"),
        (rule(r"\b0x[0-9a-fA-F]+\b"), "addr"),
        (rule(r"\b\d+\b"), "N"),
    ]
});

/// Strips timestamps, absolute paths, positions, and addresses; lowercases.
pub fn normalize_message(message: &str) -> String {
    let mut text = message.to_string();
    for (pattern, replacement) in NORMALIZATION_RULES.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `"<category>:<digest>"`, stable across processes for the same failure.
pub fn signature(category: ErrorCategory, message: &str) -> String {
    let digest = format!("{:x}", md5::compute(normalize_message(message)));
    format!("{}:{}", category.as_str(), &digest[..DIGEST_HEX_CHARS])
}

// ─────────────────────────────────────────────────────────────────────────────
// Ladder
// ─────────────────────────────────────────────────────────────────────────────

pub fn get_or_create<'s>(
    state: &'s mut SessionState,
    signature: &str,
    category: ErrorCategory,
) -> &'s mut ErrorState {
    state.errors.entry(signature.to_string()).or_insert_with(|| {
        let now = Utc::now();
        tracing::debug!(signature, category = category.as_str(), "New error signature");
        ErrorState {
            signature: signature.to_string(),
            category,
            phase: FixPhase::Initial,
            attempts: 0,
            phase_attempts: 0,
            first_seen_at: now,
            last_attempt_at: now,
            history: Vec::new(),
        }
    })
}

pub fn record_attempt(error: &mut ErrorState, fix_description: &str) {
    error.attempts += 1;
    error.phase_attempts += 1;
    error.history.push(fix_description.to_string());
    error.last_attempt_at = Utc::now();
}

pub fn should_escalate(error: &ErrorState, threshold_per_phase: u32) -> bool {
    error.phase_attempts >= threshold_per_phase
}

/// Moves one rung up the ladder. Never moves backward; a no-op at `AskHuman`.
pub fn escalate(error: &mut ErrorState) -> FixPhase {
    let next = match error.phase {
        FixPhase::Initial => FixPhase::Alternative,
        FixPhase::Alternative | FixPhase::AskHuman => FixPhase::AskHuman,
    };
    if next != error.phase {
        tracing::info!(
            signature = %error.signature,
            from = ?error.phase,
            to = ?next,
            "Escalating fix phase"
        );
        error.phase = next;
        error.phase_attempts = 0;
    }
    error.phase
}

pub fn has_exhausted_retries(error: &ErrorState, max_attempts: u32) -> bool {
    error.attempts > max_attempts
}

fn phase_directive(phase: FixPhase) -> &'static str {
    match phase {
        FixPhase::Initial => {
            "Fix the error directly. Retrying the same approach with corrections is fine."
        }
        FixPhase::Alternative => {
            "The current approach keeps failing. Try a fundamentally different approach."
        }
        FixPhase::AskHuman => {
            "Stop retrying. Explain the failure to the user and ask how to proceed."
        }
    }
}

fn phase_label(phase: FixPhase) -> &'static str {
    match phase {
        FixPhase::Initial => "initial",
        FixPhase::Alternative => "alternative",
        FixPhase::AskHuman => "ask_human",
    }
}

/// Prompt fragment for the agent fixing this failure.
pub fn build_context(error: &ErrorState, message: &str) -> String {
    let mut preview: String = message.trim().chars().take(PREVIEW_CHARS).collect();
    if message.trim().chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }

    let mut out = format!(
        "Recurring {} error (phase: {})\n{}\nAttempts: {} total, {} in this phase\n\nError:\n{}\n",
        error.category.as_str(),
        phase_label(error.phase),
        phase_directive(error.phase),
        error.attempts,
        error.phase_attempts,
        preview,
    );

    let tried: Vec<&String> = error.history.iter().filter(|h| !h.trim().is_empty()).collect();
    if !tried.is_empty() {
        out.push_str("\nPreviously attempted fixes (do not repeat):\n");
        for (i, attempt) in tried.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, attempt));
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Housekeeping
// ─────────────────────────────────────────────────────────────────────────────

/// Drops entries whose last attempt is older than `max_age`.
pub fn prune_stale(state: &mut SessionState, max_age: Duration) -> usize {
    prune_stale_at(state, Utc::now(), max_age)
}

fn prune_stale_at(state: &mut SessionState, now: DateTime<Utc>, max_age: Duration) -> usize {
    let before = state.errors.len();
    state
        .errors
        .retain(|_, error| now.signed_duration_since(error.last_attempt_at) <= max_age);
    let pruned = before - state.errors.len();
    if pruned > 0 {
        tracing::debug!(pruned, "Pruned stale error entries");
    }
    pruned
}

pub fn resolve(state: &mut SessionState, signature: &str) -> bool {
    state.errors.remove(signature).is_some()
}

/// Clears every entry of a category once its failure stops recurring.
pub fn resolve_category(state: &mut SessionState, category: ErrorCategory) -> usize {
    let before = state.errors.len();
    state.errors.retain(|_, error| error.category != category);
    before - state.errors.len()
}

// ─────────────────────────────────────────────────────────────────────────────
// Observe
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FixLoopReport {
    pub signature: String,
    pub category: ErrorCategory,
    pub phase: FixPhase,
    pub attempts: u32,
    pub exhausted: bool,
    pub context: String,
}

/// Records one occurrence of a failure and advances its ladder.
pub struct FixLoop<'a> {
    config: &'a FixLoopConfig,
}

impl<'a> FixLoop<'a> {
    pub fn new(config: &'a FixLoopConfig) -> Self {
        Self { config }
    }

    pub fn observe(
        &self,
        state: &mut SessionState,
        message: &str,
        fix_description: &str,
    ) -> FixLoopReport {
        let category = categorize(message);
        let signature = signature(category, message);
        let error = get_or_create(state, &signature, category);

        record_attempt(error, fix_description);
        if should_escalate(error, self.config.threshold_per_phase) {
            escalate(error);
        }
        let exhausted = has_exhausted_retries(error, self.config.max_attempts);
        if exhausted {
            tracing::warn!(%signature, attempts = error.attempts, "Fix retries exhausted");
        }

        FixLoopReport {
            signature,
            category,
            phase: error.phase,
            attempts: error.attempts,
            exhausted,
            context: build_context(error, message),
        }
    }
}
