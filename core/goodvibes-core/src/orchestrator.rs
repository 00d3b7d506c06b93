//! Automation orchestrator.
//!
//! The policy layer invoked once per hook event. For a modified file it runs,
//! strictly in this order:
//!
//! ```text
//! tracker → related tests → build check → checkpoint → feature branch
//! ```
//!
//! Later steps read the results of earlier ones through `SessionState`, so
//! the order is fixed. Each step after the tracker is gated by its config
//! flag; a disabled step does not run at all. A failing step appends a
//! message to the [`AutomationReport`] and the remaining steps still run.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::branch;
use crate::checkpoint;
use crate::checks::{self, CheckReport, CheckRunner};
use crate::config::AutomationConfig;
use crate::fixloop::{self, FixLoop};
use crate::git::Git;
use crate::guard::{self, GuardVerdict};
use crate::hook::{HookInput, HookResponse};
use crate::process::CommandExecutor;
use crate::state::{BuildStatus, ErrorCategory, PendingFix, SessionState};
use crate::tracker;

/// Build errors fed to the fix loop per run.
const MAX_BUILD_ERRORS_OBSERVED: usize = 5;

/// Messages and agent context gathered while handling one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutomationReport {
    /// Shown to the user (`systemMessage`).
    pub messages: Vec<String>,
    /// Injected into the agent's context (`additionalContext`).
    pub context: Vec<String>,
}

impl AutomationReport {
    pub fn message(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !message.is_empty() {
            self.messages.push(message);
        }
    }

    pub fn context(&mut self, context: impl Into<String>) {
        let context = context.into();
        if !context.is_empty() {
            self.context.push(context);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.context.is_empty()
    }

    pub fn into_response(self) -> HookResponse {
        HookResponse::proceed()
            .with_system_message(self.messages.join("\n"))
            .with_context(self.context.join("\n\n"))
    }
}

pub struct Orchestrator<'a> {
    config: &'a AutomationConfig,
    executor: &'a dyn CommandExecutor,
    checks: &'a dyn CheckRunner,
    root: PathBuf,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a AutomationConfig,
        executor: &'a dyn CommandExecutor,
        checks: &'a dyn CheckRunner,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            executor,
            checks,
            root: root.into(),
        }
    }

    fn git(&self) -> Git<'a> {
        Git::new(self.executor, self.root.clone(), self.config.git_timeout())
    }

    // ─────────────────────────────────────────────────────────────────────
    // PostToolUse
    // ─────────────────────────────────────────────────────────────────────

    pub fn on_file_modified(
        &self,
        state: &mut SessionState,
        path: &str,
        created: bool,
    ) -> AutomationReport {
        let mut report = AutomationReport::default();

        if created {
            tracker::track_creation(state, path);
        } else {
            tracker::track_modification(state, path);
        }

        if self.config.tests.enabled && !checks::is_test_file(&self.root, path) {
            self.run_related_tests(state, path, &mut report);
        }

        let build_due = tracker::session_count(state) >= self.config.build.file_threshold;
        if self.config.build.enabled && build_due {
            self.run_build(state, path, &mut report);
        }

        let git = self.git();
        if self.config.checkpoints.enabled {
            let outcome = checkpoint::maybe_checkpoint(state, None, &git, &self.config.checkpoints);
            report.message(outcome.message);
        }

        if self.config.branches.enabled {
            let outcome = branch::maybe_create_feature_branch(state, None, &git);
            report.message(outcome.message);
        }

        report
    }

    fn run_related_tests(
        &self,
        state: &mut SessionState,
        path: &str,
        report: &mut AutomationReport,
    ) {
        let related = checks::find_related_tests(&self.root, path);
        if related.is_empty() {
            tracing::debug!(path, "No related tests");
            return;
        }

        let result = self.checks.run_tests(&self.root, &related);
        state.tests.last_quick_run = Some(Utc::now());
        apply_test_report(state, &related, &result);

        if result.passed {
            fixloop::resolve_category(state, ErrorCategory::TestFailure);
            tracing::debug!(path, tests = related.len(), "Related tests passed");
        } else {
            let failing: Vec<&str> = state.tests.failing_files.iter().collect();
            tracing::info!(path, failing = ?failing, "Related tests failing");
            report.message(format!("Tests failing: {}", failing.join(", ")));
            report.context(format!("Tests failing after editing {path}:\n{}", result.summary));
        }
    }

    fn run_build(&self, state: &mut SessionState, path: &str, report: &mut AutomationReport) {
        let result = self.checks.run_build(&self.root);
        state.build.last_run = Some(Utc::now());

        if result.passed {
            state.build.status = BuildStatus::Passing;
            state.build.errors.clear();
            state.build.fix_attempts = 0;
            fixloop::resolve_category(state, ErrorCategory::TypeError);
            return;
        }

        state.build.status = BuildStatus::Failing;
        state.build.errors = result.errors.clone();
        state.build.fix_attempts += 1;
        tracing::info!(errors = result.errors.len(), "Build failing");

        let fix_loop = FixLoop::new(&self.config.fix_loop);
        let description = format!("edit {path}");
        let messages: Vec<String> = if result.errors.is_empty() {
            vec![result.summary.clone()]
        } else {
            result
                .errors
                .iter()
                .take(MAX_BUILD_ERRORS_OBSERVED)
                .map(|d| format!("{}:{}: {}", d.file, d.line, d.message))
                .collect()
        };

        // One attempt per distinct failure per invocation, however many sites report it.
        let mut seen = HashSet::new();
        let mut first_context = None;
        for message in &messages {
            if !seen.insert(fixloop::signature(fixloop::categorize(message), message)) {
                continue;
            }
            let observed = fix_loop.observe(state, message, &description);
            if observed.exhausted {
                report.message(format!(
                    "Build error persisted after {} attempts; stopping automatic retries",
                    observed.attempts
                ));
            }
            first_context.get_or_insert(observed.context);
        }

        report.message(format!(
            "Build failing ({} error{})",
            result.errors.len(),
            if result.errors.len() == 1 { "" } else { "s" }
        ));
        if let Some(context) = first_context {
            report.context(context);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // PreToolUse
    // ─────────────────────────────────────────────────────────────────────

    pub fn check_command(&self, state: &SessionState, command: &str) -> GuardVerdict {
        if !self.config.guard.enabled {
            return GuardVerdict::Allow;
        }
        let verdict =
            guard::evaluate_command(command, &state.git.current_branch, &state.git.main_branch);
        if let Some(reason) = verdict.reason() {
            tracing::info!(command, reason, deny = verdict.is_deny(), "Guard verdict");
        }
        verdict
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle events
    // ─────────────────────────────────────────────────────────────────────

    pub fn on_session_start(
        &self,
        state: &mut SessionState,
        input: &HookInput,
    ) -> AutomationReport {
        let mut report = AutomationReport::default();

        state.session.id = input
            .session_id
            .clone()
            .unwrap_or_else(|| ulid::Ulid::new().to_string());
        state.session.started_at = Utc::now();
        state.session.mode = input
            .permission_mode
            .clone()
            .unwrap_or_else(|| "default".to_string());
        state.session.feature_description = None;
        tracker::reset_session(state);

        branch::sync_branch(state, &self.git());
        fixloop::prune_stale(state, Duration::hours(fixloop::STALE_AFTER_HOURS));

        report.context(session_summary(state));
        report
    }

    /// Names the session's feature after its first prompt.
    /// Returns whether the state changed.
    pub fn on_user_prompt(&self, state: &mut SessionState, prompt: &str) -> bool {
        if !self.config.branches.enabled || state.session.feature_description.is_some() {
            return false;
        }
        branch::set_feature_description(state, prompt)
    }

    pub fn on_tool_failure(
        &self,
        state: &mut SessionState,
        tool_name: &str,
        message: &str,
        fix_description: &str,
    ) -> AutomationReport {
        let mut report = AutomationReport::default();
        let observed = FixLoop::new(&self.config.fix_loop).observe(state, message, fix_description);
        tracing::info!(
            tool = tool_name,
            signature = %observed.signature,
            attempts = observed.attempts,
            phase = ?observed.phase,
            "Tool failure observed"
        );

        if observed.exhausted {
            let first_line = message.lines().next().unwrap_or_default();
            report.message(format!(
                "{tool_name} keeps failing after {} attempts; stopping automatic retries: {first_line}",
                observed.attempts
            ));
        }
        report.context(observed.context);
        report
    }

    pub fn on_pre_compact(&self, state: &mut SessionState) -> AutomationReport {
        let mut report = AutomationReport::default();
        if self.config.checkpoints.enabled && self.config.checkpoints.on_compact {
            let outcome = checkpoint::maybe_checkpoint(
                state,
                Some("pre-compact"),
                &self.git(),
                &self.config.checkpoints,
            );
            report.message(outcome.message);
        }
        report
    }

    pub fn on_stop(&self, state: &mut SessionState) -> AutomationReport {
        let mut report = AutomationReport::default();
        let git = self.git();

        let branches = &self.config.branches;
        if branches.enabled && branches.auto_merge && branch::should_merge_feature(state) {
            let outcome = branch::maybe_merge_feature(state, &git);
            report.message(outcome.message);
            return report;
        }

        let checkpoints = &self.config.checkpoints;
        if checkpoints.enabled && checkpoints.on_stop && tracker::count(state) > 0 {
            let outcome =
                checkpoint::maybe_checkpoint(state, Some("session stop"), &git, checkpoints);
            report.message(outcome.message);
        }
        report
    }
}

/// Moves tested files between passing and failing and replaces pending fixes.
fn apply_test_report(state: &mut SessionState, tested: &[String], result: &CheckReport) {
    if result.passed {
        for file in tested {
            state.tests.mark_passing(file);
        }
        state.tests.pending_fixes.clear();
        return;
    }

    let attributed: Vec<&str> = tested
        .iter()
        .map(String::as_str)
        .filter(|file| {
            result
                .errors
                .iter()
                .any(|d| d.file.ends_with(*file) || file.ends_with(&d.file))
        })
        .collect();

    for file in tested {
        // Failures we cannot attribute mark the whole batch failing.
        if attributed.is_empty() || attributed.contains(&file.as_str()) {
            state.tests.mark_failing(file);
        } else {
            state.tests.mark_passing(file);
        }
    }

    let previous = std::mem::take(&mut state.tests.pending_fixes);
    state.tests.pending_fixes = result
        .errors
        .iter()
        .map(|d| {
            let prior = previous
                .iter()
                .find(|p| p.test_file == d.file)
                .map_or(0, |p| p.fix_attempts + 1);
            PendingFix {
                test_file: d.file.clone(),
                error: d.message.clone(),
                fix_attempts: prior,
            }
        })
        .collect();
    if state.tests.pending_fixes.is_empty() {
        state.tests.pending_fixes = tested
            .iter()
            .map(|file| PendingFix {
                test_file: file.clone(),
                error: result.summary.clone(),
                fix_attempts: 0,
            })
            .collect();
    }
}

fn session_summary(state: &SessionState) -> String {
    let mut lines = Vec::new();

    match &state.git.feature_branch {
        Some(feature) => lines.push(format!(
            "Branch: {feature} (feature, merges into {})",
            state.git.main_branch
        )),
        None => lines.push(format!("Branch: {}", state.git.current_branch)),
    }
    if let Some(last) = state.git.checkpoints.first() {
        lines.push(format!("Last checkpoint: {} ({})", last.message, last.hash));
    }
    let pending = tracker::count(state);
    if pending > 0 {
        lines.push(format!("Files modified since last checkpoint: {pending}"));
    }
    if state.build.status == BuildStatus::Failing {
        lines.push(format!("Build: failing ({} errors)", state.build.errors.len()));
    }
    if !state.tests.failing_files.is_empty() {
        let failing: Vec<&str> = state.tests.failing_files.iter().collect();
        lines.push(format!("Failing tests: {}", failing.join(", ")));
    }
    if !state.errors.is_empty() {
        lines.push(format!("Open recurring errors: {}", state.errors.len()));
    }
    lines.join("\n")
}
