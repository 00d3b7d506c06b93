//! Event handler for host hook invocations.
//!
//! Reads JSON from stdin, dispatches by event, and writes exactly one JSON
//! response to stdout.
//!
//! ## Dispatch
//!
//! ```text
//! SessionStart        → reset session view, sync branch, prune stale errors
//! PreToolUse (Bash)   → guard verdict (read-only, nothing spawned)
//! PostToolUse (write) → tracker → tests → build → checkpoint → branch
//! PostToolUseFailure  → fix loop
//! UserPromptSubmit    → first prompt names the session's feature
//! PreCompact          → forced checkpoint
//! Stop                → merge ready feature, else optional checkpoint
//! others              → {"continue": true}
//! ```
//!
//! Mutating events hold the state lock across load → mutate → save.

use goodvibes_core::{
    AutomationConfig, AutomationReport, CheckRunner, CommandCheckRunner, CommandExecutor,
    HookEvent, HookInput, HookResponse, Orchestrator, StateStore, StorageConfig, SystemExecutor,
};
use std::env;
use std::io::{self, Read};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::logging;

const STDIN_TIMEOUT_ENV: &str = "GOODVIBES_STDIN_TIMEOUT_MS";
const DEFAULT_STDIN_TIMEOUT_MS: u64 = 100;

/// Exit code telling the host to block the tool call.
pub const EXIT_DENY: i32 = 2;

/// Runs one hook invocation and returns the process exit code.
pub fn run() -> i32 {
    let raw = read_stdin(stdin_timeout());

    let input = match HookInput::parse(&raw) {
        Ok(input) => input,
        Err(err) => {
            let _guard = StorageConfig::resolve(None)
                .ok()
                .and_then(|storage| logging::init(&storage.logs_dir()));
            tracing::warn!(error = %err, "Ignoring malformed hook input");
            return emit(&HookResponse::proceed().with_system_message(format!("goodvibes: {err}")));
        }
    };

    let storage = match StorageConfig::resolve(input.cwd.as_deref()) {
        Ok(storage) => storage,
        Err(err) => {
            return emit(&HookResponse::proceed().with_system_message(format!("goodvibes: {err}")));
        }
    };
    let _logging_guard = logging::init(&storage.logs_dir());

    let config = AutomationConfig::load(&storage);
    let executor = SystemExecutor;
    let checks = CommandCheckRunner::new(&executor, config.tests.clone(), config.build.clone());

    let response = match dispatch(&input, &storage, &config, &executor, &checks) {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, event = ?input.hook_event_name, "Hook handling failed");
            HookResponse::proceed().with_system_message(format!("goodvibes: {err}"))
        }
    };
    emit(&response)
}

/// Writes the response and maps it to an exit code.
fn emit(response: &HookResponse) -> i32 {
    match response.to_json() {
        Ok(json) => println!("{json}"),
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize hook response");
            println!(r#"{{"continue":true}}"#);
            return 0;
        }
    }

    if response.is_deny() {
        let reason = response
            .hook_specific_output
            .as_ref()
            .and_then(|out| out.permission_decision_reason.as_deref())
            .unwrap_or("blocked by goodvibes guard");
        eprintln!("{reason}");
        return EXIT_DENY;
    }
    0
}

pub(crate) fn dispatch(
    input: &HookInput,
    storage: &StorageConfig,
    config: &AutomationConfig,
    executor: &dyn CommandExecutor,
    checks: &dyn CheckRunner,
) -> goodvibes_core::Result<HookResponse> {
    let Some(event) = input.to_event() else {
        tracing::debug!(event = ?input.hook_event_name, "Skipping unhandled event");
        return Ok(HookResponse::proceed());
    };

    let orchestrator = Orchestrator::new(config, executor, checks, storage.project_root());
    let store = StateStore::for_project(storage);

    if event == HookEvent::PreToolUse {
        let Some(command) = input.command() else {
            return Ok(HookResponse::proceed());
        };
        let state = store.load();
        let verdict = orchestrator.check_command(&state, command);
        return Ok(HookResponse::from_verdict(event, &verdict));
    }

    if !mutates_state(event, input, config) {
        return Ok(HookResponse::proceed());
    }

    let _lock = store.lock(config.lock_timeout());
    let mut state = store.load();

    let report = match event {
        HookEvent::SessionStart => orchestrator.on_session_start(&mut state, input),
        HookEvent::PostToolUse => {
            let Some(path) = input.file_path() else {
                return Ok(HookResponse::proceed());
            };
            let seen = state.files.modified_this_session.contains(path);
            let created = input.is_creation(seen);
            tracing::debug!(path, created, tool = ?input.tool_name, "File modified");
            orchestrator.on_file_modified(&mut state, path, created)
        }
        HookEvent::PostToolUseFailure => {
            let Some(message) = input.failure_message() else {
                return Ok(HookResponse::proceed());
            };
            let tool = input.tool_name.as_deref().unwrap_or("tool");
            orchestrator.on_tool_failure(&mut state, tool, &message, &fix_description(input))
        }
        HookEvent::UserPromptSubmit => {
            let prompt = input.prompt().unwrap_or_default();
            if !orchestrator.on_user_prompt(&mut state, prompt) {
                return Ok(HookResponse::proceed());
            }
            AutomationReport::default()
        }
        HookEvent::PreCompact => orchestrator.on_pre_compact(&mut state),
        HookEvent::Stop => orchestrator.on_stop(&mut state),
        HookEvent::PreToolUse | HookEvent::SessionEnd => {
            return Ok(HookResponse::proceed());
        }
    };

    store.save(&mut state)?;
    Ok(report.into_response())
}

fn mutates_state(event: HookEvent, input: &HookInput, config: &AutomationConfig) -> bool {
    match event {
        HookEvent::SessionStart | HookEvent::PreCompact | HookEvent::PostToolUseFailure => true,
        HookEvent::PostToolUse => input.writes_file(),
        HookEvent::UserPromptSubmit => input.prompt().is_some() && config.branches.enabled,
        // Avoid re-entering the stop hook when the host is already continuing from one.
        HookEvent::Stop => !input.stop_hook_active(),
        HookEvent::PreToolUse | HookEvent::SessionEnd => false,
    }
}

/// What the agent tried, recorded in the fix loop history.
fn fix_description(input: &HookInput) -> String {
    let tool = input.tool_name.as_deref().unwrap_or("tool");
    if let Some(command) = input.command() {
        return format!("{tool}: {command}");
    }
    match input.file_path() {
        Some(path) => format!("{tool}: {path}"),
        None => tool.to_string(),
    }
}

fn stdin_timeout() -> Duration {
    let millis = env::var(STDIN_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_STDIN_TIMEOUT_MS);
    Duration::from_millis(millis)
}

/// Reads all of stdin on a helper thread; empty if nothing arrives in time.
fn read_stdin(timeout: Duration) -> String {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut raw = String::new();
        let _ = io::stdin().read_to_string(&mut raw);
        let _ = tx.send(raw);
    });
    rx.recv_timeout(timeout).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use goodvibes_core::testing::{ScriptedCheckRunner, ScriptedExecutor};
    use goodvibes_core::{BuildConfig, ExecResult, SessionState, TestsConfig};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        storage: StorageConfig,
        config: AutomationConfig,
        executor: ScriptedExecutor,
        checks: ScriptedCheckRunner,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().unwrap();
            let storage =
                StorageConfig::with_roots(temp.path().join("project"), temp.path().join("home"));
            let config = AutomationConfig {
                tests: TestsConfig {
                    enabled: false,
                    ..TestsConfig::default()
                },
                build: BuildConfig {
                    enabled: false,
                    ..BuildConfig::default()
                },
                ..AutomationConfig::default()
            };
            Self {
                _temp: temp,
                storage,
                config,
                executor: ScriptedExecutor::new(),
                checks: ScriptedCheckRunner::new(),
            }
        }

        fn dispatch(&self, input: serde_json::Value) -> HookResponse {
            let input: HookInput = serde_json::from_value(input).unwrap();
            dispatch(&input, &self.storage, &self.config, &self.executor, &self.checks).unwrap()
        }

        fn state(&self) -> SessionState {
            StateStore::for_project(&self.storage).load()
        }
    }

    #[test]
    fn test_unknown_event_returns_continue() {
        let fx = Fixture::new();
        let response = fx.dispatch(json!({"hook_event_name": "Notification"}));
        assert_eq!(response, HookResponse::proceed());
        assert!(!fx.storage.state_file().exists());
    }

    #[test]
    fn test_pre_tool_use_denies_force_push_on_main() {
        let fx = Fixture::new();
        let response = fx.dispatch(json!({
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "git push --force origin main"}
        }));
        assert!(response.is_deny());
        assert!(fx.executor.calls().is_empty());
        assert_eq!(emit(&response), EXIT_DENY);
    }

    #[test]
    fn test_pre_tool_use_never_approves_on_the_hosts_behalf() {
        let mut fx = Fixture::new();
        let response = fx.dispatch(json!({
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "ls -la"}
        }));
        assert_eq!(response, HookResponse::proceed());

        fx.config.guard.enabled = false;
        let response = fx.dispatch(json!({
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "rm -rf ~"}
        }));
        assert!(response.hook_specific_output.is_none());
        assert_eq!(emit(&response), 0);
    }

    #[test]
    fn test_pre_tool_use_warning_carries_no_decision() {
        let fx = Fixture::new();
        let response = fx.dispatch(json!({
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "git push --force origin feature/x"}
        }));
        assert!(response.hook_specific_output.is_none());
        assert!(response.system_message.unwrap().starts_with("Warning: "));
    }

    #[test]
    fn test_post_tool_use_tracks_and_persists() {
        let fx = Fixture::new();
        let response = fx.dispatch(json!({
            "hook_event_name": "PostToolUse",
            "tool_name": "Write",
            "tool_input": {"file_path": "src/a.ts"},
            "tool_response": {"type": "create"}
        }));
        assert!(response.should_continue);

        let state = fx.state();
        assert!(state.files.created_this_session.contains("src/a.ts"));
        assert_eq!(state.git.feature_branch.as_deref(), Some("feature/feature"));
        assert_eq!(state.revision, 1);
        assert_eq!(
            response.system_message.as_deref(),
            Some("Created feature branch feature/feature")
        );
    }

    #[test]
    fn test_first_prompt_names_the_next_feature_branch() {
        let fx = Fixture::new();
        let response = fx.dispatch(json!({
            "hook_event_name": "UserPromptSubmit",
            "prompt": "Add dark mode toggle"
        }));
        assert_eq!(response, HookResponse::proceed());
        assert_eq!(
            fx.state().session.feature_description.as_deref(),
            Some("Add dark mode toggle")
        );

        fx.dispatch(json!({
            "hook_event_name": "PostToolUse",
            "tool_name": "Write",
            "tool_input": {"file_path": "src/theme.ts"},
            "tool_response": {"type": "create"}
        }));
        assert_eq!(
            fx.state().git.feature_branch.as_deref(),
            Some("feature/add-dark-mode-toggle")
        );
    }

    #[test]
    fn test_read_only_tools_do_not_touch_state() {
        let fx = Fixture::new();
        fx.dispatch(json!({
            "hook_event_name": "PostToolUse",
            "tool_name": "Read",
            "tool_input": {"file_path": "src/a.ts"}
        }));
        assert!(!fx.storage.state_file().exists());
    }

    #[test]
    fn test_tool_failure_returns_fix_context() {
        let fx = Fixture::new();
        let response = fx.dispatch(json!({
            "hook_event_name": "PostToolUseFailure",
            "tool_name": "Bash",
            "tool_input": {"command": "npm test"},
            "error": "AssertionError: expected 2 to equal 3"
        }));
        let context = response.additional_context.unwrap();
        assert!(context.contains("test_failure"));
        assert!(context.contains("1. Bash: npm test"));
        assert_eq!(fx.state().errors.len(), 1);
    }

    #[test]
    fn test_stop_hook_active_is_a_no_op() {
        let fx = Fixture::new();
        fx.executor.respond(&["status"], ExecResult::ok(" M a.ts\n"));
        let response = fx.dispatch(json!({"hook_event_name": "Stop", "stop_hook_active": true}));
        assert_eq!(response, HookResponse::proceed());
        assert!(fx.executor.calls().is_empty());
    }

    #[test]
    fn test_fix_description() {
        let input: HookInput = serde_json::from_value(json!({
            "tool_name": "Edit",
            "tool_input": {"file_path": "src/a.ts"}
        }))
        .unwrap();
        assert_eq!(fix_description(&input), "Edit: src/a.ts");
        assert_eq!(fix_description(&HookInput::default()), "tool");
    }
}
