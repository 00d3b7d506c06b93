//! End-to-end automation runs.
//!
//! Each `invoke` call mirrors one hook process: lock, load from disk, run the
//! orchestrator, save, drop everything. Nothing survives in memory between
//! calls except the doubles that stand in for git and the build/test tools.

use goodvibes_core::config::{BuildConfig, TestsConfig};
use goodvibes_core::state::{BuildStatus, ErrorCategory, FixPhase};
use goodvibes_core::testing::{ScriptedCheckRunner, ScriptedExecutor};
use goodvibes_core::{
    AutomationConfig, AutomationReport, CheckReport, ExecResult, HookInput, Orchestrator,
    SessionState, StateStore, StorageConfig,
};
use std::path::PathBuf;
use tempfile::TempDir;

struct Project {
    _temp: TempDir,
    storage: StorageConfig,
    config: AutomationConfig,
    git: ScriptedExecutor,
    checks: ScriptedCheckRunner,
}

impl Project {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path());
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
        let git = ScriptedExecutor::new();
        git.respond(&["status"], ExecResult::ok(" M src/f0.ts\n"));
        git.respond(&["rev-parse", "--short"], ExecResult::ok("c0ffee1\n"));
        Self {
            _temp: temp,
            storage,
            config,
            git,
            checks: ScriptedCheckRunner::new(),
        }
    }

    fn store(&self) -> StateStore {
        StateStore::for_project(&self.storage)
    }

    fn invoke(
        &self,
        f: impl FnOnce(&Orchestrator<'_>, &mut SessionState) -> AutomationReport,
    ) -> AutomationReport {
        let store = self.store();
        let _lock = store.lock(self.config.lock_timeout());
        let mut state = store.load();
        let orchestrator = Orchestrator::new(
            &self.config,
            &self.git,
            &self.checks,
            self.storage.project_root(),
        );
        let report = f(&orchestrator, &mut state);
        store.save(&mut state).unwrap();
        report
    }

    fn state(&self) -> SessionState {
        self.store().load()
    }
}

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/state")
        .join(name)
}

#[test]
fn test_checkpoint_after_five_files() {
    let project = Project::new();

    for i in 0..5 {
        project.invoke(|o, s| o.on_file_modified(s, &format!("src/f{i}.ts"), false));
    }

    let commits: Vec<Vec<String>> = project
        .git
        .calls()
        .into_iter()
        .filter(|call| call.first().map(String::as_str) == Some("commit"))
        .collect();
    assert_eq!(commits.len(), 1);
    assert!(commits[0][2].starts_with("checkpoint: 5 files modified"));

    let state = project.state();
    assert!(state.files.modified_since_checkpoint.is_empty());
    assert_eq!(state.files.modified_this_session.len(), 5);
    assert_eq!(state.git.checkpoints.len(), 1);
    assert_eq!(state.git.checkpoints[0].hash, "c0ffee1");
    assert_eq!(state.revision, 5);
}

#[test]
fn test_first_creation_on_main_opens_feature_branch() {
    let project = Project::new();

    let report = project.invoke(|o, s| o.on_file_modified(s, "src/a.ts", true));
    assert_eq!(report.messages, vec!["Created feature branch feature/feature".to_string()]);

    let state = project.state();
    assert_eq!(state.git.feature_branch.as_deref(), Some("feature/feature"));
    assert_eq!(state.git.current_branch, "feature/feature");

    // A second creation never opens another branch.
    project.invoke(|o, s| o.on_file_modified(s, "src/b.ts", true));
    assert_eq!(project.git.count_matching(&["checkout", "-b"]), 1);
}

#[test]
fn test_recurring_compiler_error_across_invocations() {
    let project = Project::new();

    for (line, col) in [(12, 5), (87, 21), (3, 1)] {
        let message = format!(
            "/home/dev/app/src/app.ts({line},{col}): error TS2322: Type 'string' is not assignable to type 'number'."
        );
        project.invoke(|o, s| o.on_tool_failure(s, "Bash", &message, "npx tsc --noEmit"));
    }

    let state = project.state();
    assert_eq!(state.errors.len(), 1);
    let error = state.errors.values().next().unwrap();
    assert_eq!(error.attempts, 3);
    assert_eq!(error.category, ErrorCategory::TypeError);
    assert_eq!(error.phase, FixPhase::Alternative);
    assert_eq!(error.history.len(), 3);
}

#[test]
fn test_feature_merges_on_stop_once_green() {
    let mut project = Project::new();
    project.config.build.enabled = true;
    project.config.build.file_threshold = 1;
    project.checks.queue_build(CheckReport::fail("Found 1 error.", Vec::new()));

    project.invoke(|o, s| o.on_file_modified(s, "src/a.ts", true));
    let state = project.state();
    assert_eq!(state.build.status, BuildStatus::Failing);

    // Not mergeable yet: build failing, not marked done.
    project.invoke(|o, s| o.on_stop(s));
    assert_eq!(project.git.count_matching(&["merge"]), 0);

    project.invoke(|o, s| o.on_file_modified(s, "src/a.ts", false));
    let store = project.store();
    let mut state = store.load();
    assert_eq!(state.build.status, BuildStatus::Passing);
    goodvibes_core::branch::mark_feature_done(&mut state);
    store.save(&mut state).unwrap();

    let report = project.invoke(|o, s| o.on_stop(s));
    assert_eq!(report.messages, vec!["Merged feature/feature into main".to_string()]);
    let state = project.state();
    assert!(state.git.feature_branch.is_none());
    assert_eq!(state.git.current_branch, "main");
}

#[test]
fn test_session_start_summarizes_fixture_state() {
    let project = Project::new();
    let state_file = project.storage.state_file();
    fs_err::create_dir_all(state_file.parent().unwrap()).unwrap();
    fs_err::copy(fixture_path("partial-v1.json"), &state_file).unwrap();
    project
        .git
        .respond(&["rev-parse", "--abbrev-ref"], ExecResult::ok("feature/api-cache\n"));
    project.git.respond(
        &["rev-parse", "--verify", "--quiet", "refs/heads/main"],
        ExecResult::failed(1, ""),
    );

    let loaded = project.state();
    assert_eq!(loaded.files.modified_since_checkpoint.len(), 2);
    assert_eq!(loaded.session.mode, "default");

    let input: HookInput =
        serde_json::from_value(serde_json::json!({"session_id": "s-2"})).unwrap();
    let report = project.invoke(|o, s| o.on_session_start(s, &input));
    let summary = &report.context[0];
    assert!(summary.contains("Branch: feature/api-cache (feature, merges into master)"));
    assert!(summary.contains("Last checkpoint: checkpoint: 5 files modified (9f3c2a1)"));
    assert!(summary.contains("Build: failing (1 errors)"));

    let state = project.state();
    assert_eq!(state.session.id, "s-2");
    // Stale error entries from an old session are pruned.
    assert!(state.errors.is_empty());
    assert!(state.files.modified_this_session.is_empty());
    assert_eq!(state.files.modified_since_checkpoint.len(), 2);
}

#[test]
fn test_corrupt_state_file_starts_fresh() {
    let project = Project::new();
    let state_file = project.storage.state_file();
    fs_err::create_dir_all(state_file.parent().unwrap()).unwrap();
    fs_err::write(&state_file, "{\"files\": [truncated").unwrap();

    project.invoke(|o, s| o.on_file_modified(s, "src/a.ts", false));
    let state = project.state();
    assert_eq!(state.files.modified_this_session.len(), 1);
    assert_eq!(state.revision, 1);
}
