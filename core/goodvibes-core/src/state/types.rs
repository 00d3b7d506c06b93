//! Serialized session state aggregate.
//!
//! One `SessionState` per working directory, persisted as camelCase JSON at
//! `.goodvibes/state/hooks-state.json`. Every section defaults when missing so
//! older or hand-edited files still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};

// -----------------------------------------------------------------------------
// PathSet
// -----------------------------------------------------------------------------

/// Insertion-ordered set of path strings.
///
/// Paths are compared as raw strings: `src/a.ts` and `./src/a.ts` are two
/// entries. Serialized as a plain JSON array; duplicates are dropped on load.
#[derive(Debug, Clone, Default)]
pub struct PathSet {
    order: Vec<String>,
    index: HashSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the path was newly inserted.
    pub fn insert(&mut self, path: &str) -> bool {
        if self.index.contains(path) {
            return false;
        }
        self.index.insert(path.to_string());
        self.order.push(path.to_string());
        true
    }

    pub fn remove(&mut self, path: &str) -> bool {
        if !self.index.remove(path) {
            return false;
        }
        self.order.retain(|p| p != path);
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl PartialEq for PathSet {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for PathSet {}

impl<S: AsRef<str>> FromIterator<S> for PathSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = PathSet::new();
        for path in iter {
            set.insert(path.as_ref());
        }
        set
    }
}

impl Serialize for PathSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.order.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PathSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let paths = Vec::<String>::deserialize(deserializer)?;
        Ok(paths.into_iter().collect())
    }
}

// -----------------------------------------------------------------------------
// Session
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Host permission mode (`default`, `plan`, `acceptEdits`, ...), kept verbatim.
    pub mode: String,
    pub feature_description: Option<String>,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            started_at: Utc::now(),
            mode: "default".to_string(),
            feature_description: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileTracking {
    pub modified_since_checkpoint: PathSet,
    pub modified_this_session: PathSet,
    pub created_this_session: PathSet,
}

// -----------------------------------------------------------------------------
// Git
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub hash: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitState {
    pub main_branch: String,
    pub current_branch: String,
    pub feature_branch: Option<String>,
    pub feature_started_at: Option<DateTime<Utc>>,
    pub feature_description: Option<String>,
    /// Newest first.
    pub checkpoints: Vec<CheckpointRecord>,
    pub pending_merge: bool,
}

impl Default for GitState {
    fn default() -> Self {
        Self {
            main_branch: "main".to_string(),
            current_branch: "main".to_string(),
            feature_branch: None,
            feature_started_at: None,
            feature_description: None,
            checkpoints: Vec::new(),
            pending_merge: false,
        }
    }
}

impl GitState {
    pub fn on_main(&self) -> bool {
        self.current_branch == self.main_branch
    }
}

// -----------------------------------------------------------------------------
// Build / Tests
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    Unknown,
    Passing,
    Failing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildState {
    pub last_run: Option<DateTime<Utc>>,
    pub status: BuildStatus,
    pub errors: Vec<Diagnostic>,
    pub fix_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFix {
    pub test_file: String,
    pub error: String,
    #[serde(default)]
    pub fix_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestState {
    pub last_full_run: Option<DateTime<Utc>>,
    pub last_quick_run: Option<DateTime<Utc>>,
    pub passing_files: PathSet,
    /// Disjoint from `passing_files`.
    pub failing_files: PathSet,
    pub pending_fixes: Vec<PendingFix>,
}

impl TestState {
    pub fn mark_passing(&mut self, file: &str) {
        self.failing_files.remove(file);
        self.passing_files.insert(file);
    }

    pub fn mark_failing(&mut self, file: &str) {
        self.passing_files.remove(file);
        self.failing_files.insert(file);
    }
}

// -----------------------------------------------------------------------------
// Fix loop
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    DependencyInstall,
    TypeError,
    TestFailure,
    RuntimeException,
    LintFailure,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DependencyInstall => "dependency_install",
            Self::TypeError => "type_error",
            Self::TestFailure => "test_failure",
            Self::RuntimeException => "runtime_exception",
            Self::LintFailure => "lint_failure",
            Self::Unknown => "unknown",
        }
    }
}

/// Position on the escalation ladder. Ordered: later variants are further up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixPhase {
    /// Retry the same approach.
    #[default]
    Initial,
    /// Try a different approach.
    Alternative,
    /// Stop and ask the human.
    AskHuman,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorState {
    pub signature: String,
    pub category: ErrorCategory,
    #[serde(default)]
    pub phase: FixPhase,
    #[serde(default)]
    pub attempts: u32,
    /// Attempts in the current phase; reset on escalation.
    #[serde(default)]
    pub phase_attempts: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<String>,
}

// -----------------------------------------------------------------------------
// Dev servers
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServer {
    pub command: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub last_error: Option<String>,
}

// -----------------------------------------------------------------------------
// Aggregate
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionState {
    /// Bumped on every successful save.
    pub revision: u64,
    pub session: SessionInfo,
    pub files: FileTracking,
    pub git: GitState,
    pub build: BuildState,
    pub tests: TestState,
    pub errors: BTreeMap<String, ErrorState>,
    pub dev_servers: BTreeMap<String, DevServer>,
}
