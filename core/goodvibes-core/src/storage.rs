//! Storage configuration and path management for goodvibes.
//!
//! Every hook invocation resolves a `StorageConfig` once at process entry and
//! passes it down. Nothing below this module reads path-related environment
//! variables.
//!
//! ## Resolution order for the project root
//!
//! 1. `GOODVIBES_PROJECT_ROOT`
//! 2. `CLAUDE_PROJECT_DIR` (set by the host for hook processes)
//! 3. The `cwd` field of the hook input
//! 4. The process working directory

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, VibesError};

pub const PROJECT_ROOT_ENV: &str = "GOODVIBES_PROJECT_ROOT";
pub const HOST_PROJECT_DIR_ENV: &str = "CLAUDE_PROJECT_DIR";
pub const PLUGIN_ROOT_ENV: &str = "CLAUDE_PLUGIN_ROOT";

const DATA_DIR: &str = ".goodvibes";

/// Central configuration for all goodvibes storage paths.
///
/// Production code uses [`StorageConfig::resolve`]. Tests use
/// [`StorageConfig::with_root`] pointed at a temp directory.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Project working tree (git repository root in practice)
    project_root: PathBuf,
    /// Plugin installation directory, when the host provides one
    plugin_root: Option<PathBuf>,
    /// User-level data directory (default: ~/.goodvibes)
    user_root: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolves paths from the environment, falling back to the hook's `cwd`
    /// and then to the process working directory.
    pub fn resolve(hook_cwd: Option<&str>) -> Result<Self> {
        let from_env = |key: &str| {
            env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };

        let project_root = from_env(PROJECT_ROOT_ENV)
            .or_else(|| from_env(HOST_PROJECT_DIR_ENV))
            .or_else(|| {
                hook_cwd
                    .filter(|cwd| !cwd.trim().is_empty())
                    .map(PathBuf::from)
            })
            .or_else(|| env::current_dir().ok())
            .ok_or(VibesError::ProjectRootNotFound)?;

        Ok(Self {
            project_root,
            plugin_root: from_env(PLUGIN_ROOT_ENV),
            user_root: dirs::home_dir().map(|home| home.join(DATA_DIR)),
        })
    }

    /// Creates a StorageConfig rooted at `project_root` with no user-level directory.
    /// Used for testing with temp directories.
    pub fn with_root(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            plugin_root: None,
            user_root: None,
        }
    }

    /// Creates a StorageConfig with explicit project and user roots.
    pub fn with_roots(project_root: impl Into<PathBuf>, user_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            plugin_root: None,
            user_root: Some(user_root.into()),
        }
    }

    /// Replaces the resolved project root, keeping the user and plugin roots.
    pub fn with_project_root(mut self, project_root: impl Into<PathBuf>) -> Self {
        self.project_root = project_root.into();
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn plugin_root(&self) -> Option<&Path> {
        self.plugin_root.as_deref()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Project Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Project-local data directory (`<project>/.goodvibes`).
    pub fn data_dir(&self) -> PathBuf {
        self.project_root.join(DATA_DIR)
    }

    /// Path to the persisted session state.
    pub fn state_file(&self) -> PathBuf {
        self.data_dir().join("state").join("hooks-state.json")
    }

    /// Path to the project automation settings.
    pub fn settings_file(&self) -> PathBuf {
        self.data_dir().join("settings.json")
    }

    /// Directory for hook log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // User Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// User-wide settings, consulted when the project has none.
    pub fn user_settings_file(&self) -> Option<PathBuf> {
        self.user_root
            .as_ref()
            .map(|root| root.join("settings.json"))
    }
}
