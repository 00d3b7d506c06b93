//! Automation policy configuration.
//!
//! Read from `<project>/.goodvibes/settings.json` (key `automation`), falling
//! back to the user-level settings file and then to built-in defaults. Every
//! field is optional on disk.
//!
//! ```json
//! {
//!   "automation": {
//!     "checkpoints": { "fileThreshold": 5 },
//!     "build": { "enabled": false }
//!   }
//! }
//! ```

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, VibesError};
use crate::storage::StorageConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestsConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    /// Program and leading arguments; related test files are appended.
    pub command: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 120,
            command: vec!["npx".into(), "vitest".into(), "run".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildConfig {
    pub enabled: bool,
    /// Session-wide modified file count at which type checks start running.
    pub file_threshold: usize,
    pub timeout_secs: u64,
    pub command: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_threshold: 3,
            timeout_secs: 120,
            command: vec!["npx".into(), "tsc".into(), "--noEmit".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub file_threshold: usize,
    pub max_history: usize,
    pub on_compact: bool,
    pub on_stop: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_threshold: 5,
            max_history: 50,
            on_compact: true,
            on_stop: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BranchConfig {
    pub enabled: bool,
    pub auto_merge: bool,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_merge: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuardConfig {
    pub enabled: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FixLoopConfig {
    pub threshold_per_phase: u32,
    pub max_attempts: u32,
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            threshold_per_phase: 2,
            max_attempts: 6,
        }
    }
}

/// Per-category automation switches and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationConfig {
    pub tests: TestsConfig,
    pub build: BuildConfig,
    pub checkpoints: CheckpointConfig,
    pub branches: BranchConfig,
    pub guard: GuardConfig,
    pub fix_loop: FixLoopConfig,
    pub git_timeout_secs: u64,
    pub lock_timeout_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            tests: TestsConfig::default(),
            build: BuildConfig::default(),
            checkpoints: CheckpointConfig::default(),
            branches: BranchConfig::default(),
            guard: GuardConfig::default(),
            fix_loop: FixLoopConfig::default(),
            git_timeout_secs: 30,
            lock_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    automation: Option<AutomationConfig>,
}

impl AutomationConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Loads project settings, then user settings, then defaults.
    /// Malformed files are logged and skipped.
    pub fn load(storage: &StorageConfig) -> Self {
        let candidates =
            std::iter::once(storage.settings_file()).chain(storage.user_settings_file());

        for path in candidates {
            match Self::try_load_from(&path) {
                Ok(Some(config)) => {
                    tracing::debug!(path = %path.display(), "Loaded automation settings");
                    return config;
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "Ignoring malformed settings file");
                }
            }
        }

        Self::default()
    }

    /// Reads the `automation` section of a settings file.
    /// Returns `Ok(None)` when the file or the section is absent.
    pub fn try_load_from(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(VibesError::io("read settings", err)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let settings: SettingsFile =
            serde_json::from_str(&content).map_err(|e| VibesError::ConfigMalformed {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;

        Ok(settings.automation)
    }
}
