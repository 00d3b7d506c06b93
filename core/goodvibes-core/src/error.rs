//! Error types for goodvibes-core operations.
//!
//! Most automation steps never surface these: external tool failures become
//! `ExecResult` data and recurring build/test failures flow through the fix
//! loop. `VibesError` covers the remaining cases where the caller explicitly
//! asked for a strict answer (strict state loads, config writes, hook input).

use std::path::PathBuf;

/// All errors that can occur in goodvibes-core operations.
#[derive(Debug, thiserror::Error)]
pub enum VibesError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Project root could not be resolved")]
    ProjectRootNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // State Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("State file malformed: {path}: {source}")]
    StateMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State file has no parent directory: {0}")]
    StatePathInvalid(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Hook Protocol Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Hook input malformed: {0}")]
    HookInputMalformed(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl VibesError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        VibesError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        VibesError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using VibesError.
pub type Result<T> = std::result::Result<T, VibesError>;
