//! # goodvibes-core
//!
//! Core library for the goodvibes hooks: the automation that runs each time
//! a coding-agent host reports a tool use, a session start or stop, or a
//! context compaction.
//!
//! ## Design Principles
//!
//! - **Process per invocation**: No in-memory state survives between hook calls.
//!   Everything is reconstructed from the persisted [`SessionState`].
//! - **Synchronous**: No async runtime. External tools are invoked one at a time
//!   with explicit timeouts.
//! - **Graceful degradation**: A failing tool, a corrupt state file, or a broken
//!   config degrades to a default plus a message, never to an aborted hook.
//! - **Explicit collaborators**: Processes, git, and build/test runs go through
//!   the [`CommandExecutor`] and [`CheckRunner`] traits so every policy is
//!   testable without spawning anything.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use goodvibes_core::{
//!     AutomationConfig, CommandCheckRunner, Orchestrator, StateStore, StorageConfig,
//!     SystemExecutor,
//! };
//!
//! let storage = StorageConfig::resolve(None)?;
//! let config = AutomationConfig::load(&storage);
//! let executor = SystemExecutor;
//! let checks = CommandCheckRunner::new(&executor, config.tests.clone(), config.build.clone());
//!
//! let store = StateStore::for_project(&storage);
//! let _lock = store.lock(config.lock_timeout());
//! let mut state = store.load();
//! let report = Orchestrator::new(&config, &executor, &checks, storage.project_root())
//!     .on_file_modified(&mut state, "src/app.ts", false);
//! store.save(&mut state)?;
//! ```

pub mod branch;
pub mod checkpoint;
pub mod checks;
pub mod config;
pub mod error;
pub mod fixloop;
pub mod git;
pub mod guard;
pub mod hook;
pub mod orchestrator;
pub mod process;
pub mod state;
pub mod storage;
pub mod tracker;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

// Re-export commonly used items at crate root
pub use checks::{CheckReport, CheckRunner, CommandCheckRunner};
pub use config::{
    AutomationConfig, BranchConfig, BuildConfig, CheckpointConfig, FixLoopConfig, GuardConfig,
    TestsConfig,
};
pub use error::{Result, VibesError};
pub use fixloop::{FixLoop, FixLoopReport};
pub use git::Git;
pub use guard::GuardVerdict;
pub use hook::{HookEvent, HookInput, HookResponse};
pub use orchestrator::{AutomationReport, Orchestrator};
pub use process::{CommandExecutor, ExecResult, SystemExecutor};
pub use state::{SessionState, StateLock, StateStore};
pub use storage::StorageConfig;
