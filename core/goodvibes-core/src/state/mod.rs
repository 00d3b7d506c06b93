//! Session state model and persistence.
//!
//! Each hook invocation is a separate process, so the state file is the only
//! continuity between invocations:
//!
//! ```text
//! hook process → StateLock → StateStore::load → mutate → StateStore::save → exit
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: The `SessionState` aggregate and its sections
//! - [`store`]: Atomic JSON persistence with default-on-corruption loads
//! - [`lock`]: Advisory lock directory serializing concurrent hook processes

pub(crate) mod lock;
mod store;
pub(crate) mod types;

pub use lock::{is_pid_alive, StateLock};
pub use store::StateStore;
pub use types::{
    BuildState, BuildStatus, CheckpointRecord, DevServer, Diagnostic, ErrorCategory, ErrorState,
    FileTracking, FixPhase, GitState, PathSet, PendingFix, SessionInfo, SessionState, TestState,
};
