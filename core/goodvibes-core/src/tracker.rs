//! File modification tracking.
//!
//! Three views over the files touched by the agent:
//!
//! - `modifiedSinceCheckpoint`: cleared whenever a checkpoint commit lands
//! - `modifiedThisSession`: cleared only when a new session starts
//! - `createdThisSession`: subset of the above, files the agent created
//!
//! Paths are raw strings; no normalization happens here.

use crate::state::SessionState;

pub fn track_modification(state: &mut SessionState, path: &str) {
    let files = &mut state.files;
    if files.modified_since_checkpoint.insert(path) {
        tracing::debug!(path, "Tracked modification since checkpoint");
    }
    files.modified_this_session.insert(path);
}

/// Creation implies modification.
pub fn track_creation(state: &mut SessionState, path: &str) {
    state.files.created_this_session.insert(path);
    track_modification(state, path);
}

/// Empties `modifiedSinceCheckpoint` only.
pub fn clear_checkpoint_tracking(state: &mut SessionState) {
    state.files.modified_since_checkpoint.clear();
}

/// Files modified since the last checkpoint.
pub fn count(state: &SessionState) -> usize {
    state.files.modified_since_checkpoint.len()
}

pub fn session_count(state: &SessionState) -> usize {
    state.files.modified_this_session.len()
}

/// Starts a fresh session view. Uncheckpointed work stays tracked.
pub fn reset_session(state: &mut SessionState) {
    state.files.modified_this_session.clear();
    state.files.created_this_session.clear();
}
