//! Advisory lock around the state file's load-mutate-save cycle.
//!
//! The host may run several hook processes for the same project at once (a
//! background sub-agent next to the main session). Without coordination the
//! last `save` silently discards the other process's mutations.
//!
//! # Lock Directory Structure
//!
//! Location: `<state file>.lock/` next to the state file. `create_dir` is atomic,
//! so whoever creates the directory owns the lock.
//!
//! ```text
//! hooks-state.json.lock/
//! ├── pid          # Plain text: the holder's process ID
//! └── meta.json    # { pid, created }
//! ```
//!
//! # Staleness
//!
//! A holder that crashed leaves its directory behind. A lock is stale when its
//! PID is no longer alive or it is older than [`STALE_LOCK_SECS`]; stale locks
//! are removed and acquisition retries.
//!
//! The lock is advisory. If it cannot be acquired within the timeout the caller
//! proceeds unlocked, which degrades to last-write-wins.

use chrono::Utc;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Locks older than this are reclaimed even if the PID is alive (PID reuse).
pub const STALE_LOCK_SECS: i64 = 30;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    /// Lock creation time (Unix timestamp, seconds).
    pub created: i64,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct StateLock {
    dir: PathBuf,
}

impl StateLock {
    /// Lock directory for a given state file.
    pub fn dir_for(state_file: &Path) -> PathBuf {
        let mut name = state_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        state_file.with_file_name(name)
    }

    /// Tries to acquire the lock, polling until `timeout` elapses.
    pub fn acquire(state_file: &Path, timeout: Duration) -> Option<StateLock> {
        let dir = Self::dir_for(state_file);
        if let Some(parent) = dir.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::warn!(error = %err, "Failed to create state directory for lock");
                return None;
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match fs::create_dir(&dir) {
                Ok(()) => {
                    write_meta(&dir);
                    tracing::debug!(lock = %dir.display(), "State lock acquired");
                    return Some(StateLock { dir });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&dir) {
                        tracing::info!(lock = %dir.display(), "Reclaiming stale state lock");
                        let _ = fs::remove_dir_all(&dir);
                        continue;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        lock = %dir.display(),
                        "Failed to create state lock"
                    );
                    return None;
                }
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    lock = %dir.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "State lock busy; continuing without it"
                );
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.dir) {
            tracing::warn!(error = %err, "Failed to release state lock");
        }
    }
}

fn write_meta(dir: &Path) {
    let pid = std::process::id();
    let meta = LockMeta {
        pid,
        created: Utc::now().timestamp(),
    };
    let _ = fs::write(dir.join("pid"), pid.to_string());
    if let Ok(json) = serde_json::to_string(&meta) {
        let _ = fs::write(dir.join("meta.json"), json);
    }
}

fn read_meta(dir: &Path) -> Option<LockMeta> {
    let content = fs::read_to_string(dir.join("meta.json")).ok()?;
    serde_json::from_str(&content).ok()
}

fn is_stale(dir: &Path) -> bool {
    match read_meta(dir) {
        Some(meta) => {
            let age = Utc::now().timestamp() - meta.created;
            !is_pid_alive(meta.pid) || age > STALE_LOCK_SECS
        }
        // Holder is between create_dir and write_meta, or wrote garbage.
        // Fall back to the directory's mtime.
        None => dir_age_secs(dir).is_some_and(|age| age > STALE_LOCK_SECS),
    }
}

fn dir_age_secs(dir: &Path) -> Option<i64> {
    let modified = fs::metadata(dir).ok()?.modified().ok()?;
    let age = modified.elapsed().ok()?;
    Some(age.as_secs() as i64)
}

pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 performs only the existence/permission check.
        #[allow(unsafe_code)]
        unsafe {
            libc::kill(pid as i32, 0) == 0
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_dir_sits_next_to_state_file() {
        let dir = StateLock::dir_for(Path::new("/p/.goodvibes/state/hooks-state.json"));
        assert_eq!(dir, PathBuf::from("/p/.goodvibes/state/hooks-state.json.lock"));
    }

    #[test]
    fn test_acquire_and_release() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("state").join("hooks-state.json");

        let lock = StateLock::acquire(&file, Duration::from_millis(100)).unwrap();
        assert!(lock.path().join("pid").exists());
        let lock_dir = lock.path().to_path_buf();
        drop(lock);
        assert!(!lock_dir.exists());
    }

    #[test]
    fn test_second_acquire_times_out_while_held() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("hooks-state.json");

        let _held = StateLock::acquire(&file, Duration::from_millis(100)).unwrap();
        let started = Instant::now();
        let second = StateLock::acquire(&file, Duration::from_millis(80));
        assert!(second.is_none());
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_old_lock_is_reclaimed() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("hooks-state.json");
        let dir = StateLock::dir_for(&file);
        fs::create_dir_all(&dir).unwrap();
        let meta = LockMeta {
            pid: std::process::id(),
            created: Utc::now().timestamp() - STALE_LOCK_SECS - 5,
        };
        fs::write(dir.join("meta.json"), serde_json::to_string(&meta).unwrap()).unwrap();

        let lock = StateLock::acquire(&file, Duration::from_millis(100));
        assert!(lock.is_some());
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }
}
