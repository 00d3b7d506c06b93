//! File logging for the hook process.
//!
//! Stdout carries the hook protocol, so logs go to
//! `<project>/.goodvibes/logs/hooks.log` through a non-blocking appender.
//! `GOODVIBES_DEBUG_LOG=1` forces debug level; otherwise `RUST_LOG` is
//! honored, falling back to `info`.

use fs_err as fs;
use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "hooks.log";
const DEBUG_ENV: &str = "GOODVIBES_DEBUG_LOG";

/// Returns the guard that flushes buffered lines on drop; keep it alive for `main`.
///
/// Logging is best effort: an unwritable directory leaves the hook silent.
pub fn init(logs_dir: &Path) -> Option<WorkerGuard> {
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("goodvibes-hook: logging disabled: {err}");
        return None;
    }

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE)
        .build(logs_dir)
        .ok()?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .ok()?;

    Some(guard)
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
