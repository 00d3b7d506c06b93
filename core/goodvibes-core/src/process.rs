//! Running external commands with a working directory and a timeout.
//!
//! Commands are always given as a program plus an argument array; nothing is
//! passed through a shell. A nonzero exit, a timeout, or a spawn failure are
//! all reported as data in [`ExecResult`], never as an error.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Upper bound on captured bytes per stream.
pub const OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Minimum time to keep draining pipes once the child is gone. A descendant
/// outside the process group can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// `None` when the process was killed on timeout or never started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// stdout followed by stderr, for diagnostics parsing.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            _ => self.stderr.clone(),
        }
    }
}

/// Seam between automation policy and the operating system.
pub trait CommandExecutor {
    fn exec(&self, program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> ExecResult;
}

/// Executes commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn exec(&self, program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> ExecResult {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout reaches wrappers like `npx` and their children.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        debug!(program, ?args, cwd = %cwd.display(), "spawning child process");
        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program, error = %err, "failed to spawn command");
                return ExecResult {
                    exit_code: None,
                    stderr: format!("failed to spawn {program}: {err}"),
                    ..ExecResult::default()
                };
            }
        };

        // Drain both pipes while the child runs so a chatty process cannot block on a full pipe.
        let stdout_rx = child.stdout.take().map(spawn_reader);
        let stderr_rx = child.stderr.take().map(spawn_reader);

        let mut timed_out = false;
        let mut killed = false;
        let exit_code = match child.wait_timeout(timeout) {
            Ok(Some(status)) => status.code(),
            Ok(None) => {
                warn!(program, timeout_secs = timeout.as_secs(), "command timed out, killing");
                timed_out = true;
                killed = true;
                kill_tree(&mut child);
                None
            }
            Err(err) => {
                warn!(program, error = %err, "failed waiting for command");
                killed = true;
                kill_tree(&mut child);
                None
            }
        };

        let drain_until = if killed {
            Instant::now() + DRAIN_GRACE
        } else {
            started + timeout.max(started.elapsed() + DRAIN_GRACE)
        };
        let stdout = collect_output(stdout_rx, drain_until);
        let mut stderr = collect_output(stderr_rx, drain_until);
        if timed_out {
            stderr.push_str(&format!("\n[{program} timed out after {}s]", timeout.as_secs()));
        }

        debug!(program, exit_code = ?exit_code, timed_out, "command finished");
        ExecResult {
            exit_code,
            stdout,
            stderr,
            timed_out,
        }
    }
}

/// Kills the child's whole process group, then reaps the child.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as i32;
        // SAFETY: libc::kill only delivers a signal. The child was spawned as leader of
        // its own group and is not yet reaped, so `-pgid` cannot name a reused group.
        #[allow(unsafe_code)]
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(stream: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_limited(stream));
    });
    rx
}

/// Waits for a reader until `deadline`; late output is dropped.
fn collect_output(rx: Option<Receiver<String>>, deadline: Instant) -> String {
    rx.and_then(|rx| rx.recv_timeout(deadline.saturating_duration_since(Instant::now())).ok())
        .unwrap_or_default()
}

fn read_limited<R: Read>(mut reader: R) -> String {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = OUTPUT_LIMIT_BYTES.saturating_sub(collected.len());
                collected.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}
