// SPDX-License-Identifier: AGPL-3.0-only

//! Command executor: run one external process to completion.
//!
//! The executor knows nothing about solver output. It captures stdout and
//! stderr, derives a success flag from the exit status, and hands the
//! result back. A process that cannot be launched comes back as an
//! unsuccessful [`StageResult`] with `launch_error` set, never as a panic or
//! a separate error path.
//!
//! [`ProcessExecutor`] adds a bounded wait: with a timeout configured, a
//! child still running at the deadline is killed and reported as
//! `timed_out`, keeping whatever it printed before the kill.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::command::Command;

/// Poll interval while waiting on a child with a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long pipe readers may keep draining after a child is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured outcome of one external command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResult {
    /// Captured standard output (lossy UTF-8)
    pub stdout: String,
    /// Captured standard error (lossy UTF-8)
    pub stderr: String,
    /// True only when the process exited with status zero
    pub success: bool,
    /// Exit code; `None` if killed by a signal or never launched
    pub exit_code: Option<i32>,
    /// True if the executor killed the process at the deadline
    pub timed_out: bool,
    /// Launch failure text when the program could not be started
    pub launch_error: Option<String>,
    /// Set when the process started but waiting on it failed
    pub wait_error: Option<String>,
    /// Wall time in seconds
    pub elapsed_s: f64,
}

impl StageResult {
    /// A successful result with the given stdout. Handy for scripted executors.
    #[must_use]
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            success: true,
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A failed result with the given exit code and stderr.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    /// A result for a program that never started.
    #[must_use]
    pub fn not_launched(reason: impl Into<String>) -> Self {
        Self {
            launch_error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Last `n` lines of `text`, joined with newlines.
    #[must_use]
    pub fn tail(text: &str, n: usize) -> String {
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Anything that can run a [`Command`] and report a [`StageResult`].
///
/// The sequencer is generic over this so tests can substitute a scripted
/// executor for real processes.
pub trait Executor {
    /// Run `command` synchronously to completion.
    fn execute(&mut self, command: &Command) -> StageResult;
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn execute(&mut self, command: &Command) -> StageResult {
        (**self).execute(command)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    /// Working directory for every child; inherits ours when `None`
    pub working_dir: Option<PathBuf>,
    /// Upper bound on a single command's wall time; unbounded when `None`
    pub timeout: Option<Duration>,
}

impl ProcessExecutor {
    /// Executor running in `working_dir` with an optional timeout.
    #[must_use]
    pub const fn new(working_dir: Option<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            working_dir,
            timeout,
        }
    }
}

impl Executor for ProcessExecutor {
    fn execute(&mut self, command: &Command) -> StageResult {
        let started = Instant::now();
        let mut proc = std::process::Command::new(&command.program);
        proc.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            proc.current_dir(dir);
        }

        let mut child = match proc.spawn() {
            Ok(child) => child,
            Err(e) => {
                let mut result = StageResult::not_launched(e.to_string());
                result.elapsed_s = started.elapsed().as_secs_f64();
                return result;
            }
        };

        // Drain both pipes concurrently so a chatty child never blocks on a
        // full pipe while we poll for its exit.
        let stdout_reader = Drain::spawn(child.stdout.take());
        let stderr_reader = Drain::spawn(child.stderr.take());

        match wait_with_deadline(&mut child, self.timeout, started) {
            Ok(Some(status)) => StageResult {
                stdout: stdout_reader.join(),
                stderr: stderr_reader.join(),
                success: status.success(),
                exit_code: status.code(),
                elapsed_s: started.elapsed().as_secs_f64(),
                ..StageResult::default()
            },
            // A grandchild may still hold the pipes open, so the readers get
            // a grace period and then whatever they have collected is kept.
            Ok(None) => StageResult {
                stdout: stdout_reader.collect_within(DRAIN_GRACE),
                stderr: stderr_reader.collect_within(DRAIN_GRACE),
                timed_out: true,
                elapsed_s: started.elapsed().as_secs_f64(),
                ..StageResult::default()
            },
            Err(e) => StageResult {
                stdout: stdout_reader.collect_within(DRAIN_GRACE),
                stderr: stderr_reader.collect_within(DRAIN_GRACE),
                wait_error: Some(e.to_string()),
                elapsed_s: started.elapsed().as_secs_f64(),
                ..StageResult::default()
            },
        }
    }
}

/// Background reader filling a shared buffer from one child pipe.
struct Drain {
    handle: Option<JoinHandle<()>>,
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Drain {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0_u8; 4096];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { handle, buf }
    }

    /// Everything read once the pipe reaches end of file.
    fn join(mut self) -> String {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.snapshot()
    }

    /// Wait up to `grace` for end of file, then take what has been read.
    /// A reader still blocked after that is left detached.
    fn collect_within(mut self, grace: Duration) -> String {
        let deadline = Instant::now() + grace;
        if let Some(handle) = self.handle.take() {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(POLL_INTERVAL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        self.snapshot()
    }

    fn snapshot(&self) -> String {
        String::from_utf8_lossy(&lock(&self.buf)).into_owned()
    }
}

fn lock(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait for `child`, killing it if `timeout` elapses first.
///
/// Returns `Ok(None)` on timeout (after the kill has been reaped).
fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
    started: Instant,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
