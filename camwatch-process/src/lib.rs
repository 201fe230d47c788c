// SPDX-License-Identifier: MIT
//! # Managed External Processes
//!
//! This crate wraps a single invocation of an external media tool (decoder,
//! segment encoder, audio player) and gives it one well-defined lifecycle:
//! launch with an argument vector, poll liveness without blocking, drain its
//! diagnostic output, and stop it through an escalating shutdown protocol.
//!
//! ## Architecture Overview
//!
//! - **One owner**: a [`ManagedProcess`] is owned by exactly one supervisor.
//!   Lifecycle calls take `&mut self`, so the borrow checker enforces that no
//!   two threads poll or signal the same child.
//! - **Drain thread**: stderr is always piped and read line by line on a
//!   dedicated thread so a chatty tool never blocks on a full pipe. The most
//!   recent lines are kept in a bounded tail for failure reports.
//! - **Close hook**: an optional callback fires once when the child's stderr
//!   reaches end-of-file, which in practice means the child has exited. This
//!   is how best-effort consumers learn about crashes without polling.
//!
//! ## Graceful Shutdown Protocol
//!
//! [`ManagedProcess::graceful_stop`] escalates in fixed stages:
//!
//! ```text
//! already exited? ──yes──▶ done
//!        │ no
//!        ▼
//! write quit command to stdin, close stdin ─▶ wait quit_wait
//!        │ still running
//!        ▼
//! terminate request (SIGTERM) ─▶ wait terminate_wait
//!        │ still running
//!        ▼
//! kill (SIGKILL) ─▶ wait kill_wait ─▶ abandon
//! ```
//!
//! Every signalling step is best-effort. Broken pipes, already-closed stdin
//! and signal delivery errors are logged at `debug` and swallowed; the
//! protocol always moves on to the next stage.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use camwatch_process::{ManagedProcess, ProcessSpec, ShutdownPolicy};
//!
//! let spec = ProcessSpec::new("segment", "ffmpeg")
//!     .args(["-i", "rtsp://camera/stream", "-c:v", "copy", "out.mp4"])
//!     .with_stdin();
//! let mut process = ManagedProcess::spawn(spec)?;
//! // ... later
//! let outcome = process.graceful_stop(&ShutdownPolicy::default());
//! println!("segment encoder stopped: {outcome:?}");
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Polling step used while waiting for a child to exit.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Default number of stderr lines retained for diagnostics.
pub const DEFAULT_OUTPUT_TAIL: usize = 32;

/// Hook invoked once when the child's stderr stream closes.
pub type OutputClosedHook = Box<dyn FnOnce() + Send + 'static>;

/// Launch description for one external tool invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Short name used in log records (`segment`, `capture`, `audio`)
    pub label: String,
    /// Executable name or path
    pub program: OsString,
    /// Argument vector, passed verbatim
    pub args: Vec<OsString>,
    /// Pipe stdin so a quit command can be written during shutdown
    pub stdin: bool,
    /// Pipe stdout so the owner can read the tool's primary output
    pub stdout: bool,
    /// Number of stderr lines kept for [`ManagedProcess::output_tail`]
    pub output_tail: usize,
    /// `(secret, shown_as)` substitutions applied to [`ProcessSpec::command_line`]
    pub redactions: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(label: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            stdin: false,
            stdout: false,
            output_tail: DEFAULT_OUTPUT_TAIL,
            redactions: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_stdin(mut self) -> Self {
        self.stdin = true;
        self
    }

    pub fn with_stdout(mut self) -> Self {
        self.stdout = true;
        self
    }

    pub fn with_output_tail(mut self, lines: usize) -> Self {
        self.output_tail = lines;
        self
    }

    /// Replace `secret` with `shown_as` wherever the command line is logged.
    ///
    /// The process itself still receives the unmodified arguments.
    pub fn with_redaction(mut self, secret: impl Into<String>, shown_as: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redactions.push((secret, shown_as.into()));
        }
        self
    }

    /// Program and arguments joined for log output, with redactions applied.
    pub fn command_line(&self) -> String {
        let line = std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        redact(line, &self.redactions)
    }
}

fn redact(mut text: String, redactions: &[(String, String)]) -> String {
    for (secret, shown_as) in redactions {
        if text.contains(secret.as_str()) {
            text = text.replace(secret.as_str(), shown_as);
        }
    }
    text
}

/// Timing and signalling parameters for [`ManagedProcess::graceful_stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Bytes written to stdin to ask the tool to finalize (ffmpeg: `q`).
    /// `None` skips the cooperative stage entirely.
    pub quit_command: Option<Vec<u8>>,
    /// Wait after the quit command before escalating
    pub quit_wait: Duration,
    /// Wait after the terminate request before escalating
    pub terminate_wait: Duration,
    /// Final wait after kill; tracking is abandoned afterwards
    pub kill_wait: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            quit_command: Some(b"q".to_vec()),
            quit_wait: Duration::from_secs(5),
            terminate_wait: Duration::from_secs(2),
            kill_wait: Duration::from_secs(1),
        }
    }
}

impl ShutdownPolicy {
    /// Policy for tools with no cooperative quit channel (players).
    pub fn terminate_only() -> Self {
        Self {
            quit_command: None,
            ..Self::default()
        }
    }

    pub fn with_quit_wait(mut self, wait: Duration) -> Self {
        self.quit_wait = wait;
        self
    }

    pub fn with_terminate_wait(mut self, wait: Duration) -> Self {
        self.terminate_wait = wait;
        self
    }

    pub fn with_kill_wait(mut self, wait: Duration) -> Self {
        self.kill_wait = wait;
        self
    }

    /// Upper bound on the time `graceful_stop` can take.
    pub fn worst_case(&self) -> Duration {
        let quit = if self.quit_command.is_some() {
            self.quit_wait
        } else {
            Duration::ZERO
        };
        quit + self.terminate_wait + self.kill_wait
    }
}

/// Which shutdown stage the child finally exited in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The child had already exited before shutdown began
    AlreadyExited(Option<i32>),
    /// Exited after the quit command (or stdin close)
    Quit(Option<i32>),
    /// Exited after the terminate request
    Terminated(Option<i32>),
    /// Exited after kill
    Killed(Option<i32>),
    /// Still not reaped after kill; tracking abandoned
    Abandoned,
}

impl ShutdownOutcome {
    /// True when the tool had a chance to finalize its output.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::AlreadyExited(_) | Self::Quit(_))
    }
}

/// Bounded ring of the most recent stderr lines.
#[derive(Debug)]
struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

/// One running external process and its standard streams.
pub struct ManagedProcess {
    label: String,
    child: Child,
    started: Instant,
    exit: Option<ExitStatus>,
    tail: Arc<Mutex<OutputTail>>,
    drain: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("label", &self.label)
            .field("pid", &self.child.id())
            .field("exit", &self.exit)
            .finish()
    }
}

impl ManagedProcess {
    /// Launch the process described by `spec`.
    pub fn spawn(spec: ProcessSpec) -> Result<Self> {
        Self::spawn_with(spec, None)
    }

    /// Launch the process and register a hook for when its stderr closes.
    ///
    /// The hook runs on the drain thread. It fires exactly once, whether the
    /// child exits by itself or is stopped by its owner.
    pub fn spawn_with(spec: ProcessSpec, on_output_closed: Option<OutputClosedHook>) -> Result<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(if spec.stdout { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch {} ({})", spec.label, spec.program.to_string_lossy()))?;

        debug!(label = %spec.label, pid = child.id(), command = %spec.command_line(), "process started");

        let tail = Arc::new(Mutex::new(OutputTail::new(spec.output_tail)));
        let drain = match child.stderr.take() {
            Some(stderr) => {
                let label = spec.label.clone();
                let redactions = spec.redactions.clone();
                let tail = Arc::clone(&tail);
                let spawned = thread::Builder::new()
                    .name(format!("{}-stderr", spec.label))
                    .spawn(move || drain_output(stderr, &label, &redactions, &tail, on_output_closed));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e).context("failed to start stderr drain thread");
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            label: spec.label,
            child,
            started: Instant::now(),
            exit: None,
            tail,
            drain,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Time since launch.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking liveness poll.
    pub fn is_alive(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Non-blocking exit check. Caches the status once observed.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(label = %self.label, status = %status, uptime_ms = self.uptime().as_millis() as u64, "process exited");
                    self.exit = Some(status);
                }
                Ok(None) => {}
                Err(e) => warn!(label = %self.label, error = %e, "failed to poll process"),
            }
        }
        self.exit
    }

    /// Last observed exit status, without polling.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Hand the stdout pipe to the caller (only once; requires `with_stdout`).
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Most recent stderr lines, oldest first.
    pub fn output_tail(&self) -> Vec<String> {
        self.tail.lock().lines.iter().cloned().collect()
    }

    /// Wait up to `timeout` for the stderr drain thread to finish.
    ///
    /// Returns true when all output has been consumed.
    pub fn wait_output_closed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = match &self.drain {
                None => return true,
                Some(handle) => handle.is_finished(),
            };
            if finished {
                if let Some(handle) = self.drain.take() {
                    let _ = handle.join();
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL);
        }
    }

    /// Block until the process exits or `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_exit() {
                return Some(status);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(EXIT_POLL.min(deadline - now));
        }
    }

    /// Stop the process using the escalation described in the crate docs.
    ///
    /// Never fails; signalling errors are swallowed.
    pub fn graceful_stop(&mut self, policy: &ShutdownPolicy) -> ShutdownOutcome {
        if let Some(status) = self.try_exit() {
            return ShutdownOutcome::AlreadyExited(status.code());
        }

        // Cooperative quit. Dropping stdin also delivers EOF to tools
        // that finalize on end of input.
        if let Some(mut stdin) = self.child.stdin.take() {
            if let Some(command) = &policy.quit_command {
                if let Err(e) = stdin.write_all(command).and_then(|_| stdin.flush()) {
                    debug!(label = %self.label, error = %e, "quit command not delivered");
                }
            }
            drop(stdin);
            if policy.quit_command.is_some() {
                if let Some(status) = self.wait_timeout(policy.quit_wait) {
                    return ShutdownOutcome::Quit(status.code());
                }
                debug!(label = %self.label, "no exit after quit command, terminating");
            }
        }

        self.terminate();
        if let Some(status) = self.wait_timeout(policy.terminate_wait) {
            return ShutdownOutcome::Terminated(status.code());
        }

        warn!(label = %self.label, pid = self.child.id(), "process ignored terminate request, killing");
        if let Err(e) = self.child.kill() {
            debug!(label = %self.label, error = %e, "kill failed");
        }
        match self.wait_timeout(policy.kill_wait) {
            Some(status) => ShutdownOutcome::Killed(status.code()),
            None => {
                warn!(label = %self.label, pid = self.child.id(), "process not reaped after kill, abandoning");
                ShutdownOutcome::Abandoned
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            debug!(label = %self.label, error = %e, "terminate signal failed");
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(label = %self.label, error = %e, "terminate failed");
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.try_exit().is_none() {
            debug!(label = %self.label, pid = self.child.id(), "dropping live process, killing");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Read stderr until EOF, keeping the tail and logging each line.
///
/// ffmpeg rewrites its progress line with carriage returns, so both `\r`
/// and `\n` end a line here. Tools echo their input URL in errors, so the
/// spec's redactions apply to every line.
fn drain_output<R: Read>(
    stream: R,
    label: &str,
    redactions: &[(String, String)],
    tail: &Mutex<OutputTail>,
    on_closed: Option<OutputClosedHook>,
) {
    let mut reader = BufReader::new(stream);
    let mut chunk = Vec::with_capacity(256);
    loop {
        chunk.clear();
        match reader.read_until(b'\n', &mut chunk) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&chunk);
                for line in text.split(['\r', '\n']).map(str::trim_end).filter(|l| !l.is_empty()) {
                    let line = redact(line.to_string(), redactions);
                    trace!(label = %label, "{line}");
                    tail.lock().push(line);
                }
            }
            Err(e) => {
                debug!(label = %label, error = %e, "stderr read failed");
                break;
            }
        }
    }
    if let Some(hook) = on_closed {
        hook();
    }
}
