//! Cooperative cancellation and bounded teardown helpers shared by the
//! supervisor threads.

use camwatch_process::{ManagedProcess, ShutdownOutcome, ShutdownPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest uninterrupted sleep inside a supervisor loop.
pub const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Stop request for one worker run, polled at every loop iteration and
/// wait point.
///
/// A flag is never re-armed. Each run gets a fresh one, so a worker that
/// outlived its stop stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in slices of at most [`WAIT_SLICE`].
    ///
    /// Returns true if cancellation was requested before the time was up.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

/// Join `handle` if it finishes within `timeout`.
///
/// Returns the handle back when the thread is still running, so the owner
/// can keep track of it instead of losing it.
pub fn join_bounded(handle: JoinHandle<()>, timeout: Duration, name: &str) -> Option<JoinHandle<()>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(thread = name, timeout_ms = timeout.as_millis() as u64, "thread did not stop in time");
            return Some(handle);
        }
        thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        warn!(thread = name, "thread panicked");
    }
    None
}

/// Run the graceful shutdown protocol and log how far it had to escalate.
pub fn stop_process(process: &mut ManagedProcess, policy: &ShutdownPolicy) -> ShutdownOutcome {
    let outcome = process.graceful_stop(policy);
    if !outcome.is_clean() && policy.quit_command.is_some() {
        debug!(label = process.label(), ?outcome, "quit request not honoured, shutdown escalated");
    } else {
        debug!(label = process.label(), ?outcome, "process stopped");
    }
    outcome
}
