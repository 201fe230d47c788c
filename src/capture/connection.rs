//! # Connection Supervisor
//!
//! Owns the live decode loop for one camera: opens the source, pulls
//! pictures into the [`FrameBuffer`], watches for silence, and reconnects
//! with a bounded number of attempts.
//!
//! ## State Machine
//!
//! ```text
//!  Idle ──start()──▶ Connecting ──ok──▶ Live ◀──────────┐
//!    ▲                   │                │ dead          │ reopened
//!    └──── open failed ──┘                ▼               │
//!                                    Reconnecting ────────┘
//!                                         │ failures > max
//!                                         ▼
//!                                       Failed
//!
//!  any started state ──stop()──▶ Stopped
//! ```
//!
//! ## Death Detection
//!
//! - **Timeout**: every `health_check_interval` the loop compares the time
//!   since the last picture with `frame_timeout`
//! - **Stall**: more than `max_consecutive_read_failures` failed reads in a row
//! - **Lost**: the source reports it is no longer open
//!
//! ## Reconnect Policy
//!
//! Each reopen is preceded by `reconnect_delay`. The counter counts failed
//! reopens since the connection died; when it exceeds
//! `max_reconnect_attempts` the supervisor enters `Failed`, reports
//! "Connection failed", and the loop exits. A successful reopen resets the
//! counter. Fatal errors from the factory (bad configuration) skip the
//! remaining attempts.
//!
//! ## Threading
//!
//! One decode thread per started supervisor. It owns the [`FrameSource`]
//! and is the only writer of the frame buffer and of the connection fields
//! in [`StreamStats`]. Every run gets its own [`CancelFlag`]; all waits go
//! through it, and source reads are bounded by `read_timeout`, so `stop()`
//! is honoured within roughly one read or one wait slice.
//!
//! A reopen blocked inside the factory can outlast `join_timeout`. The
//! supervisor then keeps the handle of the cancelled thread, and `start()`
//! refuses until that thread has exited. A cancelled loop writes nothing
//! more to the shared state.

use crate::capture::source::{FrameSource, SourceFactory};
use crate::config::{CameraTarget, ConnectionConfig};
use crate::core::{
    join_bounded, CancelFlag, FpsMeter, Frame, FrameBuffer, StatusEvent, StatusReporter, StreamStats,
};
use crate::error::{classify, StreamError, StreamResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a [`ConnectionSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Live,
    Reconnecting,
    Failed,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Answers "is the live source up right now?" for dependent supervisors.
pub trait LivenessProbe: Send + Sync {
    fn is_live(&self) -> bool;
}

impl LivenessProbe for AtomicBool {
    fn is_live(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        let previous = *state;
        if previous != next {
            trace!(from = %previous, to = %next, "connection state");
            *state = next;
        }
    }

    fn fail(&self, reason: String) {
        *self.last_error.lock() = Some(reason);
        self.set_state(ConnectionState::Failed);
    }

    /// Loop exit: everything except `Failed` ends as `Stopped`.
    fn finish(&self) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Failed {
            *state = ConnectionState::Stopped;
        }
    }
}

/// Cheap cloneable view of a supervisor's state.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Why the supervisor entered `Failed`, if it did.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }
}

impl LivenessProbe for ConnectionHandle {
    fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }
}

/// Keeps one camera's decode loop alive.
pub struct ConnectionSupervisor {
    camera: Arc<CameraTarget>,
    config: ConnectionConfig,
    factory: Arc<dyn SourceFactory>,
    frames: Arc<FrameBuffer>,
    stats: Arc<StreamStats>,
    status: StatusReporter,
    shared: Arc<Shared>,
    cancel: CancelFlag,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionSupervisor {
    pub fn new(
        camera: Arc<CameraTarget>,
        config: ConnectionConfig,
        factory: Arc<dyn SourceFactory>,
        frames: Arc<FrameBuffer>,
        stats: Arc<StreamStats>,
        status: StatusReporter,
    ) -> Self {
        Self {
            camera,
            config,
            factory,
            frames,
            stats,
            status,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Idle),
                last_error: Mutex::new(None),
            }),
            cancel: CancelFlag::new(),
            worker: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.handle().last_error()
    }

    pub fn camera(&self) -> &Arc<CameraTarget> {
        &self.camera
    }

    /// Open the source and start the decode loop.
    ///
    /// A no-op while a loop is already running. On failure the supervisor
    /// returns to `Idle` and the open error is returned. Refused while a
    /// stopped loop is still winding down.
    pub fn start(&mut self) -> StreamResult<()> {
        if let Some(worker) = self.worker.take() {
            if !self.cancel.is_cancelled() && !worker.is_finished() {
                self.worker = Some(worker);
                debug!(camera = %self.camera.display_url(), "decode loop already running");
                return Ok(());
            }
            if let Some(worker) = join_bounded(worker, self.config.join_timeout, "decode") {
                self.worker = Some(worker);
                warn!(camera = %self.camera.display_url(), "previous decode loop still stopping");
                return Err(StreamError::state(
                    "stopping",
                    "start streaming",
                    "the previous decode loop has not exited yet",
                ));
            }
        }

        self.cancel = CancelFlag::new();
        *self.shared.last_error.lock() = None;
        self.shared.set_state(ConnectionState::Connecting);
        self.status.report(StatusEvent::Connecting);
        self.stats.reset_connection();
        info!(camera = %self.camera.display_url(), transport = ?self.camera.transport(), "connecting");

        let source = match self.factory.open(&self.camera, &self.config) {
            Ok(source) => source,
            Err(e) => {
                warn!(camera = %self.camera.display_url(), error = %e, "connection failed");
                self.shared.set_state(ConnectionState::Idle);
                self.stats.set_connected(false);
                self.status.report(StatusEvent::ConnectFailed);
                return Err(e);
            }
        };

        let info = source.info();
        self.stats.set_stream_info(info.width, info.height, info.fps, &info.codec);
        self.stats.set_connected(true);
        self.shared.set_state(ConnectionState::Live);
        self.status.report(StatusEvent::Streaming);
        info!(
            camera = %self.camera.display_url(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            codec = %info.codec,
            "streaming"
        );

        let decode = DecodeLoop::new(self, source, self.cancel.clone());
        let spawned = thread::Builder::new()
            .name(format!("decode-{}", self.camera.file_stem()))
            .spawn(move || decode.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Idle);
                self.stats.set_connected(false);
                Err(StreamError::io("spawn decode thread", e))
            }
        }
    }

    /// Stop the decode loop. Idempotent; safe before `start()`.
    pub fn stop(&mut self) {
        let was_running = self.worker.is_some() && !self.cancel.is_cancelled();
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            self.worker = join_bounded(worker, self.config.join_timeout, "decode");
        }

        self.stats.set_connected(false);
        self.frames.clear();
        if self.state() != ConnectionState::Idle {
            self.shared.set_state(ConnectionState::Stopped);
        }
        if was_running {
            self.status.report(StatusEvent::Stopped);
            info!(camera = %self.camera.display_url(), "connection stopped");
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why the loop decided the connection is dead.
enum Death {
    Timeout(Duration),
    Stalled,
    Lost,
}

enum ReadOutcome {
    Frame(Frame),
    /// Nothing arrived
    Missed,
    /// Something arrived but could not be decoded
    Dropped,
}

struct DecodeLoop {
    camera: Arc<CameraTarget>,
    config: ConnectionConfig,
    factory: Arc<dyn SourceFactory>,
    frames: Arc<FrameBuffer>,
    stats: Arc<StreamStats>,
    status: StatusReporter,
    shared: Arc<Shared>,
    cancel: CancelFlag,
    source: Box<dyn FrameSource>,
    read_failures: u32,
    last_frame: Instant,
    last_health_check: Instant,
    fps: FpsMeter,
}

impl DecodeLoop {
    fn new(supervisor: &ConnectionSupervisor, source: Box<dyn FrameSource>, cancel: CancelFlag) -> Self {
        let now = Instant::now();
        Self {
            camera: Arc::clone(&supervisor.camera),
            config: supervisor.config.clone(),
            factory: Arc::clone(&supervisor.factory),
            frames: Arc::clone(&supervisor.frames),
            stats: Arc::clone(&supervisor.stats),
            status: supervisor.status.clone(),
            shared: Arc::clone(&supervisor.shared),
            cancel,
            source,
            read_failures: 0,
            last_frame: now,
            last_health_check: now,
            fps: FpsMeter::starting_at(supervisor.config.fps_window, now),
        }
    }

    fn run(mut self) {
        let low_latency = self.camera.transport().is_low_latency();
        debug!(camera = %self.camera.display_url(), low_latency, "decode loop started");

        while !self.cancel.is_cancelled() {
            if let Some(death) = self.check_health() {
                if !self.reconnect(death) {
                    break;
                }
                continue;
            }

            let started = Instant::now();
            let outcome = if low_latency { self.read_newest() } else { self.read_next() };
            match outcome {
                ReadOutcome::Frame(frame) => self.deliver(frame, started),
                failed => {
                    if matches!(failed, ReadOutcome::Dropped) {
                        self.stats.record_drop();
                    }
                    self.read_failures = self.read_failures.saturating_add(1);
                    if self.read_failures > self.config.max_consecutive_read_failures {
                        if !self.reconnect(Death::Stalled) {
                            break;
                        }
                    } else {
                        self.cancel.sleep(self.config.idle_backoff);
                    }
                }
            }
        }

        self.source.close();
        // After a stop, the supervisor owns the connection fields again.
        if !self.cancel.is_cancelled() {
            self.stats.set_connected(false);
            self.shared.finish();
        }
        debug!(camera = %self.camera.display_url(), state = %self.shared.state(), "decode loop exited");
    }

    fn check_health(&mut self) -> Option<Death> {
        if !self.source.is_open() {
            return Some(Death::Lost);
        }
        let now = Instant::now();
        if now.duration_since(self.last_health_check) < self.config.health_check_interval {
            return None;
        }
        self.last_health_check = now;
        let silent = now.duration_since(self.last_frame);
        (silent > self.config.frame_timeout).then_some(Death::Timeout(silent))
    }

    /// Standard mode: decode every picture in order.
    fn read_next(&mut self) -> ReadOutcome {
        match self.source.read() {
            Ok(Some(frame)) => ReadOutcome::Frame(frame),
            Ok(None) => ReadOutcome::Missed,
            Err(e) => {
                debug!(error = %e, "read failed");
                ReadOutcome::Dropped
            }
        }
    }

    /// Low-latency mode: skip up to `drain_limit` queued pictures, decode the newest.
    fn read_newest(&mut self) -> ReadOutcome {
        match self.source.grab() {
            Ok(true) => {}
            Ok(false) => return ReadOutcome::Missed,
            Err(e) => {
                debug!(error = %e, "grab failed");
                return ReadOutcome::Missed;
            }
        }

        let mut skipped = 0;
        while skipped < self.config.drain_limit && self.source.queued() > 0 {
            match self.source.grab() {
                Ok(true) => skipped += 1,
                _ => break,
            }
        }
        if skipped > 0 {
            trace!(skipped, "discarded stale frames");
        }

        match self.source.retrieve() {
            Ok(Some(frame)) => ReadOutcome::Frame(frame),
            Ok(None) => ReadOutcome::Dropped,
            Err(e) => {
                debug!(error = %e, "retrieve failed");
                ReadOutcome::Dropped
            }
        }
    }

    fn deliver(&mut self, frame: Frame, started: Instant) {
        if self.cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        self.last_frame = now;
        self.read_failures = 0;
        let fps = self.fps.tick(now);
        self.stats.record_frame(now.duration_since(started), fps);
        self.frames.publish(frame);
    }

    fn adopt(&mut self, source: Box<dyn FrameSource>) {
        let info = source.info();
        self.source = source;
        self.stats.set_stream_info(info.width, info.height, info.fps, &info.codec);
        self.stats.set_connected(true);
        let now = Instant::now();
        self.last_frame = now;
        self.last_health_check = now;
        self.read_failures = 0;
        self.fps.reset(now);
    }

    /// Returns false when the loop must exit (stop requested or retries exhausted).
    fn reconnect(&mut self, death: Death) -> bool {
        let camera = self.camera.display_url();
        let event = match death {
            Death::Timeout(silent) => {
                let error = StreamError::stall_timeout(silent.as_millis() as u64);
                warn!(camera = %camera, error = %error, "stream timeout");
                StatusEvent::StreamTimeout
            }
            Death::Stalled => {
                warn!(camera = %camera, failures = self.read_failures, "stream stalled");
                StatusEvent::StreamStalled
            }
            Death::Lost => {
                warn!(camera = %camera, "decoder closed");
                StatusEvent::StreamLost
            }
        };

        if self.cancel.is_cancelled() {
            return false;
        }
        self.shared.set_state(ConnectionState::Reconnecting);
        self.stats.set_connected(false);
        self.status.report(event);
        self.source.close();

        let max = self.config.max_reconnect_attempts;
        let mut failures = 0u32;
        loop {
            self.status.report(StatusEvent::Reconnecting { attempt: failures, max });
            if self.cancel.sleep(self.config.reconnect_delay) {
                return false;
            }

            let opened = self.factory.open(&self.camera, &self.config);
            if self.cancel.is_cancelled() {
                debug!(camera = %camera, "stop requested during reopen");
                return false;
            }
            match opened {
                Ok(source) => {
                    self.adopt(source);
                    self.stats.record_reconnect();
                    self.shared.set_state(ConnectionState::Live);
                    self.status.report(StatusEvent::Reconnected);
                    info!(camera = %camera, failed_attempts = failures, "reconnected");
                    return true;
                }
                Err(e) => {
                    failures = if classify::is_fatal(&e) {
                        max.saturating_add(1)
                    } else {
                        failures.saturating_add(1)
                    };
                    warn!(camera = %camera, error = %e, category = e.category(), failures, max, "reconnect attempt failed");
                    if failures > max {
                        let exhausted = StreamError::retries_exhausted("reconnect", failures);
                        error!(camera = %camera, error = %exhausted, "giving up");
                        self.shared.fail(exhausted.to_string());
                        self.status.report(StatusEvent::ConnectionFailed);
                        return false;
                    }
                }
            }
        }
    }
}
