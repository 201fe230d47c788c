//! # Recording Supervisor
//!
//! Records the live camera into a session directory as a sequence of
//! time-bounded segment files, each written by its own encoder process.
//!
//! ## Architecture
//!
//! - **Caller thread**: `start()` checks liveness, creates the session
//!   directory and spawns the segment loop; `stop()` signals it and joins
//!   with a bounded wait
//! - **Segment loop thread**: owns the current encoder [`ManagedProcess`]
//!   and drives the [`SegmentTracker`] state machine
//! - **Shared state**: the [`RecordingSession`] manifest behind a mutex,
//!   the `is_recording` flag in [`StreamStats`], and a per-session
//!   [`CancelFlag`]
//!
//! When the loop outlives `join_timeout` (an encoder slow to die), its
//! handle is kept and the next `start()` is refused until it has exited.
//!
//! ## Segment Loop
//!
//! ```text
//! loop:
//!   name = next strictly-increasing segment path
//!   spawn encoder(name)            ── launch error ──▶ Crashed
//!   poll every poll_interval:
//!     stop requested   ──▶ graceful stop, keep file if non-empty, exit
//!     exited badly     ──▶ drop empty file, retry same number after delay
//!     exited cleanly   ──▶ keep file if non-empty, next number
//!     duration reached ──▶ graceful stop, keep file if non-empty, next number
//!   max consecutive failures ──▶ session ends, is_recording = false
//! ```
//!
//! Files of zero bytes never enter the manifest.

use crate::capture::LivenessProbe;
use crate::config::{CameraTarget, RecordingConfig};
use crate::core::{join_bounded, stop_process, CancelFlag, StatusEvent, StatusReporter, StreamStats};
use crate::error::{StreamError, StreamResult};
use crate::recording::segment::{
    ExitSummary, SegmentObservation, SegmentPolicy, SegmentTracker, SegmentVerdict, Transition,
};
use crate::recording::session::RecordingSession;
use crate::toolchain::MediaToolchain;
use camwatch_process::ManagedProcess;
use chrono::Local;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Encoder output lines included in a failure report.
const FAILURE_TAIL_LINES: usize = 10;
/// Wait for the encoder's stderr to drain after it exits.
const OUTPUT_DRAIN_WAIT: Duration = Duration::from_secs(1);

pub struct RecordingSupervisor {
    camera: Arc<CameraTarget>,
    config: RecordingConfig,
    toolchain: Arc<dyn MediaToolchain>,
    liveness: Arc<dyn LivenessProbe>,
    stats: Arc<StreamStats>,
    status: StatusReporter,
    cancel: CancelFlag,
    active: Arc<AtomicBool>,
    session: Option<Arc<Mutex<RecordingSession>>>,
    current: Arc<Mutex<Option<PathBuf>>>,
    worker: Option<JoinHandle<()>>,
}

impl RecordingSupervisor {
    pub fn new(
        camera: Arc<CameraTarget>,
        config: RecordingConfig,
        toolchain: Arc<dyn MediaToolchain>,
        liveness: Arc<dyn LivenessProbe>,
        stats: Arc<StreamStats>,
        status: StatusReporter,
    ) -> Self {
        Self {
            camera,
            config,
            toolchain,
            liveness,
            stats,
            status,
            cancel: CancelFlag::new(),
            active: Arc::new(AtomicBool::new(false)),
            session: None,
            current: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    /// True while the segment loop is producing files.
    ///
    /// Goes false on `stop()` and when the loop gives up after repeated
    /// segment failures.
    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn session_directory(&self) -> Option<PathBuf> {
        self.session.as_ref().map(|s| s.lock().directory().to_path_buf())
    }

    /// Completed segments of the current (or last uncollected) session.
    pub fn recorded_segments(&self) -> Vec<PathBuf> {
        self.session
            .as_ref()
            .map(|s| s.lock().segments().to_vec())
            .unwrap_or_default()
    }

    /// File the encoder is writing right now.
    pub fn current_segment(&self) -> Option<PathBuf> {
        self.current.lock().clone()
    }

    pub fn recording_duration(&self) -> Duration {
        match &self.session {
            Some(session) if self.is_recording() => session.lock().duration(),
            _ => Duration::ZERO,
        }
    }

    /// Begin a new session. Returns its directory.
    ///
    /// Refused unless the live connection is up, and while the loop of a
    /// stopped session is still winding down. While already recording,
    /// returns the current directory.
    pub fn start(&mut self, record_audio: bool) -> StreamResult<PathBuf> {
        if self.is_recording() {
            if let Some(directory) = self.session_directory() {
                return Ok(directory);
            }
        }
        if !self.liveness.is_live() {
            warn!(camera = %self.camera.display_url(), "recording refused, stream not live");
            return Err(StreamError::state(
                "not streaming",
                "start recording",
                "the live connection must be up",
            ));
        }

        // A session that ended on its own is superseded.
        if self.session.is_some() {
            self.finish();
        }
        if let Some(worker) = self.worker.take() {
            if let Some(worker) = join_bounded(worker, self.config.join_timeout, "record") {
                self.worker = Some(worker);
                warn!(camera = %self.camera.display_url(), "previous segment loop still stopping");
                return Err(StreamError::state(
                    "stopping",
                    "start recording",
                    "the previous segment loop has not exited yet",
                ));
            }
        }

        let session = RecordingSession::create(&self.config.output_root, &self.camera.file_stem(), Local::now())?;
        let directory = session.directory().to_path_buf();
        let session = Arc::new(Mutex::new(session));

        self.cancel = CancelFlag::new();
        self.active.store(true, Ordering::SeqCst);
        self.stats.reset_recording();
        self.stats.set_recording(true);

        let segment_loop = SegmentLoop {
            camera: Arc::clone(&self.camera),
            config: self.config.clone(),
            toolchain: Arc::clone(&self.toolchain),
            stats: Arc::clone(&self.stats),
            status: self.status.clone(),
            cancel: self.cancel.clone(),
            active: Arc::clone(&self.active),
            session: Arc::clone(&session),
            current: Arc::clone(&self.current),
            record_audio,
            tracker: SegmentTracker::new(SegmentPolicy::from_config(&self.config)),
        };
        let spawned = thread::Builder::new()
            .name(format!("record-{}", self.camera.file_stem()))
            .spawn(move || segment_loop.run());
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                self.stats.set_recording(false);
                return Err(StreamError::io("spawn segment loop", e));
            }
        }

        self.session = Some(session);
        info!(
            camera = %self.camera.display_url(),
            directory = %directory.display(),
            record_audio,
            "recording started"
        );
        self.status.report(StatusEvent::RecordingStarted {
            directory: directory.clone(),
        });
        Ok(directory)
    }

    /// Stop recording and return the session directory.
    ///
    /// Idempotent. `None` when there is no session to collect. The directory
    /// is returned even when it holds no segments.
    pub fn stop(&mut self) -> Option<PathBuf> {
        self.finish().map(|session| session.directory().to_path_buf())
    }

    /// Stop recording and hand back the whole session.
    pub fn finish(&mut self) -> Option<RecordingSession> {
        let session = self.session.take()?;
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            self.worker = join_bounded(worker, self.config.join_timeout, "record");
        }
        self.active.store(false, Ordering::SeqCst);
        self.stats.set_recording(false);
        self.current.lock().take();

        let session = session.lock().clone();
        info!(
            camera = %self.camera.display_url(),
            directory = %session.directory().display(),
            segments = session.segments().len(),
            "recording stopped"
        );
        self.status.report(StatusEvent::RecordingStopped {
            segments: session.segments().len(),
        });
        Some(session)
    }
}

impl Drop for RecordingSupervisor {
    fn drop(&mut self) {
        self.finish();
    }
}

struct SegmentLoop {
    camera: Arc<CameraTarget>,
    config: RecordingConfig,
    toolchain: Arc<dyn MediaToolchain>,
    stats: Arc<StreamStats>,
    status: StatusReporter,
    cancel: CancelFlag,
    active: Arc<AtomicBool>,
    session: Arc<Mutex<RecordingSession>>,
    current: Arc<Mutex<Option<PathBuf>>>,
    record_audio: bool,
    tracker: SegmentTracker,
}

impl SegmentLoop {
    fn run(mut self) {
        let stem = self.camera.file_stem();
        while !self.cancel.is_cancelled() {
            let index = self.tracker.begin();
            let path = self
                .session
                .lock()
                .next_segment_path(&stem, &self.config.container_ext, Local::now());
            *self.current.lock() = Some(path.clone());
            let transition = self.record_segment(index, &path);
            self.current.lock().take();

            match transition {
                Transition::Continue | Transition::NextSegment => {
                    self.status.report(StatusEvent::SegmentRotated { index });
                }
                Transition::RetryAfter(delay) => {
                    self.status.report(StatusEvent::SegmentFailed {
                        failures: self.tracker.consecutive_failures(),
                        max: self.tracker.policy().max_failures,
                    });
                    if self.cancel.sleep(delay) {
                        break;
                    }
                }
                Transition::GiveUp => {
                    let error = StreamError::retries_exhausted("segment recording", self.tracker.consecutive_failures());
                    error!(camera = %self.camera.display_url(), error = %error, "recording session ended");
                    self.status.report(StatusEvent::RecordingFailed);
                    break;
                }
                Transition::Finish => break,
            }
        }

        if !self.cancel.is_cancelled() {
            self.active.store(false, Ordering::SeqCst);
            self.stats.set_recording(false);
        }
        debug!(camera = %self.camera.display_url(), state = ?self.tracker.state(), "segment loop exited");
    }

    /// Run one encoder until it rotates, fails, ends or is stopped.
    fn record_segment(&mut self, index: u32, path: &Path) -> Transition {
        let spec = self
            .toolchain
            .recording(&self.camera, path, self.record_audio, &self.config);
        let mut process = match ManagedProcess::spawn(spec) {
            Ok(process) => process,
            Err(e) => {
                let error = StreamError::spawn("segment", e);
                warn!(segment = index, error = %error, "segment encoder did not start");
                discard_if_empty(path);
                return self.tracker.launch_failed();
            }
        };
        info!(segment = index, path = %path.display(), "segment started");

        let started = Instant::now();
        loop {
            let observation = SegmentObservation {
                exit: process.try_exit().map(|status| ExitSummary {
                    success: status.success(),
                    code: status.code(),
                }),
                elapsed: started.elapsed(),
                stop_requested: self.cancel.is_cancelled(),
            };
            let verdict = self.tracker.policy().judge(&observation);
            match verdict {
                SegmentVerdict::KeepRunning => {
                    self.cancel.sleep(self.config.poll_interval);
                    continue;
                }
                SegmentVerdict::Rotate | SegmentVerdict::Stop => {
                    stop_process(&mut process, &self.config.shutdown);
                    self.accept(index, path, &mut process);
                }
                SegmentVerdict::CleanEnd => {
                    info!(segment = index, "segment encoder ended by itself");
                    self.accept(index, path, &mut process);
                }
                SegmentVerdict::Crashed => {
                    let code = observation.exit.and_then(|exit| exit.code);
                    let error = StreamError::process_exit("segment", code, observation.elapsed.as_millis() as u64);
                    process.wait_output_closed(OUTPUT_DRAIN_WAIT);
                    let tail = process.output_tail();
                    let tail = &tail[tail.len().saturating_sub(FAILURE_TAIL_LINES)..];
                    warn!(
                        segment = index,
                        error = %error,
                        failures = self.tracker.consecutive_failures() + 1,
                        output = %tail.join(" | "),
                        "segment failed"
                    );
                    discard_if_empty(path);
                }
            }
            return self.tracker.apply(verdict);
        }
    }

    /// Add the finished file to the manifest if it holds data.
    fn accept(&self, index: u32, path: &Path, process: &mut ManagedProcess) {
        process.wait_output_closed(OUTPUT_DRAIN_WAIT);
        match fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => {
                self.session.lock().push_segment(path.to_path_buf());
                self.stats.record_segment();
                info!(segment = index, bytes = meta.len(), path = %path.display(), "segment completed");
            }
            Ok(_) => {
                warn!(segment = index, path = %path.display(), "segment file is empty, discarding");
                let _ = fs::remove_file(path);
            }
            Err(_) => warn!(segment = index, path = %path.display(), "segment file missing, discarding"),
        }
    }
}

fn discard_if_empty(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() == 0 {
            let _ = fs::remove_file(path);
        }
    }
}
