//! # Stream Management
//!
//! [`StreamManager`] is the composition root for one camera. It owns the
//! three independently failing parts and the shared state between them:
//!
//! | Part | Required | Failure surfaces as |
//! |------|----------|---------------------|
//! | [`ConnectionSupervisor`] | yes | `start()` error, `Connection failed` status |
//! | [`RecordingSupervisor`] | no | `Recording failed` status, `is_recording == false` |
//! | [`AudioSessionManager`] | no | `Audio unavailable` status |
//!
//! ## Ordering
//!
//! Recording only starts while the connection is live. `stop()` tears down
//! recording, then audio, then the connection, so encoders are finalized
//! before the source they read from goes away.
//!
//! ## Example
//!
//! ```rust,no_run
//! use camwatch::config::CameraTarget;
//! use camwatch::session::StreamManager;
//!
//! let camera = CameraTarget::new("Front Door", "192.168.1.20")
//!     .with_credentials("viewer", "p@ss")
//!     .with_path("stream1");
//! let mut manager = StreamManager::builder(camera)
//!     .on_status(|status| println!("{status}"))
//!     .build()?;
//!
//! manager.start(false)?;
//! manager.start_recording(true)?;
//! // ...
//! if let Some(directory) = manager.stop() {
//!     println!("recorded to {}", directory.display());
//! }
//! # Ok::<(), camwatch::error::StreamError>(())
//! ```

// Standard library imports
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// External crate imports
use tracing::{debug, info};

// Internal module imports
use crate::audio::AudioSessionManager;
use crate::capture::{ConnectionState, ConnectionSupervisor, SourceFactory};
use crate::config::{CameraTarget, StreamConfig};
use crate::core::{
    Frame, FrameBuffer, ObserverId, StatsSnapshot, StatusCallback, StatusEvent, StatusReporter, StreamStats,
};
use crate::error::StreamResult;
use crate::recording::RecordingSupervisor;
use crate::toolchain::{FfmpegToolchain, MediaToolchain};

/// Supervises the live connection, recording and audio of one camera.
pub struct StreamManager {
    camera: Arc<CameraTarget>,
    frames: Arc<FrameBuffer>,
    stats: Arc<StreamStats>,
    connection: ConnectionSupervisor,
    recording: RecordingSupervisor,
    audio: AudioSessionManager,
}

impl StreamManager {
    pub fn builder(camera: CameraTarget) -> StreamManagerBuilder {
        StreamManagerBuilder::new(camera)
    }

    /// Open the live connection, then start audio if requested.
    ///
    /// Only the connection is required; an audio failure is reported through
    /// the status callback and does not fail this call.
    pub fn start(&mut self, enable_audio: bool) -> StreamResult<()> {
        self.connection.start()?;
        if enable_audio {
            self.audio.enable();
        }
        Ok(())
    }

    /// Tear everything down: recording, then audio, then the connection.
    ///
    /// Idempotent. Returns the recording session directory, if a session was
    /// collected.
    pub fn stop(&mut self) -> Option<PathBuf> {
        let directory = self.recording.stop();
        self.audio.disable();
        self.connection.stop();
        debug!(camera = %self.camera.display_url(), "stream manager stopped");
        directory
    }

    /// Start audio playback. Refused while the connection is not live.
    pub fn enable_audio(&mut self) -> bool {
        if !self.connection.is_live() {
            debug!(camera = %self.camera.display_url(), "audio refused, stream not live");
            return false;
        }
        self.audio.enable()
    }

    pub fn disable_audio(&mut self) {
        self.audio.disable();
    }

    pub fn is_audio_playing(&mut self) -> bool {
        self.audio.is_playing()
    }

    /// Start a recording session. Returns its directory.
    pub fn start_recording(&mut self, record_audio: bool) -> StreamResult<PathBuf> {
        self.recording.start(record_audio)
    }

    pub fn stop_recording(&mut self) -> Option<PathBuf> {
        self.recording.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn recorded_segments(&self) -> Vec<PathBuf> {
        self.recording.recorded_segments()
    }

    pub fn current_segment(&self) -> Option<PathBuf> {
        self.recording.current_segment()
    }

    pub fn recording_duration(&self) -> Duration {
        self.recording.recording_duration()
    }

    /// Latest decoded picture, shared.
    pub fn frame(&self) -> Option<Arc<Frame>> {
        self.frames.get()
    }

    /// Latest decoded picture, deep-copied for mutation.
    pub fn frame_copy(&self) -> Option<Frame> {
        self.frames.get_copy()
    }

    pub fn add_frame_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Arc<Frame>) + Send + Sync + 'static,
    {
        self.frames.add_observer(observer)
    }

    pub fn remove_frame_observer(&self, id: ObserverId) -> bool {
        self.frames.remove_observer(id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_streaming(&self) -> bool {
        self.connection.is_live()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.connection.last_error()
    }

    pub fn camera(&self) -> &CameraTarget {
        &self.camera
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fluent construction of a [`StreamManager`].
pub struct StreamManagerBuilder {
    camera: CameraTarget,
    config: StreamConfig,
    source_factory: Option<Arc<dyn SourceFactory>>,
    toolchain: Option<Arc<dyn MediaToolchain>>,
    status: Option<StatusCallback>,
}

impl StreamManagerBuilder {
    pub fn new(camera: CameraTarget) -> Self {
        Self {
            camera,
            config: StreamConfig::default(),
            source_factory: None,
            toolchain: None,
            status: None,
        }
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the ffmpeg decoder with another frame source.
    pub fn with_source_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.source_factory = Some(factory);
        self
    }

    /// Replace the ffmpeg encoder and player invocations.
    pub fn with_toolchain(mut self, toolchain: Arc<dyn MediaToolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.status = Some(Arc::new(callback));
        self
    }

    /// Validate the configuration and wire the supervisors together.
    pub fn build(self) -> StreamResult<StreamManager> {
        self.config.validate()?;

        let ffmpeg = Arc::new(FfmpegToolchain::default());
        let source_factory = self
            .source_factory
            .unwrap_or_else(|| Arc::clone(&ffmpeg) as Arc<dyn SourceFactory>);
        let toolchain = self
            .toolchain
            .unwrap_or_else(|| ffmpeg as Arc<dyn MediaToolchain>);

        let camera = Arc::new(self.camera);
        let frames = Arc::new(FrameBuffer::new());
        let stats = Arc::new(StreamStats::new());
        let status = StatusReporter::new(camera.name(), self.status);

        let connection = ConnectionSupervisor::new(
            Arc::clone(&camera),
            self.config.connection,
            source_factory,
            Arc::clone(&frames),
            Arc::clone(&stats),
            status.clone(),
        );
        let recording = RecordingSupervisor::new(
            Arc::clone(&camera),
            self.config.recording,
            Arc::clone(&toolchain),
            Arc::new(connection.handle()),
            Arc::clone(&stats),
            status.clone(),
        );
        let audio = AudioSessionManager::new(Arc::clone(&camera), self.config.audio, toolchain, status);

        info!(camera = %camera.display_url(), transport = ?camera.transport(), "stream manager ready");
        Ok(StreamManager {
            camera,
            frames,
            stats,
            connection,
            recording,
            audio,
        })
    }
}
