//! # Camera Stream Supervision
//!
//! Keeps a network camera's live picture available, records it into rotating
//! segment files, and plays its audio, while surviving network drops,
//! decoder crashes and misbehaving encoder processes without operator help.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `capture`: live connection supervision and the decoder abstraction
//! - `recording`: rotating segment recording and its retry state machine
//! - `audio`: best-effort live audio playback
//! - `core`: frame buffer, statistics, status events, cancellation
//! - `config`: camera descriptors and supervisor tuning
//! - `toolchain`: command lines for the external ffmpeg tools
//! - `session`: the [`StreamManager`] composition root
//!
//! Decoding and encoding are never done in-process. Every external tool runs
//! as a [`camwatch_process::ManagedProcess`] with one shared graceful
//! shutdown protocol.
//!
//! ## Threads
//!
//! | Thread | Owner | Lifetime |
//! |--------|-------|----------|
//! | `decode-{camera}` | [`ConnectionSupervisor`] | `start()` to `stop()` or `Failed` |
//! | `record-{camera}` | [`RecordingSupervisor`] | `start_recording()` to `stop_recording()` or give-up |
//! | `{label}-stderr` | each managed process | until the process exits |
//!
//! Cancellation is cooperative: every loop polls a shared flag and sleeps in
//! short slices, and every `stop()` joins with a bounded wait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use camwatch::{CameraTarget, StreamManager, Transport};
//!
//! let camera = CameraTarget::new("Garage", "10.0.0.15")
//!     .with_credentials("admin", "hunter2")
//!     .with_transport(Transport::LowLatency);
//! let mut manager = StreamManager::builder(camera).build()?;
//! manager.start(true)?;
//!
//! if let Some(frame) = manager.frame() {
//!     println!("{}x{} frame #{}", frame.width, frame.height, frame.sequence);
//! }
//! manager.stop();
//! # Ok::<(), camwatch::StreamError>(())
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod recording;
pub mod session;
pub mod toolchain;

/// Re-export error types for convenience
pub use error::{classify, ErrorSeverity, HasSeverity, Retryable, StreamError, StreamResult};

pub use audio::AudioSessionManager;
pub use capture::{ConnectionState, ConnectionSupervisor, FrameSource, SourceFactory, SourceInfo};
pub use config::{AudioConfig, CameraTarget, ConnectionConfig, RecordingConfig, StreamConfig, Transport};
pub use crate::core::{Frame, FrameBuffer, StatsSnapshot, StatusEvent, StreamStats};
pub use recording::{RecordingSession, RecordingSupervisor};
pub use session::{StreamManager, StreamManagerBuilder};
pub use toolchain::{FfmpegToolchain, MediaToolchain};

/// Re-export the process layer used by custom toolchains
pub use camwatch_process::{ProcessSpec, ShutdownPolicy};
