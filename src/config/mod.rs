//! # Configuration Module
//!
//! Camera descriptors and supervisor tuning. Loading these from files or a
//! command line is the caller's business; this module only holds and
//! validates values.

pub mod camera;
pub mod supervisor;

pub use camera::{CameraTarget, Transport, DEFAULT_RTSP_PORT};
pub use supervisor::{AudioConfig, ConnectionConfig, RecordingConfig, StreamConfig};
