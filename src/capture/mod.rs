// # Capture Module
//
// Live connection supervision and the decoder abstraction it drives.

pub mod connection;
pub mod ffmpeg_source;
pub mod source;

pub use connection::{ConnectionHandle, ConnectionState, ConnectionSupervisor, LivenessProbe};
pub use ffmpeg_source::FfmpegSource;
pub use source::{FrameSource, SourceFactory, SourceInfo};
