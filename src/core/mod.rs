//! # Core Plumbing
//!
//! State shared between the supervisor threads and the presentation layer:
//!
//! - [`frame_buffer`]: latest decoded picture plus observers
//! - [`stats`]: lock-protected counters read as snapshots
//! - [`status`]: human-readable transitions and the callback carrying them
//! - [`lifecycle`]: cooperative cancellation and bounded teardown

pub mod frame_buffer;
pub mod lifecycle;
pub mod stats;
pub mod status;

pub use frame_buffer::{Frame, FrameBuffer, FrameObserver, ObserverId, PixelFormat};
pub use lifecycle::{join_bounded, stop_process, CancelFlag, WAIT_SLICE};
pub use stats::{FpsMeter, StatsSnapshot, StreamStats};
pub use status::{StatusCallback, StatusEvent, StatusReporter};
