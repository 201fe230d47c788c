//! Human-readable status transitions and the callback that carries them.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A state change worth showing to an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connecting,
    Streaming,
    ConnectFailed,
    /// `attempt` is the number of failed reopens so far
    Reconnecting { attempt: u32, max: u32 },
    Reconnected,
    StreamTimeout,
    StreamStalled,
    StreamLost,
    ConnectionFailed,
    Stopped,
    RecordingStarted { directory: PathBuf },
    SegmentRotated { index: u32 },
    SegmentFailed { failures: u32, max: u32 },
    RecordingFailed,
    RecordingStopped { segments: usize },
    AudioStarted,
    AudioUnavailable { reason: String },
}

impl StatusEvent {
    /// True for events after which the component needs an explicit restart.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectionFailed | Self::RecordingFailed)
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting..."),
            Self::Streaming => write!(f, "Streaming"),
            Self::ConnectFailed => write!(f, "Connecting failed"),
            Self::Reconnecting { attempt: 0, .. } => write!(f, "Reconnecting..."),
            Self::Reconnecting { attempt, max } => write!(f, "Reconnecting ({attempt}/{max})..."),
            Self::Reconnected => write!(f, "Reconnected"),
            Self::StreamTimeout => write!(f, "Stream timeout - reconnecting..."),
            Self::StreamStalled => write!(f, "Stream stalled - reconnecting..."),
            Self::StreamLost => write!(f, "Stream lost - reconnecting..."),
            Self::ConnectionFailed => write!(f, "Connection failed"),
            Self::Stopped => write!(f, "Stopped"),
            Self::RecordingStarted { directory } => write!(f, "Recording to {}", directory.display()),
            Self::SegmentRotated { index } => write!(f, "Segment rotated ({index})"),
            Self::SegmentFailed { failures, max } => {
                write!(f, "Recording segment failed ({failures}/{max}) - retrying...")
            }
            Self::RecordingFailed => write!(f, "Recording failed"),
            Self::RecordingStopped { segments } => write!(f, "Recording stopped ({segments} segments)"),
            Self::AudioStarted => write!(f, "Audio playing"),
            Self::AudioUnavailable { reason } => write!(f, "Audio unavailable: {reason}"),
        }
    }
}

/// External status sink.
pub type StatusCallback = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

/// Cloneable handle every supervisor reports through.
///
/// Events are logged at `debug` and forwarded to the callback, if any. A
/// panicking callback is caught so it cannot take a supervisor thread down.
#[derive(Clone, Default)]
pub struct StatusReporter {
    camera: Arc<str>,
    callback: Option<StatusCallback>,
}

impl StatusReporter {
    pub fn new(camera: &str, callback: Option<StatusCallback>) -> Self {
        Self {
            camera: Arc::from(camera),
            callback,
        }
    }

    pub fn report(&self, event: StatusEvent) {
        debug!(camera = %self.camera, status = %event, "status");
        if let Some(callback) = &self.callback {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                warn!(camera = %self.camera, "status callback panicked");
            }
        }
    }
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("camera", &self.camera)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
