// # Frame Sources
//
// The decode loop talks to the camera through `FrameSource`, a blocking
// grab/retrieve interface. `SourceFactory` opens one per connection attempt,
// so the connection supervisor can be driven by the ffmpeg-backed source in
// production and by scripted sources in tests.

use crate::config::{CameraTarget, ConnectionConfig};
use crate::core::Frame;
use crate::error::StreamResult;

/// Stream properties reported by the decoder at open time.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
}

/// One open connection to a camera.
///
/// Implementations must bound every blocking call by the configured read
/// timeout so the decode loop can notice a stop request.
pub trait FrameSource: Send {
    fn info(&self) -> SourceInfo;

    /// False once the underlying decoder has gone away.
    fn is_open(&self) -> bool;

    /// Advance to the next picture without converting it.
    ///
    /// `Ok(false)` means nothing arrived within the read timeout.
    fn grab(&mut self) -> StreamResult<bool>;

    /// Convert the most recently grabbed picture.
    fn retrieve(&mut self) -> StreamResult<Option<Frame>>;

    /// Grab and retrieve in one step.
    fn read(&mut self) -> StreamResult<Option<Frame>> {
        if self.grab()? {
            self.retrieve()
        } else {
            Ok(None)
        }
    }

    /// Pictures already decoded and waiting, if the source can tell.
    fn queued(&self) -> usize {
        0
    }

    /// Release the decoder. Must be idempotent.
    fn close(&mut self);
}

/// Opens a fresh [`FrameSource`] for every connection attempt.
pub trait SourceFactory: Send + Sync {
    fn open(&self, camera: &CameraTarget, config: &ConnectionConfig) -> StreamResult<Box<dyn FrameSource>>;
}
