// # Recording Module
//
// Rotating segment recording of the live camera: the segment retry/rotate
// state machine, the on-disk session manifest, and the supervisor thread
// that ties them to encoder processes.

pub mod recorder;
pub mod segment;
pub mod session;

pub use recorder::RecordingSupervisor;
pub use segment::{
    ExitSummary, SegmentObservation, SegmentPolicy, SegmentState, SegmentTracker, SegmentVerdict, Transition,
};
pub use session::{RecordingSession, TIMESTAMP_FORMAT, TIMESTAMP_FORMAT_MILLIS};
