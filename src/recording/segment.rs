//! # Segment State Machine
//!
//! The retry/rotate contract of the segment loop, kept free of processes and
//! clocks so it can be tested with plain values.
//!
//! ## Verdicts
//!
//! [`SegmentPolicy::judge`] maps one observation of the running encoder to a
//! verdict. Checks run in this order:
//!
//! | Observation | Verdict |
//! |-------------|---------|
//! | stop requested | `Stop` |
//! | exited non-zero | `Crashed` |
//! | exited zero before `min_runtime` | `Crashed` |
//! | exited zero after `min_runtime` | `CleanEnd` |
//! | running, `elapsed >= segment_duration` | `Rotate` |
//! | running | `KeepRunning` |
//!
//! ## Transitions
//!
//! [`SegmentTracker::apply`] turns a verdict into what the loop does next:
//!
//! ```text
//!             begin()
//!  Starting ─────────▶ Running ──KeepRunning──▶ Running
//!     ▲                   │
//!     │   Rotate/CleanEnd │ (failures = 0, index += 1)
//!     ├─────── Rotating ◀─┤
//!     │                   │ Crashed, failures < max
//!     └─────── Retrying ◀─┤ (same index)
//!                         │ Crashed, failures == max
//!                         ├──▶ Failed
//!                         │ Stop
//!                         └──▶ Stopped
//! ```

use crate::config::RecordingConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Starting,
    Running,
    Rotating,
    Retrying,
    Failed,
    Stopped,
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSummary {
    pub success: bool,
    pub code: Option<i32>,
}

/// One poll of the running segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentObservation {
    /// `None` while the encoder is still running
    pub exit: Option<ExitSummary>,
    pub elapsed: Duration,
    pub stop_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentVerdict {
    KeepRunning,
    Rotate,
    CleanEnd,
    Crashed,
    Stop,
}

/// What the segment loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep polling the current segment
    Continue,
    /// Start the next segment number
    NextSegment,
    /// Wait, then start the same segment number again
    RetryAfter(Duration),
    /// Too many consecutive failures; end the session
    GiveUp,
    /// Stop was requested
    Finish,
}

#[derive(Debug, Clone)]
pub struct SegmentPolicy {
    pub segment_duration: Duration,
    pub min_runtime: Duration,
    pub max_failures: u32,
    pub retry_delay: Duration,
}

impl SegmentPolicy {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            segment_duration: config.segment_duration,
            min_runtime: config.min_segment_runtime,
            max_failures: config.max_consecutive_failures,
            retry_delay: config.retry_delay,
        }
    }

    pub fn judge(&self, observation: &SegmentObservation) -> SegmentVerdict {
        if observation.stop_requested {
            return SegmentVerdict::Stop;
        }
        match observation.exit {
            Some(exit) if !exit.success || observation.elapsed < self.min_runtime => SegmentVerdict::Crashed,
            Some(_) => SegmentVerdict::CleanEnd,
            None if observation.elapsed >= self.segment_duration => SegmentVerdict::Rotate,
            None => SegmentVerdict::KeepRunning,
        }
    }
}

/// Segment numbering and the consecutive-failure counter.
#[derive(Debug, Clone)]
pub struct SegmentTracker {
    policy: SegmentPolicy,
    state: SegmentState,
    index: u32,
    consecutive_failures: u32,
}

impl SegmentTracker {
    pub fn new(policy: SegmentPolicy) -> Self {
        Self {
            policy,
            state: SegmentState::Starting,
            index: 1,
            consecutive_failures: 0,
        }
    }

    pub fn policy(&self) -> &SegmentPolicy {
        &self.policy
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Number of the segment being recorded (1-based).
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Mark the current segment as running and return its number.
    pub fn begin(&mut self) -> u32 {
        self.state = SegmentState::Running;
        self.index
    }

    pub fn observe(&mut self, observation: &SegmentObservation) -> Transition {
        let verdict = self.policy.judge(observation);
        self.apply(verdict)
    }

    /// The encoder could not be launched at all.
    pub fn launch_failed(&mut self) -> Transition {
        self.apply(SegmentVerdict::Crashed)
    }

    pub fn apply(&mut self, verdict: SegmentVerdict) -> Transition {
        match verdict {
            SegmentVerdict::KeepRunning => Transition::Continue,
            SegmentVerdict::Rotate | SegmentVerdict::CleanEnd => {
                self.state = SegmentState::Rotating;
                self.consecutive_failures = 0;
                self.index += 1;
                Transition::NextSegment
            }
            SegmentVerdict::Crashed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.policy.max_failures {
                    self.state = SegmentState::Failed;
                    Transition::GiveUp
                } else {
                    self.state = SegmentState::Retrying;
                    Transition::RetryAfter(self.policy.retry_delay)
                }
            }
            SegmentVerdict::Stop => {
                self.state = SegmentState::Stopped;
                self.consecutive_failures = 0;
                Transition::Finish
            }
        }
    }
}
