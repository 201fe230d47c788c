//! # Supervisor Timing Configuration
//!
//! Every interval, timeout and retry bound the supervisors use lives here so
//! tests can scale a 30-minute segment down to a few hundred milliseconds
//! without touching the state machines.
//!
//! ## Defaults
//!
//! | Parameter | Default | Used by |
//! |-----------|---------|---------|
//! | `health_check_interval` | 5 s | connection |
//! | `frame_timeout` | 10 s | connection |
//! | `max_reconnect_attempts` | 5 | connection |
//! | `reconnect_delay` | 2 s | connection |
//! | `max_consecutive_read_failures` | 30 | connection |
//! | `drain_limit` | 3 frames | connection (low-latency) |
//! | `segment_duration` | 30 min | recording |
//! | `min_segment_runtime` | 5 s | recording |
//! | `max_consecutive_failures` | 5 | recording |
//! | `retry_delay` | 5 s | recording |
//!
//! ## Examples
//!
//! ```rust
//! use camwatch::config::StreamConfig;
//! use std::time::Duration;
//!
//! let mut config = StreamConfig::default();
//! config.recording.segment_duration = Duration::from_secs(600);
//! assert!(config.validate().is_ok());
//!
//! config.connection.frame_timeout = Duration::ZERO;
//! assert!(config.validate().is_err());
//! ```

use crate::error::{StreamError, StreamResult};
use camwatch_process::ShutdownPolicy;
use std::path::PathBuf;
use std::time::Duration;

fn require_nonzero(field: &str, value: Duration) -> StreamResult<()> {
    if value.is_zero() {
        return Err(StreamError::config(field, format!("{value:?}"), "must be greater than zero"));
    }
    Ok(())
}

fn validate_policy(prefix: &str, policy: &ShutdownPolicy) -> StreamResult<()> {
    if policy.quit_command.is_some() {
        require_nonzero(&format!("{prefix}.quit_wait"), policy.quit_wait)?;
    }
    require_nonzero(&format!("{prefix}.terminate_wait"), policy.terminate_wait)?;
    require_nonzero(&format!("{prefix}.kill_wait"), policy.kill_wait)
}

/// Live connection supervision parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How often the decode loop compares time-since-last-frame to the timeout
    pub health_check_interval: Duration,
    /// Silence longer than this marks the connection dead
    pub frame_timeout: Duration,
    /// Consecutive failed reopen attempts tolerated before giving up
    pub max_reconnect_attempts: u32,
    /// Backoff before each reopen attempt
    pub reconnect_delay: Duration,
    /// Consecutive failed reads tolerated before reconnecting
    pub max_consecutive_read_failures: u32,
    /// Queued frames discarded per iteration in low-latency mode
    pub drain_limit: usize,
    /// Upper bound on one blocking read from the decoder
    pub read_timeout: Duration,
    /// Upper bound on the stream probe at open time
    pub probe_timeout: Duration,
    /// Sleep after a failed grab in low-latency mode
    pub idle_backoff: Duration,
    /// Window over which frames-per-second is measured
    pub fps_window: Duration,
    /// Bounded wait for the decode thread on stop
    pub join_timeout: Duration,
    /// How the decoder process is stopped
    pub shutdown: ShutdownPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(5),
            frame_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(2),
            max_consecutive_read_failures: 30,
            drain_limit: 3,
            read_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
            idle_backoff: Duration::from_millis(10),
            fps_window: Duration::from_secs(1),
            join_timeout: Duration::from_secs(2),
            shutdown: ShutdownPolicy::default().with_quit_wait(Duration::from_secs(2)),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> StreamResult<()> {
        require_nonzero("connection.health_check_interval", self.health_check_interval)?;
        require_nonzero("connection.frame_timeout", self.frame_timeout)?;
        require_nonzero("connection.read_timeout", self.read_timeout)?;
        require_nonzero("connection.probe_timeout", self.probe_timeout)?;
        require_nonzero("connection.fps_window", self.fps_window)?;
        require_nonzero("connection.join_timeout", self.join_timeout)?;
        if self.frame_timeout < self.health_check_interval {
            return Err(StreamError::config(
                "connection.frame_timeout",
                format!("{:?}", self.frame_timeout),
                "must not be shorter than the health check interval",
            ));
        }
        if self.max_consecutive_read_failures == 0 || self.max_consecutive_read_failures == u32::MAX {
            return Err(StreamError::config(
                "connection.max_consecutive_read_failures",
                self.max_consecutive_read_failures.to_string(),
                "must be at least 1 and below u32::MAX",
            ));
        }
        if self.max_reconnect_attempts == u32::MAX {
            return Err(StreamError::config(
                "connection.max_reconnect_attempts",
                self.max_reconnect_attempts.to_string(),
                "must be below u32::MAX",
            ));
        }
        if self.drain_limit == 0 {
            return Err(StreamError::config("connection.drain_limit", "0", "must be at least 1"));
        }
        validate_policy("connection.shutdown", &self.shutdown)
    }
}

/// Segment recording parameters.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Parent directory for session directories
    pub output_root: PathBuf,
    /// Container extension without the dot
    pub container_ext: String,
    /// Rotate to a new file after this long
    pub segment_duration: Duration,
    /// An encoder exiting sooner than this is treated as failed
    pub min_segment_runtime: Duration,
    /// Consecutive segment failures that end the session
    pub max_consecutive_failures: u32,
    /// Wait before retrying a failed segment
    pub retry_delay: Duration,
    /// Exit/elapsed polling granularity of the segment loop
    pub poll_interval: Duration,
    /// Bounded wait for the segment loop thread on stop
    pub join_timeout: Duration,
    /// Audio bitrate when audio is transcoded into the recording
    pub audio_bitrate: String,
    /// How the segment encoder is stopped
    pub shutdown: ShutdownPolicy,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("recordings"),
            container_ext: "mp4".to_string(),
            segment_duration: Duration::from_secs(30 * 60),
            min_segment_runtime: Duration::from_secs(5),
            max_consecutive_failures: 5,
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            join_timeout: Duration::from_secs(10),
            audio_bitrate: "128k".to_string(),
            shutdown: ShutdownPolicy::default(),
        }
    }
}

impl RecordingConfig {
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn with_segment_duration(mut self, duration: Duration) -> Self {
        self.segment_duration = duration;
        self
    }

    pub fn validate(&self) -> StreamResult<()> {
        require_nonzero("recording.segment_duration", self.segment_duration)?;
        require_nonzero("recording.poll_interval", self.poll_interval)?;
        require_nonzero("recording.join_timeout", self.join_timeout)?;
        if self.container_ext.is_empty() || self.container_ext.contains('.') {
            return Err(StreamError::config(
                "recording.container_ext",
                &self.container_ext,
                "must be a non-empty extension without a dot",
            ));
        }
        if self.min_segment_runtime >= self.segment_duration {
            return Err(StreamError::config(
                "recording.min_segment_runtime",
                format!("{:?}", self.min_segment_runtime),
                "must be shorter than the segment duration",
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(StreamError::config(
                "recording.max_consecutive_failures",
                "0",
                "must be at least 1",
            ));
        }
        validate_policy("recording.shutdown", &self.shutdown)
    }
}

/// Live audio playback parameters.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// How the player is stopped; players have no quit channel
    pub shutdown: ShutdownPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            shutdown: ShutdownPolicy::terminate_only(),
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> StreamResult<()> {
        validate_policy("audio.shutdown", &self.shutdown)
    }
}

/// Complete configuration for one [`StreamManager`](crate::session::StreamManager).
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    pub connection: ConnectionConfig,
    pub recording: RecordingConfig,
    pub audio: AudioConfig,
}

impl StreamConfig {
    pub fn validate(&self) -> StreamResult<()> {
        self.connection.validate()?;
        self.recording.validate()?;
        self.audio.validate()
    }
}
