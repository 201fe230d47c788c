//! # Stream Statistics
//!
//! Aggregate counters and flags read by the presentation layer on a timer.
//! Connection fields are written by the decode thread, recording fields by
//! the segment thread; every write and every read happens under one
//! `RwLock`, and readers always get a [`StatsSnapshot`] copy.

use parking_lot::RwLock;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Point-in-time copy of all stream statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub is_connected: bool,
    pub is_recording: bool,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub latency_ms: f64,
    /// Successful reconnects since the last `start()`
    pub reconnects: u32,
    /// Segments added to the current recording session's manifest
    pub segments_recorded: u32,
}

/// Lock-protected statistics shared by the supervisors.
#[derive(Debug, Default)]
pub struct StreamStats {
    inner: RwLock<StatsSnapshot>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.read().clone()
    }

    /// Apply several field updates as one atomic write.
    pub fn update(&self, apply: impl FnOnce(&mut StatsSnapshot)) {
        apply(&mut self.inner.write());
    }

    pub fn set_stream_info(&self, width: u32, height: u32, fps: f64, codec: &str) {
        self.update(|s| {
            s.width = width;
            s.height = height;
            s.fps = fps;
            s.codec = codec.to_string();
        });
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.write().is_connected = connected;
    }

    pub fn set_recording(&self, recording: bool) {
        self.inner.write().is_recording = recording;
    }

    /// Count one decoded picture. `fps` is applied when a window closed.
    pub fn record_frame(&self, latency: Duration, fps: Option<f64>) {
        self.update(|s| {
            s.frames_received += 1;
            s.latency_ms = latency.as_secs_f64() * 1000.0;
            if let Some(fps) = fps {
                s.fps = fps;
            }
        });
    }

    pub fn record_drop(&self) {
        self.inner.write().frames_dropped += 1;
    }

    pub fn record_reconnect(&self) {
        self.inner.write().reconnects += 1;
    }

    pub fn record_segment(&self) {
        self.inner.write().segments_recorded += 1;
    }

    /// Reset connection counters for a fresh `start()`.
    pub fn reset_connection(&self) {
        self.update(|s| {
            s.frames_received = 0;
            s.frames_dropped = 0;
            s.reconnects = 0;
            s.latency_ms = 0.0;
        });
    }

    /// Reset recording counters for a fresh session.
    pub fn reset_recording(&self) {
        self.inner.write().segments_recorded = 0;
    }
}

/// Frames-per-second over fixed windows.
#[derive(Debug)]
pub struct FpsMeter {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FpsMeter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            window_start: now,
            frames: 0,
        }
    }

    /// Count a frame. Returns the rate when the current window closes.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }

    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.window_start = now;
    }
}
