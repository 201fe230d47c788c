//! Shared fakes for the integration tests.
//!
//! - [`ScriptedFactory`]: a `SourceFactory` whose opens succeed, fail or
//!   stall in a programmed order and whose sources deliver frames at a fixed
//!   cadence, optionally with a silent gap, failing reads, a reported
//!   backlog or a limited lifetime. It counts how many sources are open.
//! - [`ShellToolchain`]: a `MediaToolchain` running `sh -c` stand-ins for
//!   the segment encoder and the audio player
//! - [`StatusLog`]: records every status line

#![allow(dead_code)]

use camwatch::config::{CameraTarget, ConnectionConfig, RecordingConfig};
use camwatch::core::{Frame, StatusCallback, StatusEvent, StatusReporter};
use camwatch::error::{StreamError, StreamResult};
use camwatch::{FrameSource, MediaToolchain, ProcessSpec, SourceFactory, SourceInfo};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 4;

/// Connection timings scaled down from seconds to tens of milliseconds.
pub fn fast_connection() -> ConnectionConfig {
    ConnectionConfig {
        health_check_interval: Duration::from_millis(50),
        frame_timeout: Duration::from_millis(300),
        reconnect_delay: Duration::from_millis(20),
        read_timeout: Duration::from_millis(50),
        idle_backoff: Duration::from_millis(5),
        fps_window: Duration::from_millis(200),
        join_timeout: Duration::from_secs(3),
        ..ConnectionConfig::default()
    }
}

/// Recording timings scaled down; segments last `segment_ms`.
pub fn fast_recording(output_root: &Path, segment_ms: u64) -> RecordingConfig {
    RecordingConfig {
        output_root: output_root.to_path_buf(),
        segment_duration: Duration::from_millis(segment_ms),
        min_segment_runtime: Duration::from_millis(50),
        retry_delay: Duration::from_millis(20),
        poll_interval: Duration::from_millis(20),
        join_timeout: Duration::from_secs(5),
        ..RecordingConfig::default()
    }
}

pub fn camera() -> CameraTarget {
    CameraTarget::new("Test Cam", "127.0.0.1")
        .with_credentials("admin", "pa:ss@word")
        .with_path("live")
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Behaviour of one opened source.
#[derive(Debug, Clone)]
pub struct SourceScript {
    pub frame_interval: Duration,
    /// `(offset, length)` of a window with no frames
    pub silent_gap: Option<(Duration, Duration)>,
    /// The decoder goes away after this long
    pub lifetime: Option<Duration>,
    /// Every read fails from this offset on, while the source stays open
    pub failing_after: Option<Duration>,
    /// Pictures the source claims are waiting; every grab consumes one
    pub backlog: usize,
}

impl SourceScript {
    pub fn steady() -> Self {
        Self {
            frame_interval: Duration::from_millis(10),
            silent_gap: None,
            lifetime: None,
            failing_after: None,
            backlog: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_gap(mut self, offset: Duration, length: Duration) -> Self {
        self.silent_gap = Some((offset, length));
        self
    }

    pub fn ending_after(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn failing_after(mut self, offset: Duration) -> Self {
        self.failing_after = Some(offset);
        self
    }

    pub fn with_backlog(mut self, queued: usize) -> Self {
        self.backlog = queued;
        self
    }
}

/// Result of one `open()` call.
#[derive(Debug, Clone)]
pub enum OpenStep {
    Succeed(SourceScript),
    /// Blocks inside `open` for the given time, then succeeds
    Slow(Duration, SourceScript),
    Fail,
    /// A configuration error; retrying cannot help
    FailFatal,
}

/// Open sources right now and the most ever open at once.
#[derive(Debug, Default)]
pub struct LiveSources {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl LiveSources {
    fn opened(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedFactory {
    steps: Mutex<VecDeque<OpenStep>>,
    otherwise: OpenStep,
    opens: AtomicUsize,
    live: Arc<LiveSources>,
}

impl ScriptedFactory {
    /// Opens follow `steps` in order, then `otherwise` forever.
    pub fn new(steps: impl IntoIterator<Item = OpenStep>, otherwise: OpenStep) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            otherwise,
            opens: AtomicUsize::new(0),
            live: Arc::new(LiveSources::default()),
        })
    }

    pub fn steady() -> Arc<Self> {
        Self::new([], OpenStep::Succeed(SourceScript::steady()))
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn live_sources(&self) -> usize {
        self.live.current.load(Ordering::SeqCst)
    }

    pub fn peak_live_sources(&self) -> usize {
        self.live.peak.load(Ordering::SeqCst)
    }
}

impl SourceFactory for ScriptedFactory {
    fn open(&self, camera: &CameraTarget, config: &ConnectionConfig) -> StreamResult<Box<dyn FrameSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front().unwrap_or_else(|| self.otherwise.clone());
        let live = Arc::clone(&self.live);
        match step {
            OpenStep::Succeed(script) => Ok(Box::new(ScriptedSource::new(script, config.read_timeout, live))),
            OpenStep::Slow(delay, script) => {
                thread::sleep(delay);
                Ok(Box::new(ScriptedSource::new(script, config.read_timeout, live)))
            }
            OpenStep::Fail => Err(StreamError::open_failure(camera.display_url(), "connection refused")),
            OpenStep::FailFatal => Err(StreamError::config("camera.path", "", "rejected by camera")),
        }
    }
}

pub struct ScriptedSource {
    script: SourceScript,
    read_timeout: Duration,
    opened: Instant,
    next_due: Instant,
    /// Successful grabs so far; the retrieved frame carries `grabs - 1`
    grabs: u64,
    grabbed: bool,
    closed: bool,
    live: Arc<LiveSources>,
}

impl ScriptedSource {
    fn new(script: SourceScript, read_timeout: Duration, live: Arc<LiveSources>) -> Self {
        let now = Instant::now();
        live.opened();
        Self {
            script,
            read_timeout,
            opened: now,
            next_due: now,
            grabs: 0,
            grabbed: false,
            closed: false,
            live,
        }
    }

    fn expired(&self) -> bool {
        self.script
            .lifetime
            .is_some_and(|lifetime| self.opened.elapsed() >= lifetime)
    }

    /// Time left in the silent gap, if inside it.
    fn gap_remaining(&self) -> Option<Duration> {
        let (offset, length) = self.script.silent_gap?;
        let elapsed = self.opened.elapsed();
        (elapsed >= offset && elapsed < offset + length).then(|| offset + length - elapsed)
    }
}

impl FrameSource for ScriptedSource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            width: WIDTH,
            height: HEIGHT,
            fps: 1.0 / self.script.frame_interval.as_secs_f64(),
            codec: "h264".to_string(),
        }
    }

    fn is_open(&self) -> bool {
        !self.closed && !self.expired()
    }

    fn grab(&mut self) -> StreamResult<bool> {
        if !self.is_open() {
            return Err(StreamError::read_failure("source closed"));
        }
        if self.script.failing_after.is_some_and(|offset| self.opened.elapsed() >= offset) {
            return Err(StreamError::read_failure("corrupt packet"));
        }
        if let Some(remaining) = self.gap_remaining() {
            thread::sleep(remaining.min(self.read_timeout));
            return Ok(false);
        }
        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.script.frame_interval;
        self.grabs += 1;
        self.grabbed = true;
        Ok(true)
    }

    fn retrieve(&mut self) -> StreamResult<Option<Frame>> {
        if !std::mem::take(&mut self.grabbed) {
            return Ok(None);
        }
        let sequence = self.grabs - 1;
        let fill = (sequence % 251) as u8;
        let len = (WIDTH * HEIGHT * 3) as usize;
        Ok(Some(Frame::bgr24(vec![fill; len], WIDTH, HEIGHT, sequence)))
    }

    fn queued(&self) -> usize {
        self.script.backlog
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.live.closed();
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// `sh -c` stand-ins for the encoder and the player.
///
/// The segment script receives the output path as `$1`.
pub struct ShellToolchain {
    pub segment_script: &'static str,
    /// `None` makes the player fail to launch
    pub player_script: Option<&'static str>,
}

impl ShellToolchain {
    /// Writes a few bytes, then runs until stdin closes.
    pub const GOOD_SEGMENT: &'static str = "printf segment > \"$1\"; exec cat > /dev/null";
    /// Creates the file but never writes to it.
    pub const EMPTY_SEGMENT: &'static str = ": > \"$1\"; exec cat > /dev/null";
    pub const CRASHING_SEGMENT: &'static str = "echo 'rtsp: connection refused' >&2; exit 1";
    /// Writes a few bytes, then ignores both the quit request and SIGTERM.
    pub const STUBBORN_SEGMENT: &'static str = "trap '' TERM; printf segment > \"$1\"; exec sleep 5";
    pub const PLAYER: &'static str = "exec sleep 30";

    pub fn new(segment_script: &'static str) -> Arc<Self> {
        Arc::new(Self {
            segment_script,
            player_script: Some(Self::PLAYER),
        })
    }

    pub fn without_player(segment_script: &'static str) -> Arc<Self> {
        Arc::new(Self {
            segment_script,
            player_script: None,
        })
    }
}

impl MediaToolchain for ShellToolchain {
    fn recording(&self, _camera: &CameraTarget, output: &Path, _record_audio: bool, _config: &RecordingConfig) -> ProcessSpec {
        ProcessSpec::new("segment", "sh")
            .arg("-c")
            .arg(self.segment_script)
            .arg("sh")
            .arg(output.as_os_str())
            .with_stdin()
    }

    fn playback(&self, _camera: &CameraTarget) -> ProcessSpec {
        match self.player_script {
            Some(script) => ProcessSpec::new("audio", "sh").args(["-c", script]),
            None => ProcessSpec::new("audio", "/nonexistent/camwatch-player"),
        }
    }
}

/// Collects status lines in order.
#[derive(Clone, Default)]
pub struct StatusLog(Arc<Mutex<Vec<String>>>);

impl StatusLog {
    pub fn callback(&self) -> StatusCallback {
        let lines = Arc::clone(&self.0);
        Arc::new(move |event: &StatusEvent| lines.lock().push(event.to_string()))
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new("Test Cam", Some(self.callback()))
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.0.lock().iter().any(|l| l == line)
    }

    pub fn count(&self, line: &str) -> usize {
        self.0.lock().iter().filter(|l| *l == line).count()
    }
}
