// # ffmpeg-backed Frame Source
//
// Opening a camera is two external invocations:
//
//   ffprobe -print_format json -show_streams  ──▶ SourceInfo
//   ffmpeg ... -f rawvideo -pix_fmt bgr24 pipe:1 ──▶ reader thread ──▶ channel
//
// The reader thread cuts stdout into fixed-size pictures and pushes them into
// a small bounded crossbeam channel. `grab()` waits on that channel with the
// configured read timeout; `queued()` exposes its length so the low-latency
// loop can skip stale pictures.

use crate::capture::source::{FrameSource, SourceFactory, SourceInfo};
use crate::config::{CameraTarget, ConnectionConfig};
use crate::core::{stop_process, Frame, PixelFormat};
use crate::error::{StreamError, StreamResult};
use crate::toolchain::FfmpegToolchain;
use camwatch_process::{ManagedProcess, ShutdownPolicy};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::Deserialize;
use std::io::Read;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001`. Returns 0.0 when unknown.
pub fn parse_frame_rate(rate: &str) -> f64 {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den > 0.0 { num / den } else { 0.0 }
        }
        None => rate.trim().parse().unwrap_or(0.0),
    }
}

/// Extract the first video stream from ffprobe's JSON output.
pub fn parse_probe_output(json: &str, display_url: &str) -> StreamResult<SourceInfo> {
    let output: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| StreamError::open_failure(display_url, format!("unreadable probe output: {e}")))?;

    let video = output
        .streams
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| StreamError::open_failure(display_url, "no video stream"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(StreamError::open_failure(display_url, "video stream has no dimensions")),
    };

    Ok(SourceInfo {
        width,
        height,
        fps: video.r_frame_rate.as_deref().map(parse_frame_rate).unwrap_or(0.0),
        codec: video.codec_name.unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Run ffprobe against the camera, bounded by `timeout`.
pub fn probe(toolchain: &FfmpegToolchain, camera: &CameraTarget, timeout: Duration) -> StreamResult<SourceInfo> {
    let display_url = camera.display_url();
    let mut process = ManagedProcess::spawn(toolchain.probe_spec(camera))
        .map_err(|e| StreamError::spawn("probe", e))?;
    let mut stdout = process
        .take_stdout()
        .ok_or_else(|| StreamError::open_failure(&display_url, "probe stdout unavailable"))?;

    let (tx, rx) = bounded::<String>(1);
    thread::Builder::new()
        .name("probe-reader".to_string())
        .spawn(move || {
            let mut json = String::new();
            let _ = stdout.read_to_string(&mut json);
            let _ = tx.send(json);
        })
        .map_err(|e| StreamError::io("spawn probe reader", e))?;

    if process.wait_timeout(timeout).is_none() {
        process.graceful_stop(&ShutdownPolicy::terminate_only());
        return Err(StreamError::open_failure(&display_url, format!("probe timed out after {timeout:?}"))
            .with_operation("probe"));
    }

    let json = rx
        .recv_timeout(Duration::from_secs(1))
        .map_err(|_| StreamError::open_failure(&display_url, "probe produced no output"))?;
    parse_probe_output(&json, &display_url)
}

/// Live decoder process delivering raw BGR24 pictures.
pub struct FfmpegSource {
    process: ManagedProcess,
    frames: Receiver<Vec<u8>>,
    info: SourceInfo,
    grabbed: Option<Vec<u8>>,
    read_timeout: Duration,
    shutdown: ShutdownPolicy,
    sequence: u64,
    open: bool,
}

impl FfmpegSource {
    pub fn open(toolchain: &FfmpegToolchain, camera: &CameraTarget, config: &ConnectionConfig) -> StreamResult<Self> {
        let info = probe(toolchain, camera, config.probe_timeout)?;
        let mut process = ManagedProcess::spawn(toolchain.capture_spec(camera))
            .map_err(|e| StreamError::spawn("capture", e))?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| StreamError::open_failure(camera.display_url(), "decoder stdout unavailable"))?;

        let frame_len = Frame::packed_len(info.width, info.height, PixelFormat::Bgr24);
        let (tx, rx) = bounded(config.drain_limit + 1);
        thread::Builder::new()
            .name("capture-reader".to_string())
            .spawn(move || read_frames(stdout, frame_len, tx))
            .map_err(|e| StreamError::io("spawn capture reader", e))?;

        info!(
            camera = %camera.display_url(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            codec = %info.codec,
            "decoder started"
        );

        Ok(Self {
            process,
            frames: rx,
            info,
            grabbed: None,
            read_timeout: config.read_timeout,
            shutdown: config.shutdown.clone(),
            sequence: 0,
            open: true,
        })
    }
}

fn read_frames<R: Read>(mut stdout: R, frame_len: usize, tx: Sender<Vec<u8>>) {
    loop {
        let mut picture = vec![0u8; frame_len];
        if let Err(e) = stdout.read_exact(&mut picture) {
            debug!(error = %e, "decoder output ended");
            break;
        }
        if tx.send(picture).is_err() {
            break;
        }
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> SourceInfo {
        self.info.clone()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn grab(&mut self) -> StreamResult<bool> {
        match self.frames.recv_timeout(self.read_timeout) {
            Ok(picture) => {
                self.grabbed = Some(picture);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                self.open = false;
                Err(StreamError::read_failure("decoder output closed"))
            }
        }
    }

    fn retrieve(&mut self) -> StreamResult<Option<Frame>> {
        Ok(self.grabbed.take().map(|picture| {
            let frame = Frame::bgr24(picture, self.info.width, self.info.height, self.sequence);
            self.sequence += 1;
            frame
        }))
    }

    fn queued(&self) -> usize {
        self.frames.len()
    }

    fn close(&mut self) {
        self.open = false;
        self.grabbed = None;
        if self.process.exit_status().is_none() {
            stop_process(&mut self.process, &self.shutdown);
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl SourceFactory for FfmpegToolchain {
    fn open(&self, camera: &CameraTarget, config: &ConnectionConfig) -> StreamResult<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegSource::open(self, camera, config)?))
    }
}
