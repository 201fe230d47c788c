//! # External Media Toolchain
//!
//! The supervisors never decode or encode media themselves. They launch
//! external tools through [`ProcessSpec`]s built here, which keeps every
//! command-line contract in one place:
//!
//! - **Capture**: forced TCP transport, bounded probe, raw BGR24 frames on
//!   stdout; low-latency mode adds no-buffer, low-delay and discard-corrupt
//!   flags
//! - **Probe**: JSON stream description (width, height, frame rate, codec)
//! - **Recording**: picture track stream-copied, audio transcoded to AAC or
//!   dropped, fragmented MP4 with an early index so a killed encoder still
//!   leaves a playable file
//! - **Playback**: audio only, audio-clock synchronized, resampled to absorb
//!   source clock drift
//!
//! [`MediaToolchain`] is the seam tests use to substitute shell scripts for
//! ffmpeg and ffplay.

use crate::config::{CameraTarget, RecordingConfig};
use camwatch_process::ProcessSpec;
use std::path::{Path, PathBuf};

/// Builds the encoder and player invocations.
pub trait MediaToolchain: Send + Sync {
    /// Encoder writing one segment of `camera` to `output`.
    fn recording(
        &self,
        camera: &CameraTarget,
        output: &Path,
        record_audio: bool,
        config: &RecordingConfig,
    ) -> ProcessSpec;

    /// Best-effort live audio player.
    fn playback(&self, camera: &CameraTarget) -> ProcessSpec;
}

/// ffmpeg / ffprobe / ffplay found on `PATH` or at explicit locations.
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ffplay: PathBuf,
}

impl Default for FfmpegToolchain {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ffplay: PathBuf::from("ffplay"),
        }
    }
}

impl FfmpegToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    pub fn with_ffprobe(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe = path.into();
        self
    }

    pub fn with_ffplay(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffplay = path.into();
        self
    }

    pub fn capture_spec(&self, camera: &CameraTarget) -> ProcessSpec {
        camera_spec("capture", &self.ffmpeg, camera)
            .args(capture_args(camera))
            .with_stdin()
            .with_stdout()
    }

    pub fn probe_spec(&self, camera: &CameraTarget) -> ProcessSpec {
        camera_spec("probe", &self.ffprobe, camera)
            .args(probe_args(camera))
            .with_stdout()
    }
}

impl MediaToolchain for FfmpegToolchain {
    fn recording(
        &self,
        camera: &CameraTarget,
        output: &Path,
        record_audio: bool,
        config: &RecordingConfig,
    ) -> ProcessSpec {
        let mut builder = RecordingCommandBuilder::new(camera.connection_url(), output);
        if record_audio {
            builder = builder.with_audio(&config.audio_bitrate);
        }
        camera_spec("segment", &self.ffmpeg, camera)
            .args(builder.build())
            .with_stdin()
    }

    fn playback(&self, camera: &CameraTarget) -> ProcessSpec {
        camera_spec("audio", &self.ffplay, camera).args(playback_args(camera))
    }
}

/// Spec for a tool reading from `camera`; logs show the URL without credentials.
fn camera_spec(label: &str, program: &Path, camera: &CameraTarget) -> ProcessSpec {
    ProcessSpec::new(label, program.as_os_str()).with_redaction(camera.connection_url(), camera.display_url())
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Decoder writing raw BGR24 frames to stdout.
pub fn capture_args(camera: &CameraTarget) -> Vec<String> {
    let mut args = strings(&["-hide_banner", "-loglevel", "error", "-rtsp_transport", "tcp"]);

    if camera.transport().is_low_latency() {
        args.extend(strings(&[
            "-fflags", "nobuffer+discardcorrupt",
            "-flags", "low_delay",
            "-avioflags", "direct",
            "-analyzeduration", "500000",
            "-probesize", "500000",
        ]));
    } else {
        args.extend(strings(&[
            "-buffer_size", "8192000",
            "-fflags", "discardcorrupt",
            "-analyzeduration", "5000000",
        ]));
    }

    args.push("-i".to_string());
    args.push(camera.connection_url());
    args.extend(strings(&["-an", "-f", "rawvideo", "-pix_fmt", "bgr24", "-vsync", "0", "pipe:1"]));
    args
}

/// Stream description as JSON on stdout.
pub fn probe_args(camera: &CameraTarget) -> Vec<String> {
    let mut args = strings(&[
        "-v", "quiet",
        "-print_format", "json",
        "-show_streams",
        "-rtsp_transport", "tcp",
    ]);
    args.push(camera.connection_url());
    args
}

/// Audio-only player for the live source.
pub fn playback_args(camera: &CameraTarget) -> Vec<String> {
    let mut args = strings(&[
        "-nodisp", "-vn", "-autoexit",
        "-loglevel", "quiet",
        "-rtsp_transport", "tcp",
        "-sync", "audio",
        "-framedrop",
        "-probesize", "32768",
        "-analyzeduration", "1000000",
        "-fflags", "nobuffer+fastseek",
        "-flags", "low_delay",
        "-af", "aresample=async=1000",
        "-i",
    ]);
    args.push(camera.connection_url());
    args
}

/// Segment encoder command line.
#[derive(Debug, Clone)]
pub struct RecordingCommandBuilder {
    input_url: String,
    output_path: PathBuf,
    audio_bitrate: Option<String>,
}

impl RecordingCommandBuilder {
    pub fn new(input_url: String, output_path: &Path) -> Self {
        Self {
            input_url,
            output_path: output_path.to_path_buf(),
            audio_bitrate: None,
        }
    }

    /// Transcode audio to AAC at `bitrate` instead of dropping it.
    pub fn with_audio(mut self, bitrate: &str) -> Self {
        self.audio_bitrate = Some(bitrate.to_string());
        self
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = strings(&[
            "-hide_banner", "-loglevel", "warning",
            "-y",
            "-rtsp_transport", "tcp",
            "-fflags", "+genpts+discardcorrupt",
            "-buffer_size", "8192000",
            "-use_wallclock_as_timestamps", "1",
            "-i",
        ]);
        args.push(self.input_url.clone());
        args.extend(strings(&["-c:v", "copy", "-reset_timestamps", "1"]));

        match &self.audio_bitrate {
            Some(bitrate) => {
                args.extend(strings(&["-c:a", "aac", "-b:a"]));
                args.push(bitrate.clone());
            }
            None => args.push("-an".to_string()),
        }

        args.extend(strings(&["-movflags", "+frag_keyframe+empty_moov+default_base_moof"]));
        args.push(self.output_path.display().to_string());
        args
    }
}
