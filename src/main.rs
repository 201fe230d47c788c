use anyhow::{Context, Result};
use camwatch::config::{CameraTarget, StreamConfig, Transport, DEFAULT_RTSP_PORT};
use camwatch::{ConnectionState, StreamManager};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Headless camera supervisor: keeps the stream connected, optionally
/// records rotating segments and plays live audio until Ctrl-C.
#[derive(Parser, Debug)]
#[command(name = "camwatch")]
#[command(about = "Watch an RTSP camera: reconnecting live stream, segment recording, live audio")]
struct Args {
    /// Camera host name or address
    host: String,

    /// Display name, also used for recording file names
    #[arg(short, long, default_value = "camera")]
    name: String,

    #[arg(short, long, default_value_t = DEFAULT_RTSP_PORT)]
    port: u16,

    #[arg(short, long, default_value = "")]
    user: String,

    #[arg(long, env = "CAMWATCH_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Stream path on the camera, e.g. `stream1`
    #[arg(long, default_value = "")]
    path: String,

    /// Trade buffering for minimal delay
    #[arg(long)]
    low_latency: bool,

    /// Play live audio
    #[arg(long)]
    audio: bool,

    /// Start recording as soon as the stream is live
    #[arg(long)]
    record: bool,

    /// Strip audio from recordings
    #[arg(long)]
    no_record_audio: bool,

    /// Parent directory for recording sessions
    #[arg(short, long, default_value = "recordings")]
    output: PathBuf,

    #[arg(long, default_value_t = 30, help = "Minutes per recorded segment")]
    segment_minutes: u64,

    #[arg(long, default_value_t = 10, help = "Seconds between stats log lines")]
    stats_every: u64,
}

impl Args {
    fn camera(&self) -> CameraTarget {
        let transport = if self.low_latency {
            Transport::LowLatency
        } else {
            Transport::Standard
        };
        CameraTarget::new(&self.name, &self.host)
            .with_port(self.port)
            .with_credentials(&self.user, &self.password)
            .with_path(&self.path)
            .with_transport(transport)
    }

    fn config(&self) -> StreamConfig {
        let mut config = StreamConfig::default();
        config.recording = config
            .recording
            .with_output_root(&self.output)
            .with_segment_duration(Duration::from_secs(self.segment_minutes.max(1) * 60));
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let camera = args.camera();
    info!(camera = %camera.display_url(), transport = ?camera.transport(), "camwatch starting");

    let mut manager = StreamManager::builder(camera)
        .with_config(args.config())
        .on_status(|status| info!(%status, "status"))
        .build()
        .context("invalid configuration")?;

    let enable_audio = args.audio;
    let (mut manager, started) = tokio::task::spawn_blocking(move || {
        let started = manager.start(enable_audio);
        (manager, started)
    })
    .await?;
    started.context("failed to connect to camera")?;

    if args.record {
        match manager.start_recording(!args.no_record_audio) {
            Ok(directory) => info!(directory = %directory.display(), "recording"),
            Err(e) => warn!(error = %e, "recording not started"),
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.stats_every.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let stats = manager.stats();
                info!(
                    state = %manager.connection_state(),
                    width = stats.width,
                    height = stats.height,
                    fps = stats.fps,
                    codec = %stats.codec,
                    frames = stats.frames_received,
                    dropped = stats.frames_dropped,
                    latency_ms = stats.latency_ms,
                    reconnects = stats.reconnects,
                    recording = stats.is_recording,
                    segments = stats.segments_recorded,
                    "stats"
                );
                if manager.connection_state() == ConnectionState::Failed {
                    warn!(error = ?manager.last_error(), "connection failed, giving up");
                    break;
                }
            }
        }
    }

    let directory = tokio::task::spawn_blocking(move || manager.stop()).await?;
    if let Some(directory) = directory {
        println!("{}", directory.display());
    }
    Ok(())
}
