//! Best-effort live audio playback.
//!
//! One player process per camera. Launch failures and crashes are logged and
//! reported as `Audio unavailable`; nothing here ever fails the connection or
//! the recording. There is no retry loop: a dead player stays dead until
//! [`AudioSessionManager::enable`] is called again.

use crate::config::{AudioConfig, CameraTarget};
use crate::core::{stop_process, StatusEvent, StatusReporter};
use crate::error::StreamError;
use crate::toolchain::MediaToolchain;
use camwatch_process::{ManagedProcess, OutputClosedHook};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Player {
    process: ManagedProcess,
    /// Set before an intentional stop so the close hook stays quiet
    stopping: Arc<AtomicBool>,
}

pub struct AudioSessionManager {
    camera: Arc<CameraTarget>,
    config: AudioConfig,
    toolchain: Arc<dyn MediaToolchain>,
    status: StatusReporter,
    player: Option<Player>,
}

impl AudioSessionManager {
    pub fn new(
        camera: Arc<CameraTarget>,
        config: AudioConfig,
        toolchain: Arc<dyn MediaToolchain>,
        status: StatusReporter,
    ) -> Self {
        Self {
            camera,
            config,
            toolchain,
            status,
            player: None,
        }
    }

    /// True while a player process is running.
    pub fn is_playing(&mut self) -> bool {
        match &mut self.player {
            Some(player) => player.process.is_alive(),
            None => false,
        }
    }

    /// Start playback. Returns whether a player is running afterwards.
    ///
    /// A no-op while already playing. A player that died on its own is
    /// replaced.
    pub fn enable(&mut self) -> bool {
        if self.is_playing() {
            return true;
        }
        if let Some(dead) = self.player.take() {
            debug!(camera = %self.camera.display_url(), exit = ?dead.process.exit_status(), "replacing dead audio player");
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let hook = self.crash_hook(Arc::clone(&stopping));
        let spec = self.toolchain.playback(&self.camera);
        match ManagedProcess::spawn_with(spec, Some(hook)) {
            Ok(process) => {
                info!(camera = %self.camera.display_url(), pid = process.id(), "audio playing");
                self.player = Some(Player { process, stopping });
                self.status.report(StatusEvent::AudioStarted);
                true
            }
            Err(e) => {
                let error = StreamError::spawn("audio", e);
                warn!(camera = %self.camera.display_url(), error = %error, "audio unavailable");
                self.status.report(StatusEvent::AudioUnavailable {
                    reason: error.to_string(),
                });
                false
            }
        }
    }

    /// Stop playback. Idempotent.
    pub fn disable(&mut self) {
        let Some(mut player) = self.player.take() else {
            return;
        };
        player.stopping.store(true, Ordering::SeqCst);
        let outcome = stop_process(&mut player.process, &self.config.shutdown);
        debug!(camera = %self.camera.display_url(), ?outcome, "audio stopped");
    }

    fn crash_hook(&self, stopping: Arc<AtomicBool>) -> OutputClosedHook {
        let status = self.status.clone();
        let camera = self.camera.display_url();
        Box::new(move || {
            if !stopping.load(Ordering::SeqCst) {
                warn!(camera = %camera, "audio player exited");
                status.report(StatusEvent::AudioUnavailable {
                    reason: "player exited".to_string(),
                });
            }
        })
    }
}

impl Drop for AudioSessionManager {
    fn drop(&mut self) {
        self.disable();
    }
}
