//! End-to-end composition with scripted sources and shell tools.

#![cfg(unix)]

mod common;

use camwatch::config::StreamConfig;
use camwatch::{ConnectionState, StreamManager};
use common::{wait_until, OpenStep, ScriptedFactory, ShellToolchain, StatusLog};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const PATIENCE: Duration = Duration::from_secs(10);

fn manager(factory: Arc<ScriptedFactory>, toolchain: Arc<ShellToolchain>) -> (StreamManager, StatusLog, TempDir) {
    let root = tempfile::tempdir().unwrap();
    let status = StatusLog::default();
    let callback = status.callback();
    let config = StreamConfig {
        connection: common::fast_connection(),
        recording: common::fast_recording(root.path(), 300),
        ..StreamConfig::default()
    };
    let manager = StreamManager::builder(common::camera())
        .with_config(config)
        .with_source_factory(factory)
        .with_toolchain(toolchain)
        .on_status(move |event| callback(event))
        .build()
        .unwrap();
    (manager, status, root)
}

#[test]
fn test_full_session() {
    let (mut manager, status, root) = manager(ScriptedFactory::steady(), ShellToolchain::new(ShellToolchain::GOOD_SEGMENT));

    let observed = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&observed);
    let id = manager.add_frame_observer(move |frame| sink.store(frame.sequence, Ordering::SeqCst));

    manager.start(true).unwrap();
    assert!(manager.is_streaming());
    assert!(manager.is_audio_playing());
    assert!(status.contains("Audio playing"));

    let directory = manager.start_recording(false).unwrap();
    assert!(directory.starts_with(root.path()));
    assert!(wait_until(PATIENCE, || manager.recorded_segments().len() >= 2));
    assert!(manager.is_recording());

    assert!(wait_until(PATIENCE, || observed.load(Ordering::SeqCst) > 5));
    assert!(manager.remove_frame_observer(id));
    let frame = manager.frame().unwrap();
    let mut copy = manager.frame_copy().unwrap();
    copy.data = Arc::new(vec![0; copy.data.len()]);
    assert_eq!(frame.data.len(), copy.data.len());

    let stats = manager.stats();
    assert!(stats.is_connected);
    assert!(stats.is_recording);
    assert!(stats.frames_received > 0);
    assert!(stats.segments_recorded >= 2);

    assert_eq!(manager.stop(), Some(directory));
    assert!(!manager.is_streaming());
    assert!(!manager.is_recording());
    assert!(!manager.is_audio_playing());
    assert_eq!(manager.connection_state(), ConnectionState::Stopped);
    assert!(manager.frame().is_none());

    // Teardown order: recording, then the connection.
    let lines = status.lines();
    let recording_stopped = lines.iter().position(|l| l.starts_with("Recording stopped")).unwrap();
    let stopped = lines.iter().position(|l| l == "Stopped").unwrap();
    assert!(recording_stopped < stopped);

    assert_eq!(manager.stop(), None);
}

#[test]
fn test_audio_failure_is_not_fatal() {
    let (mut manager, status, _root) =
        manager(ScriptedFactory::steady(), ShellToolchain::without_player(ShellToolchain::GOOD_SEGMENT));

    manager.start(true).unwrap();
    assert!(manager.is_streaming());
    assert!(!manager.is_audio_playing());
    assert!(status.lines().iter().any(|l| l.starts_with("Audio unavailable:")));

    manager.start_recording(true).unwrap();
    assert!(manager.is_recording());
    manager.stop();
}

#[test]
fn test_recording_and_audio_refused_before_start() {
    let (mut manager, _status, root) = manager(ScriptedFactory::steady(), ShellToolchain::new(ShellToolchain::GOOD_SEGMENT));

    assert!(manager.start_recording(false).is_err());
    assert!(!manager.enable_audio());
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

    manager.start(false).unwrap();
    assert!(!manager.is_audio_playing());
    assert!(manager.enable_audio());
    assert!(manager.enable_audio());
    manager.disable_audio();
    assert!(!manager.is_audio_playing());
    manager.stop();
}

#[test]
fn test_start_failure_surfaces_and_stop_is_safe() {
    let (mut manager, status, _root) =
        manager(ScriptedFactory::new([], OpenStep::Fail), ShellToolchain::new(ShellToolchain::GOOD_SEGMENT));

    assert!(manager.start(true).is_err());
    assert_eq!(manager.connection_state(), ConnectionState::Idle);
    assert!(!manager.is_audio_playing());
    assert!(status.contains("Connecting failed"));

    assert_eq!(manager.stop(), None);
    assert_eq!(manager.stop(), None);
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = StreamConfig::default();
    config.recording.max_consecutive_failures = 0;
    let err = StreamManager::builder(common::camera())
        .with_config(config)
        .build()
        .err()
        .unwrap();
    assert_eq!(err.category(), "config");
}
