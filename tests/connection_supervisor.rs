//! Connection supervisor behaviour against scripted sources.

mod common;

use camwatch::capture::{ConnectionState, ConnectionSupervisor};
use camwatch::config::{ConnectionConfig, Transport};
use camwatch::core::{FrameBuffer, StreamStats};
use common::{fast_connection, wait_until, OpenStep, ScriptedFactory, SourceScript, StatusLog};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Harness {
    supervisor: ConnectionSupervisor,
    factory: Arc<ScriptedFactory>,
    frames: Arc<FrameBuffer>,
    stats: Arc<StreamStats>,
    status: StatusLog,
}

fn harness(factory: Arc<ScriptedFactory>, config: ConnectionConfig) -> Harness {
    harness_with(factory, config, Transport::Standard)
}

fn harness_with(factory: Arc<ScriptedFactory>, config: ConnectionConfig, transport: Transport) -> Harness {
    let frames = Arc::new(FrameBuffer::new());
    let stats = Arc::new(StreamStats::new());
    let status = StatusLog::default();
    let supervisor = ConnectionSupervisor::new(
        Arc::new(common::camera().with_transport(transport)),
        config,
        factory.clone(),
        Arc::clone(&frames),
        Arc::clone(&stats),
        status.reporter(),
    );
    Harness {
        supervisor,
        factory,
        frames,
        stats,
        status,
    }
}

const PATIENCE: Duration = Duration::from_secs(5);

#[test]
fn test_start_delivers_frames() {
    let mut h = harness(ScriptedFactory::steady(), fast_connection());
    h.supervisor.start().unwrap();
    assert_eq!(h.supervisor.state(), ConnectionState::Live);

    assert!(wait_until(PATIENCE, || h.stats.snapshot().frames_received >= 10));
    let frame = h.frames.get().expect("a frame is published");
    assert_eq!((frame.width, frame.height), (common::WIDTH, common::HEIGHT));
    assert_eq!(frame.data.len(), (common::WIDTH * common::HEIGHT * 3) as usize);

    let stats = h.stats.snapshot();
    assert!(stats.is_connected);
    assert_eq!(stats.codec, "h264");
    assert_eq!(h.status.lines()[..2], ["Connecting...", "Streaming"]);

    h.supervisor.stop();
    assert_eq!(h.supervisor.state(), ConnectionState::Stopped);
    assert!(!h.stats.snapshot().is_connected);
    assert!(h.frames.get().is_none());
}

#[test]
fn test_low_latency_mode_delivers_frames() {
    let mut h = harness_with(ScriptedFactory::steady(), fast_connection(), Transport::LowLatency);
    h.supervisor.start().unwrap();
    assert!(wait_until(PATIENCE, || h.stats.snapshot().frames_received >= 10));
    h.supervisor.stop();
}

#[test]
fn test_recovers_after_max_failed_reopens() {
    let config = fast_connection();
    let max = config.max_reconnect_attempts as usize;
    let mut steps = vec![OpenStep::Succeed(SourceScript::steady().ending_after(Duration::from_millis(100)))];
    steps.extend(std::iter::repeat(OpenStep::Fail).take(max));
    let factory = ScriptedFactory::new(steps, OpenStep::Succeed(SourceScript::steady()));

    let mut h = harness(factory, config);
    h.supervisor.start().unwrap();

    assert!(wait_until(PATIENCE, || h.stats.snapshot().reconnects == 1));
    assert_eq!(h.supervisor.state(), ConnectionState::Live);
    assert_eq!(h.factory.opens(), 1 + max + 1);
    assert!(h.status.contains("Stream lost - reconnecting..."));
    assert!(h.status.contains("Reconnecting..."));
    assert!(h.status.contains(&format!("Reconnecting ({max}/{max})...")));
    assert!(h.status.contains("Reconnected"));

    let received = h.stats.snapshot().frames_received;
    assert!(wait_until(PATIENCE, || h.stats.snapshot().frames_received > received + 5));
    assert!(h.stats.snapshot().is_connected);
    h.supervisor.stop();
}

#[test]
fn test_fails_after_one_too_many_reopens() {
    let config = fast_connection();
    let max = config.max_reconnect_attempts as usize;
    let factory = ScriptedFactory::new(
        [OpenStep::Succeed(SourceScript::steady().ending_after(Duration::from_millis(100)))],
        OpenStep::Fail,
    );

    let mut h = harness(factory, config);
    h.supervisor.start().unwrap();

    assert!(wait_until(PATIENCE, || h.supervisor.state() == ConnectionState::Failed));
    assert_eq!(h.factory.opens(), 1 + max + 1);
    assert!(h.status.contains("Connection failed"));
    assert!(h.supervisor.last_error().is_some());
    assert!(!h.stats.snapshot().is_connected);

    // No further attempts without an explicit restart.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(h.factory.opens(), 1 + max + 1);
    assert_eq!(h.supervisor.state(), ConnectionState::Failed);

    h.supervisor.stop();
    assert_eq!(h.supervisor.state(), ConnectionState::Stopped);

    // Explicit restart tries again; the open fails and the supervisor idles.
    assert!(h.supervisor.start().is_err());
    assert_eq!(h.supervisor.state(), ConnectionState::Idle);
    assert_eq!(h.factory.opens(), 1 + max + 2);
    assert!(h.status.contains("Connecting failed"));
}

#[test]
fn test_fatal_open_error_skips_remaining_attempts() {
    let factory = ScriptedFactory::new(
        [
            OpenStep::Succeed(SourceScript::steady().ending_after(Duration::from_millis(100))),
            OpenStep::FailFatal,
        ],
        OpenStep::Succeed(SourceScript::steady()),
    );

    let mut h = harness(factory, fast_connection());
    h.supervisor.start().unwrap();
    assert!(wait_until(PATIENCE, || h.supervisor.state() == ConnectionState::Failed));
    assert_eq!(h.factory.opens(), 2);
    h.supervisor.stop();
}

#[test]
fn test_silent_gap_causes_exactly_one_reconnect() {
    // Scaled: frames for 2 s with a 600 ms gap at 500 ms, timeout 300 ms
    // checked every 50 ms.
    let first = SourceScript::steady().with_gap(Duration::from_millis(500), Duration::from_millis(600));
    let factory = ScriptedFactory::new([OpenStep::Succeed(first)], OpenStep::Succeed(SourceScript::steady()));

    let mut h = harness(factory, fast_connection());
    h.supervisor.start().unwrap();

    thread::sleep(Duration::from_millis(2000));
    let stats = h.stats.snapshot();
    assert_eq!(stats.reconnects, 1);
    assert!(stats.is_connected);
    assert_eq!(h.supervisor.state(), ConnectionState::Live);
    assert_eq!(h.factory.opens(), 2);
    assert_eq!(h.status.count("Stream timeout - reconnecting..."), 1);

    let received = stats.frames_received;
    assert!(wait_until(PATIENCE, || h.stats.snapshot().frames_received > received));
    h.supervisor.stop();
}

#[test]
fn test_low_latency_skips_queued_frames() {
    let config = fast_connection();
    let stride = config.drain_limit as u64 + 1;
    let script = SourceScript::steady()
        .with_interval(Duration::from_millis(2))
        .with_backlog(100);
    let factory = ScriptedFactory::new([], OpenStep::Succeed(script));

    let mut h = harness_with(factory, config, Transport::LowLatency);
    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&published);
    h.frames.add_observer(move |frame| sink.lock().push(frame.sequence));

    h.supervisor.start().unwrap();
    assert!(wait_until(PATIENCE, || published.lock().len() >= 10));
    h.supervisor.stop();

    let sequences = published.lock().clone();
    assert_eq!(sequences[0], stride - 1);
    assert!(
        sequences.windows(2).all(|w| w[1] - w[0] == stride),
        "sequences: {sequences:?}"
    );
    assert_eq!(h.stats.snapshot().frames_dropped, 0);
}

#[test]
fn test_repeated_read_failures_trigger_one_reconnect() {
    let config = ConnectionConfig {
        frame_timeout: Duration::from_secs(2),
        ..fast_connection()
    };
    let limit = config.max_consecutive_read_failures as u64;
    let first = SourceScript::steady().failing_after(Duration::from_millis(150));
    let factory = ScriptedFactory::new([OpenStep::Succeed(first)], OpenStep::Succeed(SourceScript::steady()));

    let mut h = harness(factory, config);
    h.supervisor.start().unwrap();

    assert!(wait_until(PATIENCE, || h.stats.snapshot().reconnects == 1));
    assert_eq!(h.supervisor.state(), ConnectionState::Live);
    assert_eq!(h.factory.opens(), 2);
    assert_eq!(h.status.count("Stream stalled - reconnecting..."), 1);
    assert_eq!(h.status.count("Stream timeout - reconnecting..."), 0);
    assert!(h.status.contains("Reconnected"));
    assert!(h.stats.snapshot().frames_dropped > limit);

    let received = h.stats.snapshot().frames_received;
    assert!(wait_until(PATIENCE, || h.stats.snapshot().frames_received > received + 5));
    assert_eq!(h.status.count("Stream stalled - reconnecting..."), 1);
    h.supervisor.stop();
}

#[test]
fn test_restart_waits_for_loop_stuck_in_reopen() {
    let config = ConnectionConfig {
        join_timeout: Duration::from_millis(100),
        ..fast_connection()
    };
    let factory = ScriptedFactory::new(
        [
            OpenStep::Succeed(SourceScript::steady().ending_after(Duration::from_millis(100))),
            OpenStep::Slow(Duration::from_millis(800), SourceScript::steady()),
        ],
        OpenStep::Succeed(SourceScript::steady()),
    );

    let mut h = harness(factory, config);
    h.supervisor.start().unwrap();
    assert!(wait_until(PATIENCE, || h.factory.opens() == 2));

    // The loop is blocked inside the slow reopen and outlives the join.
    h.supervisor.stop();
    assert_eq!(h.supervisor.state(), ConnectionState::Stopped);
    let err = h.supervisor.start().unwrap_err();
    assert_eq!(err.category(), "state");
    assert_eq!(h.factory.opens(), 2);

    // Once the reopen returns, the cancelled loop must not revive anything.
    thread::sleep(Duration::from_millis(900));
    assert_eq!(h.supervisor.state(), ConnectionState::Stopped);
    assert!(!h.stats.snapshot().is_connected);
    assert!(h.frames.get().is_none());
    assert_eq!(h.factory.live_sources(), 0);

    assert!(wait_until(PATIENCE, || h.supervisor.start().is_ok()));
    assert_eq!(h.supervisor.state(), ConnectionState::Live);
    assert_eq!(h.factory.opens(), 3);
    assert!(wait_until(PATIENCE, || h.stats.snapshot().frames_received >= 5));
    assert_eq!(h.factory.live_sources(), 1);
    assert_eq!(h.factory.peak_live_sources(), 1);
    assert_eq!(h.status.count("Stopped"), 1);
    h.supervisor.stop();
}

#[test]
fn test_start_failure_returns_to_idle() {
    let factory = ScriptedFactory::new([], OpenStep::Fail);
    let mut h = harness(factory, fast_connection());

    let err = h.supervisor.start().unwrap_err();
    assert_eq!(err.category(), "open_failure");
    assert_eq!(h.supervisor.state(), ConnectionState::Idle);
    assert_eq!(h.status.lines(), ["Connecting...", "Connecting failed"]);

    // Never started: stop is a quiet no-op.
    h.supervisor.stop();
    assert_eq!(h.supervisor.state(), ConnectionState::Idle);
    assert_eq!(h.status.lines().len(), 2);
}

#[test]
fn test_stop_is_idempotent() {
    let mut h = harness(ScriptedFactory::steady(), fast_connection());
    h.supervisor.stop();
    h.supervisor.start().unwrap();
    h.supervisor.start().unwrap();
    assert_eq!(h.factory.opens(), 1);

    h.supervisor.stop();
    h.supervisor.stop();
    assert_eq!(h.supervisor.state(), ConnectionState::Stopped);
    assert_eq!(h.status.count("Stopped"), 1);

    let frozen = h.stats.snapshot().frames_received;
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.stats.snapshot().frames_received, frozen);
}

#[test]
fn test_panicking_observer_does_not_stop_capture() {
    let mut h = harness(ScriptedFactory::steady(), fast_connection());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    h.frames.add_observer(|_| panic!("observer bug"));
    h.frames.add_observer(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    h.supervisor.start().unwrap();
    assert!(wait_until(PATIENCE, || calls.load(Ordering::SeqCst) >= 10));
    assert_eq!(h.supervisor.state(), ConnectionState::Live);
    h.supervisor.stop();
}
