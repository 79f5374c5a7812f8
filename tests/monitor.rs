//! Wake monitor integration tests

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use touchtalk::Error;
use touchtalk::config::DeviceConfig;
use touchtalk::monitor::{TickAction, WakeMonitor};
use touchtalk::session::{SessionEvent, SessionLifecycle, SessionState};

mod common;

use common::{
    FakeMic, Harness, Poll, RecordingUplink, ScriptedDevice, eventually, record_states, state,
    wait_for_state,
};

fn fast_config() -> DeviceConfig {
    DeviceConfig {
        url: Some("http://device.test".to_string()),
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(20),
        ..DeviceConfig::default()
    }
}

fn monitor(h: &Harness, device: Arc<ScriptedDevice>) -> WakeMonitor {
    WakeMonitor::new(
        device,
        SessionLifecycle::new(h.context()),
        Arc::clone(&h.flags),
        &fast_config(),
    )
}

#[tokio::test]
async fn test_touch_then_sleep_sequence() {
    let h = Harness::new();
    let script = h
        .connector
        .script_with(RecordingUplink::slow_close(Duration::from_millis(50)));
    let device = ScriptedDevice::states([
        state(false, false),
        state(false, true),
        state(true, false),
        state(false, false),
    ]);
    let mut monitor = monitor(&h, device.clone());
    let mut states = monitor.lifecycle().subscribe();
    let seen = record_states(monitor.lifecycle().subscribe());

    let tick = monitor.tick().await.unwrap();
    assert_eq!(tick.action, TickAction::Unchanged);
    assert!(tick.polled);
    assert!(!h.flags.is_awake());
    assert_eq!(monitor.lifecycle().state(), SessionState::Idle);

    let tick = monitor.tick().await.unwrap();
    assert_eq!(tick.action, TickAction::Started);
    assert_eq!(tick.state, state(false, true));
    assert!(h.flags.is_awake());
    assert_eq!(monitor.lifecycle().state(), SessionState::Connecting);
    wait_for_state(&mut states, SessionState::Active).await;

    let tick = monitor.tick().await.unwrap();
    assert_eq!(tick.action, TickAction::Unchanged);
    assert!(h.flags.is_awake());
    assert_eq!(monitor.lifecycle().state(), SessionState::Active);

    let tick = monitor.tick().await.unwrap();
    assert_eq!(tick.action, TickAction::Stopped);
    assert!(!h.flags.is_awake());
    assert!(!monitor.lifecycle().is_active());
    assert_eq!(monitor.lifecycle().state(), SessionState::Idle);
    assert!(script.uplink.is_closed());
    assert!(!h.mic.is_capturing());

    eventually("idle recorded", || {
        seen.lock().unwrap().last() == Some(&SessionState::Idle)
    })
    .await;
    let seen = seen.lock().unwrap().clone();
    let tail: Vec<_> = seen
        .iter()
        .copied()
        .skip_while(|s| *s != SessionState::Active)
        .collect();
    assert_eq!(
        tail,
        vec![SessionState::Active, SessionState::Ending, SessionState::Idle]
    );
    assert_eq!(device.poll_count.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_repeated_wake_while_active_is_noop() {
    let h = Harness::new();
    let _script = h.connector.script();
    let device = ScriptedDevice::states([state(false, true), state(true, true), state(true, true)]);
    let mut monitor = monitor(&h, device);
    let mut states = monitor.lifecycle().subscribe();

    assert_eq!(monitor.tick().await.unwrap().action, TickAction::Started);
    wait_for_state(&mut states, SessionState::Active).await;
    assert_eq!(monitor.tick().await.unwrap().action, TickAction::Unchanged);
    assert_eq!(monitor.tick().await.unwrap().action, TickAction::Unchanged);

    assert_eq!(h.connector.connects(), 1);
    assert_eq!(monitor.lifecycle().state(), SessionState::Active);
}

#[tokio::test]
async fn test_poll_failure_while_active_stops_session() {
    let h = Harness::new();
    let script = h.connector.script();
    let device = ScriptedDevice::new([Poll::State(state(false, true)), Poll::Fail]);
    let mut monitor = monitor(&h, device);
    let mut states = monitor.lifecycle().subscribe();

    monitor.tick().await.unwrap();
    wait_for_state(&mut states, SessionState::Active).await;

    let tick = monitor.tick().await.unwrap();
    assert!(!tick.polled);
    assert_eq!(tick.state, state(false, false));
    assert_eq!(tick.action, TickAction::Stopped);
    assert!(!h.flags.is_awake());
    assert!(script.uplink.is_closed());
}

#[tokio::test]
async fn test_poll_failure_while_idle_changes_nothing() {
    let h = Harness::new();
    let device = ScriptedDevice::new([Poll::Fail]);
    let mut monitor = monitor(&h, device);

    let tick = monitor.tick().await.unwrap();
    assert!(!tick.polled);
    assert_eq!(tick.action, TickAction::Unchanged);
    assert_eq!(h.connector.connects(), 0);
}

#[tokio::test]
async fn test_session_restarts_after_ending_on_its_own() {
    let h = Harness::new();
    let first = h.connector.script();
    let device = ScriptedDevice::states([state(false, true)]);
    let mut monitor = monitor(&h, device.clone());
    let mut states = monitor.lifecycle().subscribe();

    monitor.tick().await.unwrap();
    wait_for_state(&mut states, SessionState::Active).await;
    first.send(SessionEvent::Error {
        message: "server closed".to_string(),
    });
    wait_for_state(&mut states, SessionState::Ending).await;
    eventually("first uplink closed", || first.uplink.is_closed()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Still asleep-with-touch: the next tick reaps and starts over
    let _second = h.connector.script();
    let tick = monitor.tick().await.unwrap();
    assert_eq!(tick.action, TickAction::Started);
    wait_for_state(&mut states, SessionState::Active).await;
    assert_eq!(h.connector.connects(), 2);

    device.push(Poll::State(state(false, false)));
    assert_eq!(monitor.tick().await.unwrap().action, TickAction::Stopped);
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let h = Harness::new();
    let script = h.connector.script();
    let device = ScriptedDevice::states([state(false, true), state(true, false)]);
    let monitor = monitor(&h, device.clone());
    let states = monitor.lifecycle().subscribe();

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(monitor.run(shutdown.clone()));

    eventually("session active", || *states.borrow() == SessionState::Active).await;
    eventually("several polls", || {
        device.poll_count.load(std::sync::atomic::Ordering::SeqCst) >= 3
    })
    .await;
    assert_eq!(h.connector.connects(), 1);

    shutdown.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(*states.borrow(), SessionState::Idle);
    assert!(script.uplink.is_closed());
    assert!(!h.mic.is_capturing());
    assert!(!h.flags.is_awake());
}

#[tokio::test]
async fn test_microphone_failure_ends_run() {
    let h = Harness::with_mic(FakeMic::broken());
    let _script = h.connector.script();
    let device = ScriptedDevice::states([state(false, true), state(true, false)]);
    let monitor = monitor(&h, device);

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        monitor.run(CancellationToken::new()),
    )
    .await
    .expect("monitor should stop on its own");

    assert!(matches!(result, Err(Error::Audio(_))));
}
