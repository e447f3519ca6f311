//! Link-loss recovery: supervisor backoff, exhaustion and the
//! one-session-per-identity rule.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{event_recorder, fast_config, init_logging, wait_until};
use solarbox_link::{
    DeviceIdentity, SessionError, SessionEvent, SessionState, SimulatedSolarBox,
    SolarCharacteristic, SolarSession, Transport, UpdateMode,
};

fn transport(sim: &SimulatedSolarBox) -> Arc<dyn Transport> {
    Arc::new(sim.clone())
}

#[tokio::test]
async fn first_connect_failure_is_surfaced_without_retry() {
    init_logging();
    let sim = SimulatedSolarBox::new();
    sim.fail_next_connects(1);

    let identity = DeviceIdentity::new("sim-first-fail", "Solar Box");
    let result = SolarSession::connect(
        transport(&sim),
        identity.clone(),
        fast_config(UpdateMode::Poll),
        None,
    )
    .await;

    assert!(matches!(result, Err(SessionError::Connect(_))));
    assert_eq!(sim.connect_count(), 1, "no implicit retry on first connect");

    // The failed attempt released the identity.
    let session = SolarSession::connect(
        transport(&sim),
        identity,
        fast_config(UpdateMode::Poll),
        None,
    )
    .await
    .expect("second connect");
    session.shutdown().await;
}

#[tokio::test]
async fn a_second_session_for_the_same_identity_fails_fast() {
    init_logging();
    let sim = SimulatedSolarBox::new();
    let identity = DeviceIdentity::new("sim-dup", "Solar Box");

    let session = SolarSession::connect(
        transport(&sim),
        identity.clone(),
        fast_config(UpdateMode::Poll),
        None,
    )
    .await
    .expect("connect");

    let second = SolarSession::connect(
        transport(&sim),
        identity,
        fast_config(UpdateMode::Poll),
        None,
    )
    .await;
    assert!(matches!(second, Err(SessionError::AlreadyActive(id)) if id == "sim-dup"));

    // The live session is unaffected.
    wait_until("snapshot", Duration::from_secs(2), || {
        session.latest().is_some()
    })
    .await;
    session.shutdown().await;
}

#[tokio::test]
async fn link_loss_is_recovered_by_the_supervisor() {
    init_logging();
    let sim = SimulatedSolarBox::new();

    let (events, log) = event_recorder();
    let session = SolarSession::connect(
        transport(&sim),
        DeviceIdentity::new("sim-drop", "Solar Box"),
        fast_config(UpdateMode::Poll),
        Some(events),
    )
    .await
    .expect("connect");

    wait_until("first snapshot", Duration::from_secs(2), || {
        session.latest().is_some()
    })
    .await;

    sim.drop_link();

    wait_until("reconnected", Duration::from_secs(2), || {
        log.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SessionEvent::Reconnected { .. }))
    })
    .await;

    let events = log.lock().unwrap().clone();
    assert!(events.contains(&SessionEvent::LinkLost));
    assert!(events.contains(&SessionEvent::Reconnecting { attempt: 1 }));
    assert!(events.contains(&SessionEvent::Reconnected { attempts: 1 }));
    assert_eq!(sim.connect_count(), 2);

    // Telemetry resumes after the link is back.
    sim.set_value(SolarCharacteristic::BatteryLevel, vec![0x50, 0x00]);
    wait_until("fresh telemetry", Duration::from_secs(2), || {
        session
            .latest()
            .is_some_and(|s| s.battery_level_percent == 80)
    })
    .await;
    assert_eq!(session.state(), SessionState::Connected);

    session.shutdown().await;
}

#[tokio::test]
async fn reconnect_waits_are_non_decreasing() {
    init_logging();
    let sim = SimulatedSolarBox::new();

    let mut config = fast_config(UpdateMode::Poll);
    config.reconnect.initial_delay = Duration::from_millis(50);

    let (events, log) = event_recorder();
    let session = SolarSession::connect(
        transport(&sim),
        DeviceIdentity::new("sim-backoff", "Solar Box"),
        config,
        Some(events),
    )
    .await
    .expect("connect");

    wait_until("first snapshot", Duration::from_secs(2), || {
        session.latest().is_some()
    })
    .await;

    // Three failed attempts, success on the fourth.
    sim.fail_next_connects(3);
    sim.drop_link();

    wait_until("reconnected", Duration::from_secs(5), || {
        log.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SessionEvent::Reconnected { .. }))
    })
    .await;
    assert!(log
        .lock()
        .unwrap()
        .contains(&SessionEvent::Reconnected { attempts: 4 }));

    // Initial connect plus exactly N + 1 = 4 reconnect attempts.
    let instants = sim.connect_instants();
    assert_eq!(instants.len(), 5);

    let tolerance = Duration::from_millis(10);
    let gap = |a: usize, b: usize| instants[b].duration_since(instants[a]);
    let first = gap(1, 2);
    let second = gap(2, 3);
    let third = gap(3, 4);
    assert!(second + tolerance >= first, "{second:?} < {first:?}");
    assert!(third + tolerance >= second, "{third:?} < {second:?}");

    session.shutdown().await;
}

#[tokio::test]
async fn exhausted_supervisor_lands_in_disconnected() {
    init_logging();
    let sim = SimulatedSolarBox::new();

    let mut config = fast_config(UpdateMode::Poll);
    config.reconnect.max_attempts = 2;
    config.reconnect.initial_delay = Duration::from_millis(10);

    let (events, log) = event_recorder();
    let identity = DeviceIdentity::new("sim-exhaust", "Solar Box");
    let session = SolarSession::connect(
        transport(&sim),
        identity.clone(),
        config.clone(),
        Some(events),
    )
    .await
    .expect("connect");

    wait_until("first snapshot", Duration::from_secs(2), || {
        session.latest().is_some()
    })
    .await;

    sim.fail_next_connects(10);
    sim.drop_link();

    wait_until("exhaustion", Duration::from_secs(2), || {
        log.lock()
            .unwrap()
            .contains(&SessionEvent::ReconnectExhausted { attempts: 2 })
    })
    .await;

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(
        session.take_error(),
        Some(SessionError::SupervisorExhausted { attempts: 2 })
    ));
    // Initial connect plus both failed attempts.
    assert_eq!(sim.connect_count(), 3);

    // The identity is free again: a new session may be initiated, and it
    // fails on the link rather than on an identity conflict.
    let retry = SolarSession::connect(transport(&sim), identity, config, None).await;
    assert!(matches!(retry, Err(SessionError::Connect(_))));

    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_the_identity() {
    init_logging();
    let sim = SimulatedSolarBox::new();
    let identity = DeviceIdentity::new("sim-release", "Solar Box");

    let session = SolarSession::connect(
        transport(&sim),
        identity.clone(),
        fast_config(UpdateMode::Poll),
        None,
    )
    .await
    .expect("connect");
    session.shutdown().await;

    assert!(!sim.is_connected());
    assert!(sim
        .journal()
        .iter()
        .any(|e| matches!(e, solarbox_link::JournalEntry::Disconnect)));

    let again = SolarSession::connect(
        transport(&sim),
        identity,
        fast_config(UpdateMode::Poll),
        None,
    )
    .await
    .expect("reconnect after teardown");
    again.shutdown().await;
}
