//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use solarbox_link::{
    ReconnectPolicy, SessionConfig, SessionEvent, SessionEventCallback, UpdateMode,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Session config with short timings so tests run in milliseconds.
pub fn fast_config(mode: UpdateMode) -> SessionConfig {
    SessionConfig {
        update_interval: Duration::from_millis(20),
        operation_timeout: Duration::from_millis(500),
        degraded_threshold: 3,
        mode,
        reconnect: ReconnectPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    }
}

/// Event callback that appends everything it sees to a shared log.
pub fn event_recorder() -> (SessionEventCallback, Arc<Mutex<Vec<SessionEvent>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let callback: SessionEventCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
    (callback, log)
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub async fn wait_until(what: &str, timeout: Duration, mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
