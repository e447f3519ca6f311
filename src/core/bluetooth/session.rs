//! Session state machine for one Solar Box device
//! Owns the connection lifecycle, drives the update strategy, applies the
//! codec, publishes the latest snapshot and coordinates control writes
//! against batch reads. Exactly one live session exists per device
//! identity; the session exclusively owns the transport handle while
//! connected.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use futures_util::FutureExt;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::codec;
use crate::core::bluetooth::control::ControlPort;
use crate::core::bluetooth::supervisor::{self, ReconnectOutcome};
use crate::core::bluetooth::transport::{DisconnectCallback, Transport};
use crate::core::bluetooth::types::{
    DeviceIdentity, SessionConfig, SessionEvent, SessionEventCallback, SessionState,
    SolarCharacteristic, TelemetrySnapshot, UpdateMode,
};
use crate::error::{SessionError, TransportError};

/// Identities with a live session; a second session for the same device
/// must fail fast.
static ACTIVE_SESSIONS: Lazy<StdMutex<HashSet<String>>> =
    Lazy::new(|| StdMutex::new(HashSet::new()));

fn claim_identity(id: &str) -> Result<(), SessionError> {
    let mut active = ACTIVE_SESSIONS.lock().unwrap();
    if !active.insert(id.to_string()) {
        return Err(SessionError::AlreadyActive(id.to_string()));
    }
    Ok(())
}

fn release_identity(id: &str) {
    ACTIVE_SESSIONS.lock().unwrap().remove(id);
}

/// State shared between the session handle, its driver task, the control
/// port and the reconnection supervisor.
pub(crate) struct SessionShared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) identity: DeviceIdentity,
    pub(crate) config: SessionConfig,
    /// Mutual-exclusion token over the transport handle. Held for one
    /// batch read or one control write, never across a tick boundary.
    pub(crate) link: Mutex<()>,
    pub(crate) state_tx: watch::Sender<SessionState>,
    pub(crate) snapshot_tx: watch::Sender<Option<TelemetrySnapshot>>,
    pub(crate) events: Option<SessionEventCallback>,
    pub(crate) cancel: CancellationToken,
    pub(crate) link_lost: Notify,
    pub(crate) terminal_error: StdMutex<Option<SessionError>>,
}

impl SessionShared {
    pub(crate) fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let id = &self.identity.id;
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("Session {id}: {current:?} -> {next:?}");
            *current = next;
            true
        });
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        debug!("Session {} event: {:?}", self.identity.id, event);
        if let Some(callback) = &self.events {
            callback(event);
        }
    }

    /// Bound a transport call by the configured per-operation timeout.
    pub(crate) async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(self.config.operation_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

/// Register the link-loss callback for the current connection and
/// discard any loss signal left over from a previous one.
pub(crate) async fn arm_disconnect_handler(
    shared: &Arc<SessionShared>,
) -> Result<(), TransportError> {
    let weak = Arc::downgrade(shared);
    let handler: DisconnectCallback = Box::new(move || {
        if let Some(shared) = weak.upgrade() {
            shared.link_lost.notify_one();
        }
    });
    shared
        .bounded(
            shared
                .transport
                .set_disconnect_handler(&shared.identity, handler),
        )
        .await?;
    let _ = shared.link_lost.notified().now_or_never();
    Ok(())
}

/// A live session with one Solar Box device.
pub struct SolarSession {
    shared: Arc<SessionShared>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl SolarSession {
    /// Connect to the device and start the update strategy.
    ///
    /// There is no implicit retry here: if the first connect fails the
    /// error is returned and the identity is released. `events`, when
    /// given, receives link-loss and degradation notifications; the
    /// session never waits on the callback.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        identity: DeviceIdentity,
        config: SessionConfig,
        events: Option<SessionEventCallback>,
    ) -> Result<Self, SessionError> {
        claim_identity(&identity.id)?;

        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (snapshot_tx, _) = watch::channel(None);
        let shared = Arc::new(SessionShared {
            transport,
            identity,
            config,
            link: Mutex::new(()),
            state_tx,
            snapshot_tx,
            events,
            cancel: CancellationToken::new(),
            link_lost: Notify::new(),
            terminal_error: StdMutex::new(None),
        });

        shared.set_state(SessionState::Connecting);
        info!(
            "Connecting to {} ({})...",
            shared.identity.name, shared.identity.id
        );

        let outcome = match shared.bounded(shared.transport.connect(&shared.identity)).await {
            Ok(()) => arm_disconnect_handler(&shared).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            shared.set_state(SessionState::Disconnected);
            release_identity(&shared.identity.id);
            return Err(SessionError::Connect(e));
        }

        shared.set_state(SessionState::Connected);
        info!("Connected to {}", shared.identity.id);

        let driver = tokio::spawn(drive(Arc::clone(&shared)));
        Ok(Self {
            shared,
            driver: StdMutex::new(Some(driver)),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.shared.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch receiver over lifecycle state changes.
    pub fn states(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// The last published snapshot, if any cycle has completed yet.
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Watch receiver the display layer renders from. It never reads the
    /// transport directly.
    pub fn snapshots(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Entry point for load-switch commands.
    pub fn control(&self) -> ControlPort {
        ControlPort {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Take the terminal error left behind when the supervisor gave up.
    pub fn take_error(&self) -> Option<SessionError> {
        self.shared.terminal_error.lock().unwrap().take()
    }

    /// Caller-initiated teardown: stop the update strategy, release the
    /// transport handle and free the identity for a future session.
    pub async fn shutdown(self) {
        info!("Tearing down session for {}", self.shared.identity.id);
        self.shared.cancel.cancel();
        let handle = self.driver.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for SolarSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

enum DriverExit {
    Cancelled,
    LinkLost,
    Escalated,
}

/// Background task owning the update strategy and, when the link drops,
/// handing control to the reconnection supervisor.
async fn drive(shared: Arc<SessionShared>) {
    loop {
        let exit = match shared.config.mode {
            UpdateMode::Poll => run_poll(&shared).await,
            UpdateMode::Push => run_push(&shared).await,
        };
        match exit {
            DriverExit::Cancelled => {
                info!("Session for {} shutting down", shared.identity.id);
                if let Err(e) = shared
                    .bounded(shared.transport.disconnect(&shared.identity))
                    .await
                {
                    debug!("Disconnect during teardown failed: {e}");
                }
                shared.set_state(SessionState::Disconnected);
                break;
            }
            DriverExit::LinkLost => {
                warn!("Link to {} lost", shared.identity.id);
                shared.emit(SessionEvent::LinkLost);
                if !reconnect(&shared).await {
                    break;
                }
            }
            DriverExit::Escalated => {
                warn!(
                    "Too many degraded cycles on {}, reconnecting",
                    shared.identity.id
                );
                if !reconnect(&shared).await {
                    break;
                }
            }
        }
    }
    release_identity(&shared.identity.id);
}

/// Supervisor-owned recovery: release the handle, reconnect with backoff
/// and report whether the session may resume its update strategy.
async fn reconnect(shared: &Arc<SessionShared>) -> bool {
    shared.set_state(SessionState::Reconnecting);
    // Release the handle; the identity is kept for reconnection.
    if let Err(e) = shared
        .bounded(shared.transport.disconnect(&shared.identity))
        .await
    {
        debug!("Release before reconnect failed: {e}");
    }
    match supervisor::run(shared).await {
        ReconnectOutcome::Reconnected { attempts } => {
            shared.set_state(SessionState::Connected);
            shared.emit(SessionEvent::Reconnected { attempts });
            true
        }
        ReconnectOutcome::Cancelled => {
            shared.set_state(SessionState::Disconnected);
            false
        }
        ReconnectOutcome::Exhausted { attempts } => {
            *shared.terminal_error.lock().unwrap() =
                Some(SessionError::SupervisorExhausted { attempts });
            shared.set_state(SessionState::Disconnected);
            shared.emit(SessionEvent::ReconnectExhausted { attempts });
            false
        }
    }
}

/// Poll strategy: read all six characteristics as an atomic batch on the
/// configured cadence. Either the whole batch decodes and a new snapshot
/// is published, or the cycle is degraded and the previous snapshot is
/// retained.
async fn run_poll(shared: &Arc<SessionShared>) -> DriverExit {
    let mut degraded: u32 = 0;
    let mut ticker = interval(shared.config.update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return DriverExit::Cancelled,
            _ = shared.link_lost.notified() => return DriverExit::LinkLost,
            _ = ticker.tick() => {}
        }

        // The token spans one batch, never a tick boundary.
        let outcome = {
            let _link = shared.link.lock().await;
            poll_cycle(shared).await
        };
        match outcome {
            Ok(snapshot) => {
                degraded = 0;
                shared.snapshot_tx.send_replace(Some(snapshot));
                shared.set_state(SessionState::Connected);
            }
            Err(reason) => {
                degraded += 1;
                warn!(
                    "Update cycle failed ({degraded}/{}): {reason}",
                    shared.config.degraded_threshold
                );
                shared.set_state(SessionState::Degraded(reason.clone()));
                shared.emit(SessionEvent::CycleDegraded { reason });
                if degraded >= shared.config.degraded_threshold {
                    return DriverExit::Escalated;
                }
            }
        }
    }
}

/// One batch: six reads issued and decoded in the fixed order
/// Battery → Voltage → Current → Power → Load → State. The batch aborts
/// at the first failure so a partial cycle never overwrites prior fields.
async fn poll_cycle(shared: &SessionShared) -> Result<TelemetrySnapshot, String> {
    let mut snapshot = TelemetrySnapshot::empty();
    for characteristic in SolarCharacteristic::POLL_ORDER {
        let payload = shared
            .bounded(shared.transport.read(
                &shared.identity,
                characteristic.service_uuid(),
                characteristic.uuid(),
            ))
            .await
            .map_err(|e| format!("{} read failed: {e}", characteristic.label()))?;
        let field = codec::decode(characteristic, &payload)
            .map_err(|e| format!("{} decode failed: {e}", characteristic.label()))?;
        field.apply_to(&mut snapshot);
    }
    snapshot.captured_at = Utc::now();
    Ok(snapshot)
}

/// Push strategy: subscribe once per characteristic and fold each
/// notification into a working snapshot, published after every field
/// update. Fields may reflect different instants; a decode failure on
/// one characteristic never blocks updates to the others.
async fn run_push(shared: &Arc<SessionShared>) -> DriverExit {
    let working = Arc::new(StdMutex::new(TelemetrySnapshot::empty()));
    let (cycle_tx, mut cycle_rx) = mpsc::unbounded_channel::<Result<(), String>>();

    {
        let _link = shared.link.lock().await;
        for characteristic in SolarCharacteristic::POLL_ORDER {
            let on_value = push_callback(shared, &working, &cycle_tx, characteristic);
            let subscribed = shared
                .bounded(shared.transport.subscribe(
                    &shared.identity,
                    characteristic.service_uuid(),
                    characteristic.uuid(),
                    on_value,
                ))
                .await;
            if let Err(e) = subscribed {
                warn!("Failed to subscribe to {}: {e}", characteristic.label());
                return DriverExit::LinkLost;
            }
        }
    }

    let mut degraded: u32 = 0;
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return DriverExit::Cancelled,
            _ = shared.link_lost.notified() => return DriverExit::LinkLost,
            Some(outcome) = cycle_rx.recv() => match outcome {
                Ok(()) => {
                    degraded = 0;
                    shared.set_state(SessionState::Connected);
                }
                Err(reason) => {
                    degraded += 1;
                    warn!(
                        "Notification failed ({degraded}/{}): {reason}",
                        shared.config.degraded_threshold
                    );
                    shared.set_state(SessionState::Degraded(reason.clone()));
                    shared.emit(SessionEvent::CycleDegraded { reason });
                    if degraded >= shared.config.degraded_threshold {
                        return DriverExit::Escalated;
                    }
                }
            }
        }
    }
}

fn push_callback(
    shared: &Arc<SessionShared>,
    working: &Arc<StdMutex<TelemetrySnapshot>>,
    cycle_tx: &mpsc::UnboundedSender<Result<(), String>>,
    characteristic: SolarCharacteristic,
) -> Box<dyn Fn(Vec<u8>) + Send + Sync> {
    let shared = Arc::clone(shared);
    let working = Arc::clone(working);
    let cycle_tx = cycle_tx.clone();
    Box::new(move |payload| match codec::decode(characteristic, &payload) {
        Ok(field) => {
            let snapshot = {
                let mut working = working.lock().unwrap();
                field.apply_to(&mut working);
                working.captured_at = Utc::now();
                working.clone()
            };
            shared.snapshot_tx.send_replace(Some(snapshot));
            let _ = cycle_tx.send(Ok(()));
        }
        Err(e) => {
            let _ = cycle_tx.send(Err(format!(
                "{} decode failed: {e}",
                characteristic.label()
            )));
        }
    })
}
