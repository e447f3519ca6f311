//! Defines shared data structures for the Bluetooth module.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    DEFAULT_DEGRADED_THRESHOLD, DEFAULT_OPERATION_TIMEOUT_MS, DEFAULT_UPDATE_INTERVAL_MS,
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_PV_CURRENT, UUID_PV_POWER, UUID_PV_SERVICE,
    UUID_PV_VOLTAGE, UUID_TRIGGER_LOAD, UUID_TRIGGER_SERVICE, UUID_TRIGGER_STATE,
};
use crate::core::bluetooth::supervisor::ReconnectPolicy;

/// Identifies a discovered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Platform-specific unique identifier for the device (especially important on macOS)
    pub id: String,
    /// The display name of the device
    pub name: String,
}

impl DeviceIdentity {
    /// Creates a new DeviceIdentity instance
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One of the six telemetry/control characteristics published by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolarCharacteristic {
    BatteryLevel,
    PvVoltage,
    PvCurrent,
    PvPower,
    TriggerLoad,
    TriggerState,
}

impl SolarCharacteristic {
    /// Fixed order in which a poll batch reads the characteristics.
    pub const POLL_ORDER: [SolarCharacteristic; 6] = [
        SolarCharacteristic::BatteryLevel,
        SolarCharacteristic::PvVoltage,
        SolarCharacteristic::PvCurrent,
        SolarCharacteristic::PvPower,
        SolarCharacteristic::TriggerLoad,
        SolarCharacteristic::TriggerState,
    ];

    /// UUID of the service this characteristic belongs to.
    pub fn service_uuid(self) -> Uuid {
        match self {
            SolarCharacteristic::BatteryLevel => UUID_BATTERY_SERVICE,
            SolarCharacteristic::PvVoltage
            | SolarCharacteristic::PvCurrent
            | SolarCharacteristic::PvPower => UUID_PV_SERVICE,
            SolarCharacteristic::TriggerLoad | SolarCharacteristic::TriggerState => {
                UUID_TRIGGER_SERVICE
            }
        }
    }

    /// UUID of the characteristic itself.
    pub fn uuid(self) -> Uuid {
        match self {
            SolarCharacteristic::BatteryLevel => UUID_BATTERY_LEVEL,
            SolarCharacteristic::PvVoltage => UUID_PV_VOLTAGE,
            SolarCharacteristic::PvCurrent => UUID_PV_CURRENT,
            SolarCharacteristic::PvPower => UUID_PV_POWER,
            SolarCharacteristic::TriggerLoad => UUID_TRIGGER_LOAD,
            SolarCharacteristic::TriggerState => UUID_TRIGGER_STATE,
        }
    }

    /// Human-readable label used in logs and degraded-cycle reasons.
    pub fn label(self) -> &'static str {
        match self {
            SolarCharacteristic::BatteryLevel => "Battery-Level",
            SolarCharacteristic::PvVoltage => "PV-Voltage",
            SolarCharacteristic::PvCurrent => "PV-Current",
            SolarCharacteristic::PvPower => "PV-Power",
            SolarCharacteristic::TriggerLoad => "Trigger-Load",
            SolarCharacteristic::TriggerState => "Trigger-State",
        }
    }
}

/// The latest fully decoded telemetry value set.
///
/// Snapshots are value types: the session replaces the published snapshot
/// wholesale, so an observer never sees a mix of old and new fields from
/// a single poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Battery state of charge in percent (0-100).
    pub battery_level_percent: u16,
    /// Photovoltaic input voltage in volts.
    pub pv_voltage_volts: f32,
    /// Photovoltaic input current in amps.
    pub pv_current_amps: f32,
    /// Photovoltaic charging power in watts.
    pub pv_power_watts: u16,
    /// Whether the load switch is currently closed.
    pub load_active: bool,
    /// Load controller state label reported by the firmware.
    pub trigger_state: String,
    /// When the read or notification producing this snapshot happened.
    pub captured_at: DateTime<Utc>,
}

impl TelemetrySnapshot {
    pub(crate) fn empty() -> Self {
        Self {
            battery_level_percent: 0,
            pv_voltage_volts: 0.0,
            pv_current_amps: 0.0,
            pv_power_watts: 0,
            load_active: false,
            trigger_state: String::new(),
            captured_at: Utc::now(),
        }
    }

    /// How long ago this snapshot was captured.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.captured_at
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last update cycle failed; the previous snapshot is retained.
    /// Clears back to `Connected` on the next successful cycle.
    Degraded(String),
    Reconnecting,
}

/// The only mutating intent exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Open or close the load switch.
    SetLoad(bool),
}

/// How the session keeps its snapshot current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Read all six characteristics as an atomic batch on a fixed cadence.
    #[default]
    Poll,
    /// Subscribe to notifications and update fields individually.
    ///
    /// Fields may reflect different instants; this weaker cross-field
    /// consistency is the accepted trade-off of this mode.
    Push,
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cadence of the update strategy.
    pub update_interval: Duration,
    /// Bound on each individual transport call.
    pub operation_timeout: Duration,
    /// Consecutive degraded cycles before escalating to reconnection.
    pub degraded_threshold: u32,
    /// Poll or push updates.
    pub mode: UpdateMode,
    /// Reconnection backoff policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(DEFAULT_UPDATE_INTERVAL_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            degraded_threshold: DEFAULT_DEGRADED_THRESHOLD,
            mode: UpdateMode::Poll,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Notifications delivered to the caller's event callback.
///
/// These are notifications, not commands: the session never waits for the
/// caller to acknowledge one.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport signalled an unexpected disconnect.
    LinkLost,
    /// An update cycle failed; the previous snapshot is retained.
    CycleDegraded { reason: String },
    /// The supervisor is about to try reconnecting.
    Reconnecting { attempt: u32 },
    /// The link was re-established.
    Reconnected { attempts: u32 },
    /// The supervisor gave up; the session is now `Disconnected`.
    ReconnectExhausted { attempts: u32 },
}

/// Callback invoked for every [`SessionEvent`].
pub type SessionEventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;
