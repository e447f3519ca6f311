//! Solar Box link library
//! Client-side session manager for the Solar Box BLE charge controller.
//!
//! The session connects to a discovered device, keeps a typed
//! [`TelemetrySnapshot`] current on a fixed cadence (or via
//! notifications), exposes a validated load-switch control path and
//! recovers from link drops with bounded backoff. Device discovery and
//! presentation are the caller's concern: hand a [`DeviceIdentity`] and a
//! [`Transport`] to [`SolarSession::connect`] and render from
//! [`SolarSession::snapshots`].

// Module declarations
pub mod core;
pub mod error;

pub use crate::core::bluetooth::{
    BluestTransport, ControlCommand, ControlPort, DeviceIdentity, JournalEntry, ReconnectPolicy,
    SessionConfig, SessionEvent, SessionEventCallback, SessionState, SimulatedSolarBox,
    SolarCharacteristic, SolarSession, TelemetrySnapshot, Transport, UpdateMode,
};
pub use crate::error::{ControlError, DecodeError, SessionError, TransportError};
