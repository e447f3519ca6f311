//! Bluetooth functionality for the Solar Box link
//! This module handles the session lifecycle, telemetry decoding,
//! control writes and link recovery for one Solar Box device.

mod codec;
mod constants;
mod control;
mod session;
mod simulated;
mod supervisor;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use codec::{decode, encode_command, TelemetryField};
pub use constants::*; // Re-export all constants
pub use control::ControlPort;
pub use session::SolarSession;
pub use simulated::{JournalEntry, SimulatedSolarBox};
pub use supervisor::ReconnectPolicy;
pub use transport::{BluestTransport, DisconnectCallback, NotificationCallback, Transport};
pub use types::{
    ControlCommand, DeviceIdentity, SessionConfig, SessionEvent, SessionEventCallback,
    SessionState, SolarCharacteristic, TelemetrySnapshot, UpdateMode,
};
