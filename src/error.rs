//! Error types for the Solar Box link
//! Transport failures are opaque and retryable; decode, control and
//! session failures are typed so callers can react to them.

use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a [`Transport`](crate::core::bluetooth::Transport)
/// implementation. The session treats these as opaque and always
/// retryable; only the reconnection supervisor decides when to give up.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failure reported by the underlying adapter (OS stack, simulator).
    #[error("adapter error: {0}")]
    Adapter(#[from] anyhow::Error),

    /// The operation did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The device has no active link.
    #[error("device is not connected")]
    NotConnected,

    /// No device with the given identity has been registered.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A required GATT service or characteristic was not discovered.
    #[error("missing GATT attribute: {0}")]
    AttributeMissing(Uuid),
}

/// Failures decoding a characteristic payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is shorter than the field's fixed wire width.
    #[error("payload too short: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Failures submitting a control command.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Commands are only accepted while the session is `Connected`;
    /// they are never queued.
    #[error("session is not connected")]
    NotConnected,

    /// The write itself failed on the link.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of the session lifecycle.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A live session already owns this device identity.
    #[error("a session for device {0} is already active")]
    AlreadyActive(String),

    /// The initial connect failed. There is no implicit retry on the
    /// first connect; the caller decides whether to try again.
    #[error("failed to connect: {0}")]
    Connect(#[source] TransportError),

    /// The reconnection supervisor gave up after the configured number
    /// of attempts and the session moved to `Disconnected`.
    #[error("reconnection attempts exhausted after {attempts} tries")]
    SupervisorExhausted { attempts: u32 },
}
