//! Core functionality for the Solar Box link
//! This module contains the session, codec and transport machinery for
//! talking to the charge controller.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{ControlPort, SolarSession, TelemetrySnapshot};
