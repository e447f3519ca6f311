//! Constants used throughout the crate
//! This module contains the GATT address table published by the Solar Box
//! firmware plus the default timing and retry values.

use uuid::Uuid;

/// Advertised name prefix of the device.
pub const DEVICE_NAME_PREFIX: &str = "Solar Box";

/// Standard Bluetooth battery service.
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
/// Standard battery level characteristic (2-byte little-endian percent).
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Photovoltaic metrics service.
pub const UUID_PV_SERVICE: Uuid = Uuid::from_u128(0xb871a2ee_1651_47ac_a22c_e340d834c1ef);
/// PV voltage characteristic (4-byte little-endian IEEE-754 float, volts).
pub const UUID_PV_VOLTAGE: Uuid = Uuid::from_u128(0x46e98325_92b7_4e5f_84c9_8edcbd9338db);
/// PV current characteristic (4-byte little-endian IEEE-754 float, amps).
pub const UUID_PV_CURRENT: Uuid = Uuid::from_u128(0x91b3d4db_550b_464f_8127_16eeb209dd1d);
/// PV power characteristic (2-byte little-endian unsigned, watts).
pub const UUID_PV_POWER: Uuid = Uuid::from_u128(0x2c85bbb9_0e1a_4bbb_8315_f7cc29831515);

/// Trigger/control service.
pub const UUID_TRIGGER_SERVICE: Uuid = Uuid::from_u128(0x385cc70e_8a8c_4827_abc0_d01385aa0574);
/// Load switch characteristic (1 byte, nonzero = active; writable).
pub const UUID_TRIGGER_LOAD: Uuid = Uuid::from_u128(0x287651ed_3fda_42f4_92c6_7aaca7da634c);
/// Load controller state label characteristic (UTF-8 text).
pub const UUID_TRIGGER_STATE: Uuid = Uuid::from_u128(0x8f4e0a2b_5c77_49c3_b2d4_66a1f30c9e58);

/// Default telemetry update cadence in milliseconds.
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 500;

/// Default bound on each individual transport call, in milliseconds.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5000;

/// Consecutive degraded cycles before escalating to reconnection.
pub const DEFAULT_DEGRADED_THRESHOLD: u32 = 3;

/// Maximum reconnection attempts before the supervisor gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Initial delay between reconnection attempts in milliseconds.
pub const RECONNECT_INITIAL_DELAY_MS: u64 = 1000;

/// Cap on the reconnection backoff delay in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Backoff multiplier applied per failed reconnection attempt.
pub const RECONNECT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Interval at which the bluest adapter polls the link state to detect
/// unexpected disconnects, in milliseconds.
pub const DISCONNECT_POLL_INTERVAL_MS: u64 = 1000;
