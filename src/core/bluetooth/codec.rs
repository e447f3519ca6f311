//! Telemetry wire codec
//! Pure mappings between raw characteristic payloads and typed values.
//! All multi-byte numeric fields are little-endian; this is the wire
//! contract of the device firmware.

use crate::core::bluetooth::types::{ControlCommand, SolarCharacteristic, TelemetrySnapshot};
use crate::error::DecodeError;

/// A single decoded telemetry value.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryField {
    BatteryLevel(u16),
    PvVoltage(f32),
    PvCurrent(f32),
    PvPower(u16),
    LoadActive(bool),
    TriggerState(String),
}

impl TelemetryField {
    /// Merge this field into a working snapshot, leaving the others untouched.
    pub fn apply_to(&self, snapshot: &mut TelemetrySnapshot) {
        match self {
            TelemetryField::BatteryLevel(percent) => snapshot.battery_level_percent = *percent,
            TelemetryField::PvVoltage(volts) => snapshot.pv_voltage_volts = *volts,
            TelemetryField::PvCurrent(amps) => snapshot.pv_current_amps = *amps,
            TelemetryField::PvPower(watts) => snapshot.pv_power_watts = *watts,
            TelemetryField::LoadActive(active) => snapshot.load_active = *active,
            TelemetryField::TriggerState(label) => snapshot.trigger_state = label.clone(),
        }
    }
}

/// Decode the payload of one characteristic.
///
/// Buffers longer than the fixed width decode their prefix: the firmware
/// is known to write a u16 into the 1-byte trigger characteristic, and
/// GATT reads may return padded buffers.
pub fn decode(
    characteristic: SolarCharacteristic,
    payload: &[u8],
) -> Result<TelemetryField, DecodeError> {
    match characteristic {
        SolarCharacteristic::BatteryLevel => Ok(TelemetryField::BatteryLevel(u16_le(payload)?)),
        SolarCharacteristic::PvVoltage => Ok(TelemetryField::PvVoltage(f32_le(payload)?)),
        SolarCharacteristic::PvCurrent => Ok(TelemetryField::PvCurrent(f32_le(payload)?)),
        SolarCharacteristic::PvPower => Ok(TelemetryField::PvPower(u16_le(payload)?)),
        SolarCharacteristic::TriggerLoad => Ok(TelemetryField::LoadActive(byte(payload)? != 0)),
        SolarCharacteristic::TriggerState => Ok(TelemetryField::TriggerState(
            String::from_utf8_lossy(payload).into_owned(),
        )),
    }
}

/// Encode a control command into its wire payload.
pub fn encode_command(command: ControlCommand) -> [u8; 1] {
    match command {
        ControlCommand::SetLoad(true) => [1],
        ControlCommand::SetLoad(false) => [0],
    }
}

fn u16_le(payload: &[u8]) -> Result<u16, DecodeError> {
    match payload.get(..2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(DecodeError::LengthMismatch {
            expected: 2,
            actual: payload.len(),
        }),
    }
}

fn f32_le(payload: &[u8]) -> Result<f32, DecodeError> {
    match payload.get(..4) {
        Some(bytes) => Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        None => Err(DecodeError::LengthMismatch {
            expected: 4,
            actual: payload.len(),
        }),
    }
}

fn byte(payload: &[u8]) -> Result<u8, DecodeError> {
    payload.first().copied().ok_or(DecodeError::LengthMismatch {
        expected: 1,
        actual: payload.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_battery_level() {
        let field = decode(SolarCharacteristic::BatteryLevel, &[0x64, 0x00]).unwrap();
        assert_eq!(field, TelemetryField::BatteryLevel(100));
    }

    #[test]
    fn decodes_pv_voltage() {
        let payload = 12.5f32.to_le_bytes();
        let field = decode(SolarCharacteristic::PvVoltage, &payload).unwrap();
        match field {
            TelemetryField::PvVoltage(volts) => assert!((volts - 12.5).abs() < f32::EPSILON),
            other => panic!("unexpected field: {other:?}"),
        }
    }

    #[test]
    fn decodes_pv_power_little_endian() {
        let field = decode(SolarCharacteristic::PvPower, &[0x2c, 0x01]).unwrap();
        assert_eq!(field, TelemetryField::PvPower(300));
    }

    #[test]
    fn decodes_load_byte() {
        assert_eq!(
            decode(SolarCharacteristic::TriggerLoad, &[0x01]).unwrap(),
            TelemetryField::LoadActive(true)
        );
        assert_eq!(
            decode(SolarCharacteristic::TriggerLoad, &[0x00]).unwrap(),
            TelemetryField::LoadActive(false)
        );
        // Any nonzero byte closes the switch.
        assert_eq!(
            decode(SolarCharacteristic::TriggerLoad, &[0x7f]).unwrap(),
            TelemetryField::LoadActive(true)
        );
    }

    #[test]
    fn decodes_trigger_state_text() {
        let field = decode(SolarCharacteristic::TriggerState, b"IDLE").unwrap();
        assert_eq!(field, TelemetryField::TriggerState("IDLE".into()));
        // The text field accepts any length, including empty.
        let field = decode(SolarCharacteristic::TriggerState, b"").unwrap();
        assert_eq!(field, TelemetryField::TriggerState(String::new()));
    }

    #[test]
    fn longer_payloads_decode_their_prefix() {
        let field = decode(SolarCharacteristic::TriggerLoad, &[0x01, 0x00]).unwrap();
        assert_eq!(field, TelemetryField::LoadActive(true));
        let field = decode(SolarCharacteristic::BatteryLevel, &[0x64, 0x00, 0xff]).unwrap();
        assert_eq!(field, TelemetryField::BatteryLevel(100));
    }

    #[test]
    fn short_payloads_fail_with_length_mismatch() {
        let cases = [
            (SolarCharacteristic::BatteryLevel, vec![0x64], 2usize),
            (SolarCharacteristic::PvVoltage, vec![0x00, 0x00, 0x48], 4),
            (SolarCharacteristic::PvCurrent, vec![], 4),
            (SolarCharacteristic::PvPower, vec![0x2c], 2),
            (SolarCharacteristic::TriggerLoad, vec![], 1),
        ];
        for (characteristic, payload, expected) in cases {
            let err = decode(characteristic, &payload).unwrap_err();
            assert_eq!(
                err,
                DecodeError::LengthMismatch {
                    expected,
                    actual: payload.len(),
                },
                "wrong error for {characteristic:?}",
            );
        }
    }

    #[test]
    fn command_round_trip() {
        let on = encode_command(ControlCommand::SetLoad(true));
        let off = encode_command(ControlCommand::SetLoad(false));
        assert_eq!(on, [1]);
        assert_eq!(off, [0]);
        assert_eq!(
            decode(SolarCharacteristic::TriggerLoad, &on).unwrap(),
            TelemetryField::LoadActive(true)
        );
        assert_eq!(
            decode(SolarCharacteristic::TriggerLoad, &off).unwrap(),
            TelemetryField::LoadActive(false)
        );
    }

    #[test]
    fn apply_to_touches_only_its_own_field() {
        let mut snapshot = TelemetrySnapshot::empty();
        TelemetryField::BatteryLevel(87).apply_to(&mut snapshot);
        TelemetryField::TriggerState("Enabled".into()).apply_to(&mut snapshot);
        assert_eq!(snapshot.battery_level_percent, 87);
        assert_eq!(snapshot.trigger_state, "Enabled");
        assert!(!snapshot.load_active);
        assert_eq!(snapshot.pv_power_watts, 0);
    }
}
