//! Frame decoders.
//!
//! A decoder turns one raw frame into a [`TelemetryRecord`] stamped with the
//! decode-time monotonic instant. A malformed frame is a [`DecodeError`];
//! the channel logs it and keeps the loop alive, so one corrupt line never
//! takes a link down.
//!
//! Two wire families:
//!
//! - JSON (serial and Bluetooth, same schema): one object per frame with a
//!   `type` tag, e.g. `{"type":"inertial","accel":{...},"gyro":{...}}`.
//! - CAN: 4-byte big-endian arbitration id followed by a fixed-layout
//!   payload per id.

use std::time::Instant;

use helmos_types::{
    Axes3, DecodeError, InertialSample, MotionSample, ProximitySample, RangeSample, SpeedSample,
    TelemetryRecord,
};
use serde::Deserialize;

/// Turns one raw frame into a telemetry record.
pub trait FrameDecoder: Send {
    fn decode(&self, frame: &[u8]) -> Result<TelemetryRecord, DecodeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON (serial / Bluetooth)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireAxes {
    x: f64,
    y: f64,
    z: f64,
}

impl From<WireAxes> for Axes3 {
    fn from(w: WireAxes) -> Self {
        Axes3::new(w.x, w.y, w.z)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    Inertial { accel: WireAxes, gyro: WireAxes },
    Range { distance_mm: f64 },
    Speed { wheel_rpm: f64 },
    Proximity { distance_mm: f64, triggered: bool },
    Motion { motion_detected: bool },
}

impl WireFrame {
    fn into_record(self, captured_at: Instant) -> TelemetryRecord {
        match self {
            WireFrame::Inertial { accel, gyro } => TelemetryRecord::Inertial(InertialSample {
                accel_g: accel.into(),
                gyro_dps: gyro.into(),
                captured_at,
            }),
            WireFrame::Range { distance_mm } => TelemetryRecord::Range(RangeSample {
                distance_mm,
                captured_at,
            }),
            WireFrame::Speed { wheel_rpm } => TelemetryRecord::Speed(SpeedSample {
                wheel_rpm,
                captured_at,
            }),
            WireFrame::Proximity {
                distance_mm,
                triggered,
            } => TelemetryRecord::Proximity(ProximitySample {
                distance_mm,
                triggered,
                captured_at,
            }),
            WireFrame::Motion { motion_detected } => TelemetryRecord::Motion(MotionSample {
                motion_detected,
                captured_at,
            }),
        }
    }
}

/// Newline-framed JSON from the microcontroller serial link.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialJsonDecoder;

impl FrameDecoder for SerialJsonDecoder {
    fn decode(&self, frame: &[u8]) -> Result<TelemetryRecord, DecodeError> {
        let wire: WireFrame = serde_json::from_slice(frame)
            .map_err(|e| DecodeError(format!("invalid json frame: {e}")))?;
        Ok(wire.into_record(Instant::now()))
    }
}

/// JSON over the Bluetooth link.
///
/// The HM-10 module forwards the same JSON schema as the serial link once
/// configured; AT setup happens outside this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BluetoothJsonDecoder;

impl FrameDecoder for BluetoothJsonDecoder {
    fn decode(&self, frame: &[u8]) -> Result<TelemetryRecord, DecodeError> {
        SerialJsonDecoder.decode(frame)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CAN
// ─────────────────────────────────────────────────────────────────────────────

/// Arbitration ids on the vehicle bus.
pub const CAN_ID_INERTIAL: u32 = 0x100;
pub const CAN_ID_RANGE: u32 = 0x200;
pub const CAN_ID_SPEED: u32 = 0x300;
pub const CAN_ID_PROXIMITY: u32 = 0x400;
pub const CAN_ID_MOTION: u32 = 0x500;

/// Fixed-layout CAN payloads routed by arbitration id.
///
/// | Id | Payload |
/// |----|---------|
/// | `0x100` | 6 × i16 BE: accel milli-g x/y/z, gyro centi-dps x/y/z |
/// | `0x200` | u16 BE: range distance, mm |
/// | `0x300` | u16 BE: wheel speed, rpm |
/// | `0x400` | u16 BE distance mm + u8 triggered flag |
/// | `0x500` | u8 motion flag |
#[derive(Debug, Default, Clone, Copy)]
pub struct CanDecoder;

impl CanDecoder {
    fn i16_at(payload: &[u8], offset: usize) -> Result<i16, DecodeError> {
        let bytes: [u8; 2] = payload
            .get(offset..offset + 2)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| DecodeError(format!("can payload truncated at byte {offset}")))?;
        Ok(i16::from_be_bytes(bytes))
    }

    fn u16_at(payload: &[u8], offset: usize) -> Result<u16, DecodeError> {
        let bytes: [u8; 2] = payload
            .get(offset..offset + 2)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| DecodeError(format!("can payload truncated at byte {offset}")))?;
        Ok(u16::from_be_bytes(bytes))
    }

    fn byte_at(payload: &[u8], offset: usize) -> Result<u8, DecodeError> {
        payload
            .get(offset)
            .copied()
            .ok_or_else(|| DecodeError(format!("can payload truncated at byte {offset}")))
    }
}

impl FrameDecoder for CanDecoder {
    fn decode(&self, frame: &[u8]) -> Result<TelemetryRecord, DecodeError> {
        let id_bytes: [u8; 4] = frame
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| DecodeError("can frame shorter than arbitration id".into()))?;
        let id = u32::from_be_bytes(id_bytes);
        let payload = &frame[4..];
        let captured_at = Instant::now();

        match id {
            CAN_ID_INERTIAL => {
                let accel_g = Axes3::new(
                    f64::from(Self::i16_at(payload, 0)?) / 1000.0,
                    f64::from(Self::i16_at(payload, 2)?) / 1000.0,
                    f64::from(Self::i16_at(payload, 4)?) / 1000.0,
                );
                let gyro_dps = Axes3::new(
                    f64::from(Self::i16_at(payload, 6)?) / 100.0,
                    f64::from(Self::i16_at(payload, 8)?) / 100.0,
                    f64::from(Self::i16_at(payload, 10)?) / 100.0,
                );
                Ok(TelemetryRecord::Inertial(InertialSample {
                    accel_g,
                    gyro_dps,
                    captured_at,
                }))
            }
            CAN_ID_RANGE => Ok(TelemetryRecord::Range(RangeSample {
                distance_mm: f64::from(Self::u16_at(payload, 0)?),
                captured_at,
            })),
            CAN_ID_SPEED => Ok(TelemetryRecord::Speed(SpeedSample {
                wheel_rpm: f64::from(Self::u16_at(payload, 0)?),
                captured_at,
            })),
            CAN_ID_PROXIMITY => Ok(TelemetryRecord::Proximity(ProximitySample {
                distance_mm: f64::from(Self::u16_at(payload, 0)?),
                triggered: Self::byte_at(payload, 2)? != 0,
                captured_at,
            })),
            CAN_ID_MOTION => Ok(TelemetryRecord::Motion(MotionSample {
                motion_detected: Self::byte_at(payload, 0)? != 0,
                captured_at,
            })),
            other => Err(DecodeError(format!("unknown arbitration id {other:#x}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can_frame(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut frame = id.to_be_bytes().to_vec();
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn serial_inertial_frame_decodes() {
        let frame = br#"{"type":"inertial","accel":{"x":0.1,"y":-0.2,"z":0.98},"gyro":{"x":1.0,"y":0.0,"z":-3.5}}"#;
        let record = SerialJsonDecoder.decode(frame).unwrap();
        let TelemetryRecord::Inertial(s) = record else {
            panic!("expected inertial record");
        };
        assert!((s.accel_g.y - -0.2).abs() < 1e-9);
        assert!((s.gyro_dps.z - -3.5).abs() < 1e-9);
    }

    #[test]
    fn serial_range_and_motion_frames_decode() {
        let range = SerialJsonDecoder
            .decode(br#"{"type":"range","distance_mm":412.5}"#)
            .unwrap();
        assert!(matches!(range, TelemetryRecord::Range(s) if (s.distance_mm - 412.5).abs() < 1e-9));

        let motion = SerialJsonDecoder
            .decode(br#"{"type":"motion","motion_detected":true}"#)
            .unwrap();
        assert!(matches!(motion, TelemetryRecord::Motion(s) if s.motion_detected));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(SerialJsonDecoder.decode(b"{not json").is_err());
        assert!(SerialJsonDecoder
            .decode(br#"{"type":"unknown_kind"}"#)
            .is_err());
    }

    #[test]
    fn bluetooth_shares_the_serial_schema() {
        let frame = br#"{"type":"proximity","distance_mm":150.0,"triggered":true}"#;
        let record = BluetoothJsonDecoder.decode(frame).unwrap();
        assert!(matches!(
            record,
            TelemetryRecord::Proximity(s) if s.triggered && (s.distance_mm - 150.0).abs() < 1e-9
        ));
    }

    #[test]
    fn can_inertial_scales_milli_g_and_centi_dps() {
        // accel (500, -250, 980) milli-g, gyro (100, 0, -350) centi-dps.
        let payload: Vec<u8> = [500i16, -250, 980, 100, 0, -350]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let record = CanDecoder.decode(&can_frame(CAN_ID_INERTIAL, &payload)).unwrap();
        let TelemetryRecord::Inertial(s) = record else {
            panic!("expected inertial record");
        };
        assert!((s.accel_g.x - 0.5).abs() < 1e-9);
        assert!((s.accel_g.y - -0.25).abs() < 1e-9);
        assert!((s.gyro_dps.z - -3.5).abs() < 1e-9);
    }

    #[test]
    fn can_range_speed_proximity_motion_decode() {
        let range = CanDecoder
            .decode(&can_frame(CAN_ID_RANGE, &350u16.to_be_bytes()))
            .unwrap();
        assert!(matches!(range, TelemetryRecord::Range(s) if (s.distance_mm - 350.0).abs() < 1e-9));

        let speed = CanDecoder
            .decode(&can_frame(CAN_ID_SPEED, &120u16.to_be_bytes()))
            .unwrap();
        assert!(matches!(speed, TelemetryRecord::Speed(s) if (s.wheel_rpm - 120.0).abs() < 1e-9));

        let prox = CanDecoder
            .decode(&can_frame(CAN_ID_PROXIMITY, &[0x00, 0xC8, 0x01]))
            .unwrap();
        assert!(matches!(
            prox,
            TelemetryRecord::Proximity(s) if s.triggered && (s.distance_mm - 200.0).abs() < 1e-9
        ));

        let motion = CanDecoder.decode(&can_frame(CAN_ID_MOTION, &[0])).unwrap();
        assert!(matches!(motion, TelemetryRecord::Motion(s) if !s.motion_detected));
    }

    #[test]
    fn can_rejects_unknown_id_and_truncated_payload() {
        assert!(CanDecoder.decode(&can_frame(0x7FF, &[0, 0])).is_err());
        assert!(CanDecoder.decode(&can_frame(CAN_ID_RANGE, &[0x01])).is_err());
        assert!(CanDecoder.decode(&[0x01]).is_err());
    }
}
