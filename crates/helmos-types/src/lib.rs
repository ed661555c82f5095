use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Channel identity
// ─────────────────────────────────────────────────────────────────────────────

/// Stable identity of one physical telemetry link.
///
/// Each variant corresponds to exactly one background receive loop; the
/// aggregator keys its per-tick snapshot by this enum, so adding a transport
/// means adding a variant here and handling it in every exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// JSON-framed serial link (Arduino co-processor).
    Serial,
    /// CAN bus with arbitration-id routed payloads.
    Can,
    /// Bluetooth serial link (operator / remote diagnostics).
    Bluetooth,
}

impl ChannelId {
    /// All channel identities, in snapshot ordering.
    pub const ALL: [ChannelId; 3] = [ChannelId::Serial, ChannelId::Can, ChannelId::Bluetooth];
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Serial => write!(f, "serial"),
            ChannelId::Can => write!(f, "can"),
            ChannelId::Bluetooth => write!(f, "bluetooth"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry records
// ─────────────────────────────────────────────────────────────────────────────

/// A three-axis reading (acceleration in g, angular rate in °/s, …).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axes3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Axes3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Largest absolute component, used for the stability check.
    pub fn max_abs(&self) -> f64 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }
}

/// One inertial measurement (accelerometer + gyroscope).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialSample {
    /// Linear acceleration per axis, in g.
    pub accel_g: Axes3,
    /// Angular rate per axis, in degrees per second.
    pub gyro_dps: Axes3,
    pub captured_at: Instant,
}

/// One time-of-flight range measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSample {
    /// Measured distance to the nearest surface, in millimetres.
    pub distance_mm: f64,
    pub captured_at: Instant,
}

/// One wheel-speed measurement from the IR encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub wheel_rpm: f64,
    pub captured_at: Instant,
}

/// One inductive proximity reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximitySample {
    /// Estimated distance to the detected object, in millimetres.
    pub distance_mm: f64,
    /// Raw trigger state of the sensor output pin.
    pub triggered: bool,
    pub captured_at: Instant,
}

/// One microwave-radar motion reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub motion_detected: bool,
    pub captured_at: Instant,
}

/// Tagged union over every decoded telemetry reading.
///
/// Records are immutable once constructed; the capture timestamp is monotonic
/// (`Instant`) so staleness arithmetic is immune to wall-clock steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryRecord {
    Inertial(InertialSample),
    Range(RangeSample),
    Speed(SpeedSample),
    Proximity(ProximitySample),
    Motion(MotionSample),
}

impl TelemetryRecord {
    /// Monotonic timestamp at which this record was captured (decoded).
    pub fn captured_at(&self) -> Instant {
        match self {
            TelemetryRecord::Inertial(s) => s.captured_at,
            TelemetryRecord::Range(s) => s.captured_at,
            TelemetryRecord::Speed(s) => s.captured_at,
            TelemetryRecord::Proximity(s) => s.captured_at,
            TelemetryRecord::Motion(s) => s.captured_at,
        }
    }

    /// Short kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryRecord::Inertial(_) => "inertial",
            TelemetryRecord::Range(_) => "range",
            TelemetryRecord::Speed(_) => "speed",
            TelemetryRecord::Proximity(_) => "proximity",
            TelemetryRecord::Motion(_) => "motion",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// One consistent per-tick view of every channel's latest telemetry.
///
/// `None` means the channel produced no record within the staleness window.
/// A snapshot is never mutated after construction; the aggregator builds a
/// fresh one per control tick.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: HashMap<ChannelId, Option<TelemetryRecord>>,
    taken_at: Instant,
}

impl Snapshot {
    pub fn new(entries: HashMap<ChannelId, Option<TelemetryRecord>>, taken_at: Instant) -> Self {
        Self { entries, taken_at }
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Latest non-stale record for `channel`, if any.
    pub fn record(&self, channel: ChannelId) -> Option<&TelemetryRecord> {
        self.entries.get(&channel).and_then(|r| r.as_ref())
    }

    /// Iterate over every configured channel entry.
    pub fn entries(&self) -> impl Iterator<Item = (ChannelId, Option<&TelemetryRecord>)> {
        self.entries.iter().map(|(id, rec)| (*id, rec.as_ref()))
    }

    /// First inertial sample found across all channels.
    pub fn inertial(&self) -> Option<&InertialSample> {
        self.entries.values().find_map(|rec| match rec {
            Some(TelemetryRecord::Inertial(s)) => Some(s),
            _ => None,
        })
    }

    /// Smallest obstacle distance reported by any range or proximity sample.
    pub fn nearest_obstacle_mm(&self) -> Option<f64> {
        self.entries
            .values()
            .filter_map(|rec| match rec {
                Some(TelemetryRecord::Range(s)) => Some(s.distance_mm),
                Some(TelemetryRecord::Proximity(s)) if s.triggered => Some(s.distance_mm),
                _ => None,
            })
            .min_by(|a, b| a.total_cmp(b))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Verdict
// ─────────────────────────────────────────────────────────────────────────────

/// Why a snapshot was classified unstable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnstableReason {
    /// The primary stability signal is absent from the snapshot.
    NoInertialData,
    /// An acceleration axis exceeded the configured threshold.
    AccelerationExceeded,
    /// A required channel went silent past its liveness timeout.
    ChannelSilent(ChannelId),
    /// The control loop itself missed its cadence deadline.
    ControlLoopStalled,
    /// An actuator write failed on a previous tick.
    ActuatorFault,
}

impl fmt::Display for UnstableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnstableReason::NoInertialData => write!(f, "no_inertial_data"),
            UnstableReason::AccelerationExceeded => write!(f, "acceleration_exceeded"),
            UnstableReason::ChannelSilent(ch) => write!(f, "channel_silent:{ch}"),
            UnstableReason::ControlLoopStalled => write!(f, "control_loop_stalled"),
            UnstableReason::ActuatorFault => write!(f, "actuator_fault"),
        }
    }
}

/// Per-tick safety classification, produced fresh from one [`Snapshot`] and
/// never cached across ticks.
///
/// Tie-break order when several conditions hold: `Unstable` > `ObstacleNear`
/// > `Stable`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    /// Safe to drive. `margin_g` is diagnostic only and never gates.
    Stable { margin_g: f64 },
    /// Actuation must halt until an explicit reset.
    Unstable { reason: UnstableReason },
    /// An obstacle is inside the soft-stop envelope.
    ObstacleNear { distance_mm: f64 },
}

// ─────────────────────────────────────────────────────────────────────────────
// Actuation state and commands
// ─────────────────────────────────────────────────────────────────────────────

/// Drive direction derived from the sign of the commanded speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

/// The actuation gate's state. Owned exclusively by the gate; every
/// transition is serialized through its tick function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActuationState {
    Idle,
    Driving { speed: f64, steer_angle_deg: f64 },
    SoftStopping,
    EmergencyStopped,
}

impl fmt::Display for ActuationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuationState::Idle => write!(f, "idle"),
            ActuationState::Driving { .. } => write!(f, "driving"),
            ActuationState::SoftStopping => write!(f, "soft_stopping"),
            ActuationState::EmergencyStopped => write!(f, "emergency_stopped"),
        }
    }
}

/// One actuator command. Produced by the gate, consumed once by the
/// dispatcher, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Normalized drive speed in `[-1, 1]`; negative is reverse.
    pub speed: f64,
    /// Steering angle in degrees, `[-90, 90]`; 0 is centred.
    pub steer_angle_deg: f64,
    /// Sprayer pump on/off.
    pub pump: bool,
}

impl Command {
    /// Build a command with `speed` and `steer_angle_deg` clamped to range.
    pub fn new(speed: f64, steer_angle_deg: f64, pump: bool) -> Self {
        Self {
            speed: speed.clamp(-1.0, 1.0),
            steer_angle_deg: steer_angle_deg.clamp(-90.0, 90.0),
            pump,
        }
    }

    /// Emergency full stop: zero speed, steering re-centred, pump off.
    pub fn full_stop() -> Self {
        Self {
            speed: 0.0,
            steer_angle_deg: 0.0,
            pump: false,
        }
    }

    /// Soft stop: zero speed, steering and pump retained.
    pub fn soft_stop(steer_angle_deg: f64, pump: bool) -> Self {
        Self {
            speed: 0.0,
            steer_angle_deg: steer_angle_deg.clamp(-90.0, 90.0),
            pump,
        }
    }

    /// `true` when both numeric fields are within `epsilon` and the pump
    /// state matches. Used by the dispatcher to skip redundant writes.
    pub fn approx_eq(&self, other: &Command, epsilon: f64) -> bool {
        (self.speed - other.speed).abs() <= epsilon
            && (self.steer_angle_deg - other.steer_angle_deg).abs() <= epsilon
            && self.pump == other.pump
    }

    pub fn direction(&self) -> Direction {
        if self.speed < 0.0 {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::full_stop()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Transport-level channel failure. Recovered locally by the channel via
/// backoff reconnect; never fatal to the control loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("transport error on {channel}: {details}")]
    Transport { channel: ChannelId, details: String },

    #[error("outbound write on {channel} timed out after {timeout_ms} ms")]
    WriteTimeout { channel: ChannelId, timeout_ms: u64 },

    #[error("channel {channel} is closed")]
    Closed { channel: ChannelId },
}

/// Malformed frame. Logged and discarded by the receive loop; has no effect
/// on channel health.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("frame decode failed: {0}")]
pub struct DecodeError(pub String);

/// Actuator write failure. Surfaced to the gate, which forces an emergency
/// stop on the next tick.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("actuator fault on {component}: {details}")]
pub struct ActuatorError {
    pub component: String,
    pub details: String,
}

impl ActuatorError {
    pub fn new(component: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            details: details.into(),
        }
    }
}

/// Invalid configuration. Fatal at startup only, before any channel or loop
/// starts.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid config value for `{field}`: {details}")]
pub struct ConfigError {
    pub field: String,
    pub details: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            details: details.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Diagnostics bus events
// ─────────────────────────────────────────────────────────────────────────────

/// Unified envelope for the diagnostics event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "helmos-runtime::control_loop"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn now(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants routed over the diagnostics bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// The gate changed state.
    StateTransition {
        from: ActuationState,
        to: ActuationState,
    },
    /// A channel lost its transport or entered backoff.
    ChannelFault { channel: ChannelId, details: String },
    /// An actuator write failed.
    ActuatorFault { component: String, details: String },
    /// The watchdog forced an unstable verdict.
    WatchdogTrip { reason: UnstableReason },
    /// A gated command was dispatched to the drivers.
    CommandDispatched { command: Command },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
