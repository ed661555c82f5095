//! Synchronous actuator driver traits.
//!
//! Drivers wrap the mechanical I/O (PWM duty cycles, direction pins, relay
//! switching) behind a narrow synchronous contract. Two rules bind every
//! implementation:
//!
//! - **Idempotent**: calling a setter repeatedly with the same value is
//!   always safe and must not fault.
//! - **Boundary-tolerant**: a value already at a range boundary is applied,
//!   not rejected.
//!
//! Errors are [`ActuatorError`]; the dispatcher surfaces them to the gate
//! rather than retrying silently.

use helmos_types::{ActuatorError, Direction};

/// The main drive motor (PWM + direction pins behind the scenes).
pub trait DriveMotor: Send {
    /// Apply a normalized speed magnitude in `[0, 1]`.
    fn set_speed(&mut self, speed: f64) -> Result<(), ActuatorError>;

    /// Select the drive direction.
    fn set_direction(&mut self, direction: Direction) -> Result<(), ActuatorError>;

    /// Cut motor output immediately.
    fn stop(&mut self) -> Result<(), ActuatorError>;

    /// Release driver resources. Called once during teardown.
    fn cleanup(&mut self);
}

/// The steering servo.
pub trait SteeringServo: Send {
    /// Move to `angle_deg`, degrees from centre, `[-90, 90]`.
    fn set_angle(&mut self, angle_deg: f64) -> Result<(), ActuatorError>;

    fn cleanup(&mut self);
}

/// The sprayer pump.
pub trait Pump: Send {
    fn set_active(&mut self, active: bool) -> Result<(), ActuatorError>;

    fn cleanup(&mut self);
}
