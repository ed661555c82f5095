//! In-memory simulated drivers.
//!
//! Each sim driver records the last applied value and counts every write so
//! tests can assert idempotency at the actuator boundary. `fail_next` lets a
//! test inject a single write fault to exercise the dispatcher's error
//! surfacing.

use helmos_types::{ActuatorError, Direction};
use tracing::debug;

use crate::actuator::{DriveMotor, Pump, SteeringServo};

/// Simulated drive motor.
#[derive(Debug, Default)]
pub struct SimDriveMotor {
    pub speed: f64,
    pub direction: Option<Direction>,
    pub speed_writes: usize,
    pub stopped: bool,
    pub cleaned_up: bool,
    pub fail_next: bool,
}

impl SimDriveMotor {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_fault(&mut self, component: &str) -> Result<(), ActuatorError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(ActuatorError::new(component, "simulated write failure"));
        }
        Ok(())
    }
}

impl DriveMotor for SimDriveMotor {
    fn set_speed(&mut self, speed: f64) -> Result<(), ActuatorError> {
        self.take_fault("drive_motor")?;
        debug!(speed, "sim motor speed");
        self.speed = speed;
        self.speed_writes += 1;
        self.stopped = false;
        Ok(())
    }

    fn set_direction(&mut self, direction: Direction) -> Result<(), ActuatorError> {
        self.direction = Some(direction);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.speed = 0.0;
        self.stopped = true;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.cleaned_up = true;
    }
}

/// Simulated steering servo.
#[derive(Debug, Default)]
pub struct SimSteeringServo {
    pub angle_deg: f64,
    pub angle_writes: usize,
    pub cleaned_up: bool,
}

impl SimSteeringServo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SteeringServo for SimSteeringServo {
    fn set_angle(&mut self, angle_deg: f64) -> Result<(), ActuatorError> {
        debug!(angle_deg, "sim servo angle");
        self.angle_deg = angle_deg;
        self.angle_writes += 1;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.cleaned_up = true;
    }
}

/// Simulated sprayer pump.
#[derive(Debug, Default)]
pub struct SimPump {
    pub active: bool,
    pub writes: usize,
    pub cleaned_up: bool,
}

impl SimPump {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pump for SimPump {
    fn set_active(&mut self, active: bool) -> Result<(), ActuatorError> {
        self.active = active;
        self.writes += 1;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.cleaned_up = true;
    }
}
