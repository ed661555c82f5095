//! [`CommandDispatcher`] – gated-command fan-out to the actuator drivers.
//!
//! Consumes exactly one [`Command`] per control tick. The dispatcher tracks
//! the last applied command and skips writes for fields that did not change
//! beyond a small epsilon, so a steady-state command stream produces no
//! redundant actuator bus traffic.
//!
//! A write failure is returned to the caller, never retried here; the
//! runtime reports it to the gate, which forces an emergency stop on the
//! next tick. After a failure the last-applied record is cleared so the
//! following apply rewrites every field.

use helmos_types::{ActuatorError, Command};
use tracing::debug;

use crate::actuator::{DriveMotor, Pump, SteeringServo};

/// Default epsilon for change detection on speed and steering angle.
pub const DEFAULT_EPSILON: f64 = 1e-3;

/// Fan-out of gated commands to the drive motor, steering servo, and pump.
pub struct CommandDispatcher<D, S, P> {
    drive: D,
    steering: S,
    pump: P,
    last_applied: Option<Command>,
    epsilon: f64,
    /// Maximum speed-magnitude increase per apply. Decreases (braking,
    /// stops) are never ramped.
    ramp_step: Option<f64>,
}

impl<D: DriveMotor, S: SteeringServo, P: Pump> CommandDispatcher<D, S, P> {
    pub fn new(drive: D, steering: S, pump: P) -> Self {
        Self {
            drive,
            steering,
            pump,
            last_applied: None,
            epsilon: DEFAULT_EPSILON,
            ramp_step: None,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Enable speed ramping: each apply moves the speed at most `step`
    /// closer to the requested value when accelerating.
    pub fn with_ramp(mut self, step: f64) -> Self {
        self.ramp_step = Some(step);
        self
    }

    /// The command as last written to the drivers (after ramping).
    pub fn last_applied(&self) -> Option<Command> {
        self.last_applied
    }

    /// Apply `command`, writing only the fields that changed.
    ///
    /// Idempotent: applying an unchanged command is a no-op with zero
    /// underlying writes.
    pub fn apply(&mut self, command: &Command) -> Result<(), ActuatorError> {
        let target = self.ramped(command);

        if let Some(last) = self.last_applied
            && target.approx_eq(&last, self.epsilon)
        {
            return Ok(());
        }

        if let Err(e) = self.write_changed(&target) {
            // Force a full rewrite on the next apply; partial state on the
            // bus is unknown after a failed write.
            self.last_applied = None;
            return Err(e);
        }

        debug!(speed = target.speed, steer = target.steer_angle_deg, pump = target.pump, "command applied");
        self.last_applied = Some(target);
        Ok(())
    }

    /// Immediate stop: motor halted, pump off, steering left in place.
    pub fn halt(&mut self) -> Result<(), ActuatorError> {
        self.drive.stop()?;
        self.pump.set_active(false)?;
        let steer = self.last_applied.map_or(0.0, |c| c.steer_angle_deg);
        self.last_applied = Some(Command::soft_stop(steer, false));
        Ok(())
    }

    /// Release all driver resources. Called once during teardown.
    pub fn shutdown(&mut self) {
        self.drive.cleanup();
        self.steering.cleanup();
        self.pump.cleanup();
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }

    pub fn steering(&self) -> &S {
        &self.steering
    }

    pub fn pump(&self) -> &P {
        &self.pump
    }

    pub fn drive_mut(&mut self) -> &mut D {
        &mut self.drive
    }

    pub fn steering_mut(&mut self) -> &mut S {
        &mut self.steering
    }

    pub fn pump_mut(&mut self) -> &mut P {
        &mut self.pump
    }

    fn ramped(&self, command: &Command) -> Command {
        let Some(step) = self.ramp_step else {
            return *command;
        };
        let current = self.last_applied.map_or(0.0, |c| c.speed);
        let delta = command.speed - current;
        // Ramp only while the magnitude grows; slowing down is immediate.
        let speed = if command.speed.abs() > current.abs() && delta.abs() > step {
            current + step * delta.signum()
        } else {
            command.speed
        };
        Command {
            speed,
            ..*command
        }
    }

    fn write_changed(&mut self, target: &Command) -> Result<(), ActuatorError> {
        let last = self.last_applied;

        let speed_changed = last.is_none_or(|l| (l.speed - target.speed).abs() > self.epsilon);
        if speed_changed {
            self.drive.set_direction(target.direction())?;
            self.drive.set_speed(target.speed.abs())?;
        }

        let steer_changed =
            last.is_none_or(|l| (l.steer_angle_deg - target.steer_angle_deg).abs() > self.epsilon);
        if steer_changed {
            self.steering.set_angle(target.steer_angle_deg)?;
        }

        let pump_changed = last.is_none_or(|l| l.pump != target.pump);
        if pump_changed {
            self.pump.set_active(target.pump)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDriveMotor, SimPump, SimSteeringServo};

    fn dispatcher() -> CommandDispatcher<SimDriveMotor, SimSteeringServo, SimPump> {
        CommandDispatcher::new(SimDriveMotor::new(), SimSteeringServo::new(), SimPump::new())
    }

    #[test]
    fn first_apply_writes_all_fields() {
        let mut d = dispatcher();
        d.apply(&Command::new(0.5, 20.0, true)).unwrap();
        assert_eq!(d.drive().speed_writes, 1);
        assert_eq!(d.steering().angle_writes, 1);
        assert_eq!(d.pump().writes, 1);
        assert!(d.pump().active);
    }

    #[test]
    fn applying_same_command_twice_writes_once() {
        let mut d = dispatcher();
        let cmd = Command::new(0.5, 20.0, false);
        d.apply(&cmd).unwrap();
        d.apply(&cmd).unwrap();
        assert_eq!(d.drive().speed_writes, 1);
        assert_eq!(d.steering().angle_writes, 1);
    }

    #[test]
    fn change_within_epsilon_is_skipped() {
        let mut d = dispatcher().with_epsilon(1e-2);
        d.apply(&Command::new(0.5, 20.0, false)).unwrap();
        d.apply(&Command::new(0.505, 20.005, false)).unwrap();
        assert_eq!(d.drive().speed_writes, 1);
    }

    #[test]
    fn change_beyond_epsilon_writes_again() {
        let mut d = dispatcher();
        d.apply(&Command::new(0.5, 20.0, false)).unwrap();
        d.apply(&Command::new(0.7, 20.0, false)).unwrap();
        assert_eq!(d.drive().speed_writes, 2);
        // Steering untouched by the second apply.
        assert_eq!(d.steering().angle_writes, 1);
    }

    #[test]
    fn reverse_speed_sets_direction_and_magnitude() {
        let mut d = dispatcher();
        d.apply(&Command::new(-0.6, 0.0, false)).unwrap();
        assert_eq!(d.drive().direction, Some(helmos_types::Direction::Reverse));
        assert!((d.drive().speed - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn write_error_is_surfaced_not_retried() {
        let mut d = dispatcher();
        d.drive.fail_next = true;
        let err = d.apply(&Command::new(0.5, 0.0, false)).unwrap_err();
        assert_eq!(err.component, "drive_motor");
        assert!(d.last_applied().is_none());
    }

    #[test]
    fn apply_after_error_rewrites_everything() {
        let mut d = dispatcher();
        d.apply(&Command::new(0.5, 20.0, true)).unwrap();
        d.drive.fail_next = true;
        let _ = d.apply(&Command::new(0.7, 20.0, true));
        // Same command again: all fields rewritten because state is unknown.
        d.apply(&Command::new(0.7, 20.0, true)).unwrap();
        assert_eq!(d.steering().angle_writes, 2);
        assert_eq!(d.pump().writes, 2);
    }

    #[test]
    fn ramp_limits_acceleration_per_apply() {
        let mut d = dispatcher().with_ramp(0.2);
        d.apply(&Command::new(1.0, 0.0, false)).unwrap();
        assert!((d.last_applied().unwrap().speed - 0.2).abs() < 1e-9);
        d.apply(&Command::new(1.0, 0.0, false)).unwrap();
        assert!((d.last_applied().unwrap().speed - 0.4).abs() < 1e-9);
    }

    #[test]
    fn ramp_converges_to_target() {
        let mut d = dispatcher().with_ramp(0.3);
        for _ in 0..5 {
            d.apply(&Command::new(0.8, 0.0, false)).unwrap();
        }
        assert!((d.last_applied().unwrap().speed - 0.8).abs() < 1e-9);
    }

    #[test]
    fn ramp_never_delays_a_stop() {
        let mut d = dispatcher().with_ramp(0.1);
        for _ in 0..4 {
            d.apply(&Command::new(1.0, 0.0, false)).unwrap();
        }
        d.apply(&Command::full_stop()).unwrap();
        assert_eq!(d.last_applied().unwrap().speed, 0.0);
        assert!((d.drive().speed).abs() < f64::EPSILON);
    }

    #[test]
    fn halt_stops_motor_and_pump_keeps_steering() {
        let mut d = dispatcher();
        d.apply(&Command::new(0.5, 30.0, true)).unwrap();
        d.halt().unwrap();
        assert!(d.drive().stopped);
        assert!(!d.pump().active);
        assert!((d.last_applied().unwrap().steer_angle_deg - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn shutdown_cleans_up_every_driver() {
        let mut d = dispatcher();
        d.shutdown();
        assert!(d.drive().cleaned_up);
        assert!(d.steering().cleaned_up);
        assert!(d.pump().cleaned_up);
    }
}
