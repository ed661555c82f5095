//! [`ActuationGate`] – the state machine owning actuation authority.
//!
//! Consumes one [`Verdict`] and one requested [`Command`] per control tick
//! and arbitrates between normal drive, soft stop, and emergency stop. All
//! state transitions are serialized through [`ActuationGate::tick`]; no other
//! component mutates the [`ActuationState`].
//!
//! # Transition table
//!
//! | From | Verdict | To / action |
//! |---|---|---|
//! | Idle / Driving | `Stable` | Driving, apply requested command |
//! | Idle / Driving | `ObstacleNear` | SoftStopping, zero speed, steering retained |
//! | Idle / Driving | `Unstable` | EmergencyStopped, full stop |
//! | SoftStopping | `Stable` held ≥ dwell | Driving, apply requested command |
//! | SoftStopping | `Stable` below dwell | remain, zero speed |
//! | SoftStopping | `ObstacleNear` | remain, dwell reset |
//! | SoftStopping | `Unstable` | EmergencyStopped, full stop |
//! | EmergencyStopped | any | remain; requested commands are discarded |
//!
//! The dwell requirement (default 300 ms of consecutive `Stable` ticks)
//! debounces the SoftStopping → Driving edge so the vehicle does not
//! oscillate at an obstacle-detection boundary. EmergencyStopped has no
//! dwell-based recovery: only an explicit [`ActuationGate::reset`] leaves it.
//!
//! Actuator write failures reported via [`ActuationGate::report_fault`] are
//! folded into the next tick as an `Unstable` verdict, never raised as
//! control flow; a skipped tick is itself a watchdog-observable fault.

use std::time::{Duration, Instant};

use helmos_types::{ActuationState, ActuatorError, Command, UnstableReason, Verdict};
use tracing::{info, warn};

/// Default minimum duration the verdict must stay `Stable` before the gate
/// resumes driving out of a soft stop.
pub const DEFAULT_DWELL: Duration = Duration::from_millis(300);

/// The control core state machine. One instance per vehicle; owned by the
/// foreground control loop and never shared across tasks.
pub struct ActuationGate {
    state: ActuationState,
    dwell: Duration,
    /// Start of the current consecutive-`Stable` streak while soft-stopping.
    stable_since: Option<Instant>,
    /// Steering/pump carried into a soft stop, taken from the last applied
    /// drive command.
    retained_steer_deg: f64,
    retained_pump: bool,
    /// Actuator fault latched by the dispatcher, consumed on the next tick.
    pending_fault: Option<ActuatorError>,
    last_tick: Option<Instant>,
}

impl ActuationGate {
    pub fn new(dwell: Duration) -> Self {
        Self {
            state: ActuationState::Idle,
            dwell,
            stable_since: None,
            retained_steer_deg: 0.0,
            retained_pump: false,
            pending_fault: None,
            last_tick: None,
        }
    }

    pub fn state(&self) -> ActuationState {
        self.state
    }

    /// Monotonic timestamp of the most recent tick, observed by the watchdog.
    pub fn last_tick(&self) -> Option<Instant> {
        self.last_tick
    }

    /// Latch an actuator write failure. The next tick treats it as an
    /// `Unstable` verdict and forces EmergencyStopped.
    pub fn report_fault(&mut self, fault: ActuatorError) {
        warn!(component = %fault.component, details = %fault.details, "actuator fault latched");
        self.pending_fault = Some(fault);
    }

    /// Explicit external reset out of EmergencyStopped.
    ///
    /// Returns `true` when the gate actually left the emergency state. A
    /// verdict alone can never do this.
    pub fn reset(&mut self) -> bool {
        if self.state == ActuationState::EmergencyStopped {
            info!("emergency stop reset by operator");
            self.state = ActuationState::Idle;
            self.stable_since = None;
            self.pending_fault = None;
            true
        } else {
            false
        }
    }

    /// Advance the state machine by one tick and return the command to
    /// dispatch.
    ///
    /// This is the single entry point for all transitions, including the
    /// watchdog's forced verdicts, which keeps fault injection race-free
    /// with the normal control flow.
    pub fn tick(&mut self, verdict: &Verdict, requested: &Command, now: Instant) -> Command {
        self.last_tick = Some(now);

        // A latched actuator fault overrides whatever the evaluator said.
        let verdict = match self.pending_fault.take() {
            Some(_) => Verdict::Unstable {
                reason: UnstableReason::ActuatorFault,
            },
            None => *verdict,
        };

        match (self.state, verdict) {
            // Terminal until reset; requested commands are discarded, not queued.
            (ActuationState::EmergencyStopped, _) => Command::full_stop(),

            (_, Verdict::Unstable { reason }) => {
                warn!(%reason, from = %self.state, "emergency stop");
                self.state = ActuationState::EmergencyStopped;
                self.stable_since = None;
                Command::full_stop()
            }

            (ActuationState::Idle | ActuationState::Driving { .. }, Verdict::Stable { .. }) => {
                self.apply_drive(requested)
            }

            (
                ActuationState::Idle | ActuationState::Driving { .. },
                Verdict::ObstacleNear { distance_mm },
            ) => {
                info!(distance_mm, from = %self.state, "soft stop");
                self.state = ActuationState::SoftStopping;
                self.stable_since = None;
                self.soft_stop_command()
            }

            (ActuationState::SoftStopping, Verdict::ObstacleNear { .. }) => {
                // Obstacle still present; any stable streak is void.
                self.stable_since = None;
                self.soft_stop_command()
            }

            (ActuationState::SoftStopping, Verdict::Stable { .. }) => {
                let since = *self.stable_since.get_or_insert(now);
                if now.duration_since(since) >= self.dwell {
                    info!("dwell satisfied, resuming drive");
                    self.stable_since = None;
                    self.apply_drive(requested)
                } else {
                    self.soft_stop_command()
                }
            }
        }
    }

    fn apply_drive(&mut self, requested: &Command) -> Command {
        self.state = ActuationState::Driving {
            speed: requested.speed,
            steer_angle_deg: requested.steer_angle_deg,
        };
        self.retained_steer_deg = requested.steer_angle_deg;
        self.retained_pump = requested.pump;
        *requested
    }

    fn soft_stop_command(&self) -> Command {
        Command::soft_stop(self.retained_steer_deg, self.retained_pump)
    }
}

impl Default for ActuationGate {
    fn default() -> Self {
        Self::new(DEFAULT_DWELL)
    }
}
