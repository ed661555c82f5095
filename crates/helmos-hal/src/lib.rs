//! `helmos-hal` – actuator driver seam and command fan-out.
//!
//! The rest of the system only ever talks to the driver traits in
//! [`actuator`], so chip-level drivers (PWM motor bridges, servo timing,
//! relay-switched pumps) can be swapped without touching the control core.
//!
//! # Modules
//!
//! - [`actuator`] – the synchronous driver contract: [`DriveMotor`],
//!   [`SteeringServo`], [`Pump`]. Every method is safe to call repeatedly
//!   with the same value.
//! - [`sim`] – in-memory drivers recording applied values and write counts,
//!   used by tests and the bench harness.
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   fan-out of one gated [`Command`][helmos_types::Command] per tick to the
//!   three drivers, deduplicated against the last applied value.

pub mod actuator;
pub mod dispatcher;
pub mod sim;

pub use actuator::{DriveMotor, Pump, SteeringServo};
pub use dispatcher::CommandDispatcher;
pub use sim::{SimDriveMotor, SimPump, SimSteeringServo};
