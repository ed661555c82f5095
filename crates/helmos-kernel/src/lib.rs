//! `helmos-kernel` – Safety & Gating
//!
//! The control core. It does not plan; it classifies and enforces.
//!
//! # Modules
//!
//! - [`evaluator`] – [`StabilityEvaluator`][evaluator::StabilityEvaluator]:
//!   a pure function from one telemetry [`Snapshot`][helmos_types::Snapshot]
//!   to a [`Verdict`][helmos_types::Verdict], with a fixed priority order
//!   (`Unstable` > `ObstacleNear` > `Stable`).
//! - [`gate`] – [`ActuationGate`][gate::ActuationGate]: the state machine
//!   owning actuation authority. Every transition is serialized through its
//!   tick function; the emergency-stopped state is only exited by an
//!   explicit external reset.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: supervises channel
//!   liveness and the control loop's own cadence, producing a forced
//!   `Unstable` verdict that the runtime injects through the normal tick
//!   entry point.

pub mod evaluator;
pub mod gate;
pub mod watchdog;

pub use evaluator::StabilityEvaluator;
pub use gate::ActuationGate;
pub use watchdog::Watchdog;
