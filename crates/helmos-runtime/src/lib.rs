//! `helmos-runtime` – the foreground control loop and process plumbing.
//!
//! [`ControlLoop`] wires the aggregator, evaluator, gate, dispatcher and
//! watchdog into one serialized tick executed at a fixed cadence. All state
//! transitions happen inside that tick; nothing else in the process touches
//! the gate or the drivers.
//!
//! [`telemetry::init_tracing`] sets up the `tracing` subscriber with an
//! optional OTLP span exporter and must be called once before the loop
//! starts.

pub mod control_loop;
pub mod telemetry;

pub use control_loop::{ControlLoop, DEFAULT_TICK_CADENCE};
pub use telemetry::{init_tracing, TracerProviderGuard};
