//! `helmos-telemetry` – telemetry ingestion for the safety interlock.
//!
//! One [`TelemetryChannel`] per physical link (serial, CAN, Bluetooth). Each
//! channel owns a background task that receives frames, decodes them and
//! publishes the latest record into a `tokio::sync::watch` slot. The
//! [`Aggregator`] reads every slot once per control tick and assembles a
//! staleness-filtered [`Snapshot`][helmos_types::Snapshot].
//!
//! # Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`transport`] | Byte-level link contract ([`Transport`]) plus the in-memory loopback used in tests |
//! | [`decode`] | Frame decoders: newline JSON (serial/BT) and arbitration-id CAN layouts |
//! | [`channel`] | [`TelemetryChannel`] lifecycle: connect, receive loop, backoff reconnect, outbound queue |
//! | [`aggregator`] | Per-tick [`Snapshot`][helmos_types::Snapshot] assembly with staleness filtering |

pub mod aggregator;
pub mod channel;
pub mod decode;
pub mod transport;

pub use aggregator::{Aggregator, TelemetrySource};
pub use channel::{backoff_delay, TelemetryChannel};
pub use decode::{BluetoothJsonDecoder, CanDecoder, FrameDecoder, SerialJsonDecoder};
pub use transport::{LoopbackHandle, LoopbackTransport, Transport};
