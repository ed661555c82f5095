//! `helmos-middleware` – diagnostics event bus.
//!
//! A headless, topic-routed publish/subscribe bus used to fan out state
//! transitions, channel faults, and dispatched commands to any observer
//! (logging sinks, the Bluetooth diagnostics uplink, test harnesses) without
//! the control loop ever blocking on a slow consumer.

pub mod bus;

pub use bus::{BusError, EventBus, Topic, TopicReceiver};
