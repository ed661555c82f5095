//! Topic-routed publish/subscribe event bus.
//!
//! Built on [`tokio::sync::broadcast`] so every subscriber receives every
//! event without any single subscriber blocking the others. Traffic is
//! partitioned into three [`Topic`] lanes:
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | Per-tick snapshot/verdict diagnostics |
//! | [`Topic::Commands`] | Gated commands as dispatched to the drivers |
//! | [`Topic::SafetyAlerts`] | State transitions, faults, watchdog trips |
//!
//! The control loop publishes best-effort: an empty topic is a normal
//! condition during bring-up, not a control-path failure.

use helmos_types::Event;
use tokio::sync::broadcast;
use tracing::warn;

/// Buffered events per topic before the oldest are dropped for slow
/// subscribers.
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the diagnostics bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-tick snapshot and verdict diagnostics.
    Telemetry,
    /// Gated commands as they are handed to the actuator drivers.
    Commands,
    /// Safety-relevant events: transitions, faults, watchdog trips.
    SafetyAlerts,
}

/// Publish failure: nobody is listening on the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusError {
    pub topic: Topic,
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no subscribers on topic {:?}", self.topic)
    }
}

impl std::error::Error for BusError {}

/// Shared diagnostics bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
    safety_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with `capacity` buffered events per topic.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        let (safety_alerts, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            commands,
            safety_alerts,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of receivers that were handed the event, or
    /// [`BusError`] when nobody is subscribed. Callers on the control path
    /// treat that error as best-effort and ignore it.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, BusError> {
        self.sender(topic)
            .send(event)
            .map_err(|_| BusError { topic })
    }

    /// Subscribe to one [`Topic`] lane.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Commands => &self.commands,
            Topic::SafetyAlerts => &self.safety_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] lane.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// A `Lagged(n)` error means this subscriber fell behind and `n` events
    /// were dropped; the caller decides whether to continue.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant; returns `None` when no event is waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
