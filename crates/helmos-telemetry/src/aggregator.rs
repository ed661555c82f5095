//! Per-tick snapshot assembly.
//!
//! The aggregator never touches I/O. It reads each source's latest record,
//! applies the staleness window and hands the control loop one immutable
//! [`Snapshot`]. Staleness is evaluated fresh on every call: a record that
//! was fresh last tick may be stale this tick with no new data in between.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use helmos_types::{ChannelId, Snapshot, TelemetryRecord};

use crate::channel::TelemetryChannel;

/// Records older than this are treated as absent.
pub const DEFAULT_STALENESS: Duration = Duration::from_millis(500);

/// Anything that can hand over a latest telemetry record without blocking.
pub trait TelemetrySource: Send + Sync {
    fn id(&self) -> ChannelId;
    fn latest(&self) -> Option<TelemetryRecord>;
}

impl TelemetrySource for TelemetryChannel {
    fn id(&self) -> ChannelId {
        self.id()
    }

    fn latest(&self) -> Option<TelemetryRecord> {
        self.latest()
    }
}

// The runtime shares one channel between the aggregator and its shutdown
// path, so sources behind an `Arc` work too.
impl<T: TelemetrySource + ?Sized> TelemetrySource for std::sync::Arc<T> {
    fn id(&self) -> ChannelId {
        (**self).id()
    }

    fn latest(&self) -> Option<TelemetryRecord> {
        (**self).latest()
    }
}

/// Staleness-filtering view over every configured telemetry source.
pub struct Aggregator {
    sources: Vec<Box<dyn TelemetrySource>>,
    staleness: Duration,
}

impl Aggregator {
    pub fn new(staleness: Duration) -> Self {
        Self {
            sources: Vec::new(),
            staleness,
        }
    }

    pub fn add_source(&mut self, source: Box<dyn TelemetrySource>) {
        self.sources.push(source);
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Build the snapshot for `now`.
    ///
    /// A record exactly at the staleness boundary still counts as fresh.
    /// Pure read; calling twice with the same `now` yields the same view.
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let entries: HashMap<ChannelId, Option<TelemetryRecord>> = self
            .sources
            .iter()
            .map(|source| {
                let record = source
                    .latest()
                    .filter(|r| now.saturating_duration_since(r.captured_at()) <= self.staleness);
                (source.id(), record)
            })
            .collect();
        Snapshot::new(entries, now)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}
