//! [`Watchdog`] – channel liveness and loop cadence supervisor.
//!
//! Observes two things: the capture timestamp of the latest record seen on
//! each required channel, and the control loop's own tick timestamp. When
//! either exceeds its deadline, [`Watchdog::check`] returns a forced
//! `Unstable` verdict for the runtime to inject through the gate's normal
//! tick entry point – the single fault-injection path, serialized with the
//! control flow so it cannot race a regular tick.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use helmos_types::{ChannelId, UnstableReason, Verdict};
use tracing::warn;

/// Default liveness timeout for a required channel.
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default deadline for the control loop's own cadence.
pub const DEFAULT_LOOP_DEADLINE: Duration = Duration::from_millis(200);

struct ChannelEntry {
    last_seen: Instant,
    timeout: Duration,
}

/// Supervises channel liveness and control-loop cadence.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use helmos_kernel::Watchdog;
/// use helmos_types::ChannelId;
///
/// let mut wd = Watchdog::new(Duration::from_millis(200));
/// wd.register_channel(ChannelId::Serial, Duration::from_secs(1));
///
/// let now = Instant::now();
/// wd.observe_channel(ChannelId::Serial, now);
/// wd.observe_tick(now);
/// assert!(wd.check(now).is_none());
/// ```
pub struct Watchdog {
    channels: HashMap<ChannelId, ChannelEntry>,
    loop_deadline: Duration,
    last_tick: Instant,
}

impl Watchdog {
    /// Create a watchdog with the given loop cadence deadline. The tick
    /// clock starts at now, so a freshly built watchdog is healthy.
    pub fn new(loop_deadline: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            loop_deadline,
            last_tick: Instant::now(),
        }
    }

    /// Register `channel` as required, with its liveness `timeout`. The
    /// last-seen timestamp initialises to now. Re-registering resets it.
    pub fn register_channel(&mut self, channel: ChannelId, timeout: Duration) {
        self.channels.insert(
            channel,
            ChannelEntry {
                last_seen: Instant::now(),
                timeout,
            },
        );
    }

    /// Record that `channel` produced a record captured at `seen_at`.
    ///
    /// Timestamps only move forward; replayed older records are ignored.
    /// No-ops for channels that are not registered as required.
    pub fn observe_channel(&mut self, channel: ChannelId, seen_at: Instant) {
        if let Some(entry) = self.channels.get_mut(&channel)
            && seen_at > entry.last_seen
        {
            entry.last_seen = seen_at;
        }
    }

    /// Record that the control loop completed a tick at `now`.
    pub fn observe_tick(&mut self, now: Instant) {
        self.last_tick = now;
    }

    /// Return the forced verdict to inject, if any deadline was missed.
    ///
    /// Checked in a fixed order (loop cadence first, then channels in
    /// [`ChannelId::ALL`] order) so a multi-fault tick reports
    /// deterministically.
    pub fn check(&self, now: Instant) -> Option<Verdict> {
        if now.duration_since(self.last_tick) > self.loop_deadline {
            warn!(deadline_ms = self.loop_deadline.as_millis() as u64, "control loop stalled");
            return Some(Verdict::Unstable {
                reason: UnstableReason::ControlLoopStalled,
            });
        }
        for id in ChannelId::ALL {
            if let Some(entry) = self.channels.get(&id)
                && now.duration_since(entry.last_seen) > entry.timeout
            {
                warn!(channel = %id, "channel silent past liveness timeout");
                return Some(Verdict::Unstable {
                    reason: UnstableReason::ChannelSilent(id),
                });
            }
        }
        None
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_DEADLINE)
    }
}
