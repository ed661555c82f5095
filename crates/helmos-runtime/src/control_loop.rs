//! [`ControlLoop`] – the serialized safety tick.
//!
//! Every control decision flows through one tick executed at a fixed
//! cadence. Each tick:
//!
//! 1. **Snapshot** – ask the [`Aggregator`] for a staleness-filtered view of
//!    every channel.
//! 2. **Heartbeats** – feed fresh capture timestamps to the [`Watchdog`].
//! 3. **Evaluate** – classify the snapshot with the [`StabilityEvaluator`].
//! 4. **Override** – a tripped watchdog replaces the verdict with a forced
//!    `Unstable`, injected through the same gate entry point as any other
//!    verdict.
//! 5. **Gate** – [`ActuationGate::tick`] turns verdict plus the operator's
//!    requested command into the one command allowed this tick.
//! 6. **Dispatch** – [`CommandDispatcher::apply`] writes the command; a
//!    write failure is reported back to the gate, which forces an emergency
//!    stop on the next tick.
//!
//! Gate transitions, watchdog trips, channel faults and dispatched commands
//! are published to the diagnostics [`EventBus`]; the bus is observe-only
//! and can never influence a verdict.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use helmos_hal::{CommandDispatcher, DriveMotor, Pump, SteeringServo};
use helmos_kernel::{ActuationGate, StabilityEvaluator, Watchdog};
use helmos_middleware::{EventBus, Topic};
use helmos_telemetry::{Aggregator, TelemetryChannel, TelemetrySource};
use helmos_types::{ActuationState, ChannelId, Command, Event, EventPayload, Verdict};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Default tick cadence.
pub const DEFAULT_TICK_CADENCE: Duration = Duration::from_millis(50);

const EVENT_SOURCE: &str = "helmos-runtime::control_loop";

/// Owns every control-side component and serializes all state transitions.
pub struct ControlLoop<D, S, P> {
    aggregator: Aggregator,
    evaluator: StabilityEvaluator,
    gate: ActuationGate,
    dispatcher: CommandDispatcher<D, S, P>,
    watchdog: Watchdog,
    bus: Arc<EventBus>,
    channels: Vec<Arc<TelemetryChannel>>,
    channel_health: HashMap<ChannelId, bool>,
    requested: Command,
    cadence: Duration,
}

impl<D: DriveMotor, S: SteeringServo, P: Pump> ControlLoop<D, S, P> {
    pub fn new(
        aggregator: Aggregator,
        evaluator: StabilityEvaluator,
        gate: ActuationGate,
        dispatcher: CommandDispatcher<D, S, P>,
        watchdog: Watchdog,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            aggregator,
            evaluator,
            gate,
            dispatcher,
            watchdog,
            bus,
            channels: Vec::new(),
            channel_health: HashMap::new(),
            requested: Command::full_stop(),
            cadence: DEFAULT_TICK_CADENCE,
        }
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Wire a live channel in: aggregator source, watchdog liveness and the
    /// shutdown list.
    pub fn add_channel(&mut self, channel: Arc<TelemetryChannel>, liveness_timeout: Duration) {
        self.watchdog
            .register_channel(channel.id(), liveness_timeout);
        self.aggregator.add_source(Box::new(Arc::clone(&channel)));
        self.channel_health.insert(channel.id(), true);
        self.channels.push(channel);
    }

    /// Register a bare source with the aggregator (sim and test rigs).
    pub fn add_source(&mut self, source: Box<dyn TelemetrySource>) {
        self.aggregator.add_source(source);
    }

    /// Mark a channel as required for liveness without wiring a transport.
    pub fn require_channel(&mut self, channel: ChannelId, liveness_timeout: Duration) {
        self.watchdog.register_channel(channel, liveness_timeout);
    }

    /// Replace the operator's requested command. Consumed fresh each tick.
    pub fn set_request(&mut self, requested: Command) {
        self.requested = requested;
    }

    pub fn request(&self) -> Command {
        self.requested
    }

    pub fn state(&self) -> ActuationState {
        self.gate.state()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<D, S, P> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut CommandDispatcher<D, S, P> {
        &mut self.dispatcher
    }

    /// Forward an explicit operator reset to the gate.
    ///
    /// Returns true when the gate actually left `EmergencyStopped`.
    pub fn reset_emergency(&mut self) -> bool {
        let before = self.gate.state();
        if self.gate.reset() {
            self.publish(
                Topic::SafetyAlerts,
                EventPayload::StateTransition {
                    from: before,
                    to: self.gate.state(),
                },
            );
            true
        } else {
            false
        }
    }

    /// Execute one control tick at `now`.
    pub fn tick(&mut self, now: Instant) {
        let snapshot = self.aggregator.snapshot(now);
        for (id, record) in snapshot.entries() {
            if let Some(record) = record {
                self.watchdog.observe_channel(id, record.captured_at());
            }
        }

        let mut verdict = self.evaluator.evaluate(&snapshot);
        // Stall detection compares against the previous tick, so the check
        // runs before this tick is recorded.
        if let Some(forced) = self.watchdog.check(now) {
            if let Verdict::Unstable { reason } = forced {
                warn!(%reason, "watchdog forced verdict");
                self.publish(Topic::SafetyAlerts, EventPayload::WatchdogTrip { reason });
            }
            verdict = forced;
        }
        self.watchdog.observe_tick(now);
        self.monitor_channel_health();

        let before = self.gate.state();
        let command = self.gate.tick(&verdict, &self.requested, now);
        let after = self.gate.state();
        if before != after {
            info!(from = %before, to = %after, "gate transition");
            self.publish(
                Topic::SafetyAlerts,
                EventPayload::StateTransition { from: before, to: after },
            );
        }

        let prev = self.dispatcher.last_applied();
        match self.dispatcher.apply(&command) {
            Ok(()) => {
                if let Some(applied) = self.dispatcher.last_applied()
                    && Some(applied) != prev
                {
                    self.publish(
                        Topic::Commands,
                        EventPayload::CommandDispatched { command: applied },
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "actuator write failed");
                self.publish(
                    Topic::SafetyAlerts,
                    EventPayload::ActuatorFault {
                        component: e.component.clone(),
                        details: e.details.clone(),
                    },
                );
                self.gate.report_fault(e);
            }
        }
    }

    /// Run ticks at the configured cadence until `shutdown` flips to true,
    /// then stop the vehicle and release every resource.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(cadence_ms = self.cadence.as_millis() as u64, "control loop running");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(Instant::now()),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Ordered teardown: stop the vehicle, join the channels, release the
    /// drivers.
    async fn shutdown(&mut self) {
        info!("shutting down: dispatching emergency stop");
        if let Err(e) = self.dispatcher.apply(&Command::full_stop()) {
            error!(error = %e, "emergency stop during shutdown failed");
        }
        for channel in self.channels.drain(..) {
            channel.disconnect().await;
        }
        self.dispatcher.shutdown();
        info!("shutdown complete");
    }

    fn monitor_channel_health(&mut self) {
        let mut faulted = Vec::new();
        for channel in &self.channels {
            let healthy = channel.is_healthy();
            let was_healthy = self
                .channel_health
                .insert(channel.id(), healthy)
                .unwrap_or(true);
            if was_healthy && !healthy {
                warn!(channel = %channel.id(), "channel entered backoff");
                faulted.push(channel.id());
            }
        }
        for channel in faulted {
            self.publish(
                Topic::SafetyAlerts,
                EventPayload::ChannelFault {
                    channel,
                    details: "transport lost; reconnecting".into(),
                },
            );
        }
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::now(EVENT_SOURCE, payload)) {
            debug!(error = %e, "bus event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use helmos_hal::{SimDriveMotor, SimPump, SimSteeringServo};
    use helmos_types::{Axes3, InertialSample, RangeSample, TelemetryRecord, UnstableReason};

    type SimLoop = ControlLoop<SimDriveMotor, SimSteeringServo, SimPump>;

    struct SharedSource {
        id: ChannelId,
        record: Arc<Mutex<Option<TelemetryRecord>>>,
    }

    impl TelemetrySource for SharedSource {
        fn id(&self) -> ChannelId {
            self.id
        }

        fn latest(&self) -> Option<TelemetryRecord> {
            *self.record.lock().unwrap()
        }
    }

    fn inertial(max_accel_g: f64, captured_at: Instant) -> TelemetryRecord {
        TelemetryRecord::Inertial(InertialSample {
            accel_g: Axes3::new(max_accel_g, 0.0, 0.1),
            gyro_dps: Axes3::new(0.0, 0.0, 0.0),
            captured_at,
        })
    }

    fn range(distance_mm: f64, captured_at: Instant) -> TelemetryRecord {
        TelemetryRecord::Range(RangeSample {
            distance_mm,
            captured_at,
        })
    }

    struct Rig {
        control: SimLoop,
        serial: Arc<Mutex<Option<TelemetryRecord>>>,
        can: Arc<Mutex<Option<TelemetryRecord>>>,
        bus: Arc<EventBus>,
    }

    fn rig_with_watchdog(watchdog: Watchdog) -> Rig {
        let bus = Arc::new(EventBus::default());
        let dispatcher =
            CommandDispatcher::new(SimDriveMotor::new(), SimSteeringServo::new(), SimPump::new());
        let mut control = ControlLoop::new(
            Aggregator::default(),
            StabilityEvaluator::default(),
            ActuationGate::default(),
            dispatcher,
            watchdog,
            Arc::clone(&bus),
        );
        let serial = Arc::new(Mutex::new(None));
        let can = Arc::new(Mutex::new(None));
        control.add_source(Box::new(SharedSource {
            id: ChannelId::Serial,
            record: Arc::clone(&serial),
        }));
        control.add_source(Box::new(SharedSource {
            id: ChannelId::Can,
            record: Arc::clone(&can),
        }));
        Rig {
            control,
            serial,
            can,
            bus,
        }
    }

    fn rig() -> Rig {
        // Generous loop deadline so tests can space ticks freely.
        rig_with_watchdog(Watchdog::new(Duration::from_secs(60)))
    }

    #[test]
    fn stable_snapshot_dispatches_the_requested_command() {
        let mut r = rig();
        let now = Instant::now();
        *r.serial.lock().unwrap() = Some(inertial(0.1, now));
        r.control.set_request(Command::new(0.5, 10.0, false));
        r.control.tick(now);

        assert!(matches!(r.control.state(), ActuationState::Driving { .. }));
        assert!((r.control.dispatcher().drive().speed - 0.5).abs() < 1e-9);
    }

    #[test]
    fn acceleration_breach_forces_emergency_stop() {
        let mut r = rig();
        let now = Instant::now();
        *r.serial.lock().unwrap() = Some(inertial(0.1, now));
        r.control.set_request(Command::new(0.6, 25.0, true));
        r.control.tick(now);

        let later = now + Duration::from_millis(50);
        *r.serial.lock().unwrap() = Some(inertial(0.8, later));
        r.control.tick(later);

        assert_eq!(r.control.state(), ActuationState::EmergencyStopped);
        assert_eq!(r.control.dispatcher().drive().speed, 0.0);
        // Emergency stop re-centres the steering and kills the pump.
        assert_eq!(r.control.dispatcher().steering().angle_deg, 0.0);
        assert!(!r.control.dispatcher().pump().active);
    }

    #[test]
    fn requests_are_discarded_while_emergency_stopped_until_reset() {
        let mut r = rig();
        let now = Instant::now();
        *r.serial.lock().unwrap() = Some(inertial(0.9, now));
        r.control.tick(now);
        assert_eq!(r.control.state(), ActuationState::EmergencyStopped);

        let later = now + Duration::from_millis(50);
        *r.serial.lock().unwrap() = Some(inertial(0.1, later));
        r.control.set_request(Command::new(0.5, 0.0, false));
        r.control.tick(later);
        assert_eq!(r.control.state(), ActuationState::EmergencyStopped);
        assert_eq!(r.control.dispatcher().drive().speed, 0.0);

        assert!(r.control.reset_emergency());
        let after_reset = later + Duration::from_millis(50);
        r.control.tick(after_reset);
        assert!(matches!(r.control.state(), ActuationState::Driving { .. }));
    }

    #[test]
    fn silent_required_channel_trips_the_watchdog() {
        let mut r = rig();
        r.control
            .require_channel(ChannelId::Bluetooth, Duration::from_secs(1));
        let mut alerts = r.bus.subscribe_to(Topic::SafetyAlerts);

        let now = Instant::now() + Duration::from_secs(2);
        *r.serial.lock().unwrap() = Some(inertial(0.1, now));
        r.control.set_request(Command::new(0.5, 0.0, false));
        r.control.tick(now);

        assert_eq!(r.control.state(), ActuationState::EmergencyStopped);
        let trip = alerts.try_recv().expect("watchdog trip should be published");
        assert!(matches!(
            trip.payload,
            EventPayload::WatchdogTrip {
                reason: UnstableReason::ChannelSilent(ChannelId::Bluetooth)
            }
        ));
    }

    #[test]
    fn missed_loop_deadline_overrides_a_stable_verdict() {
        let mut r = rig_with_watchdog(Watchdog::new(Duration::from_millis(200)));
        let now = Instant::now() + Duration::from_secs(1);
        *r.serial.lock().unwrap() = Some(inertial(0.1, now));
        r.control.tick(now);
        // Telemetry was stable, but the loop itself arrived a second late.
        assert_eq!(r.control.state(), ActuationState::EmergencyStopped);
    }

    #[test]
    fn actuator_fault_forces_emergency_stop_on_the_next_tick() {
        let mut r = rig();
        let mut alerts = r.bus.subscribe_to(Topic::SafetyAlerts);
        let now = Instant::now();
        *r.serial.lock().unwrap() = Some(inertial(0.1, now));
        r.control.set_request(Command::new(0.4, 0.0, false));
        r.control.dispatcher_mut().drive_mut().fail_next = true;
        r.control.tick(now);

        let fault = loop {
            let event = alerts.try_recv().expect("actuator fault should be published");
            if let EventPayload::ActuatorFault { component, .. } = event.payload {
                break component;
            }
        };
        assert_eq!(fault, "drive_motor");

        let later = now + Duration::from_millis(50);
        *r.serial.lock().unwrap() = Some(inertial(0.1, later));
        r.control.tick(later);
        assert_eq!(r.control.state(), ActuationState::EmergencyStopped);
    }

    #[test]
    fn obstacle_soft_stops_then_resumes_after_the_dwell() {
        let mut r = rig();
        let t0 = Instant::now();
        *r.serial.lock().unwrap() = Some(inertial(0.1, t0));
        *r.can.lock().unwrap() = Some(range(900.0, t0));
        r.control.set_request(Command::new(0.5, 15.0, true));
        r.control.tick(t0);
        assert!(matches!(r.control.state(), ActuationState::Driving { .. }));

        let t1 = t0 + Duration::from_millis(100);
        *r.serial.lock().unwrap() = Some(inertial(0.1, t1));
        *r.can.lock().unwrap() = Some(range(200.0, t1));
        r.control.tick(t1);
        assert_eq!(r.control.state(), ActuationState::SoftStopping);
        // Soft stop keeps steering and pump, only the speed drops.
        assert_eq!(r.control.dispatcher().drive().speed, 0.0);
        assert!(r.control.dispatcher().pump().active);
        assert!((r.control.dispatcher().steering().angle_deg - 15.0).abs() < 1e-9);

        // Obstacle clears; the first stable tick starts the dwell.
        let t2 = t1 + Duration::from_millis(100);
        *r.serial.lock().unwrap() = Some(inertial(0.1, t2));
        *r.can.lock().unwrap() = Some(range(900.0, t2));
        r.control.tick(t2);
        assert_eq!(r.control.state(), ActuationState::SoftStopping);

        let t3 = t2 + Duration::from_millis(300);
        *r.serial.lock().unwrap() = Some(inertial(0.1, t3));
        *r.can.lock().unwrap() = Some(range(900.0, t3));
        r.control.tick(t3);
        assert!(matches!(r.control.state(), ActuationState::Driving { .. }));
    }

    #[test]
    fn gate_transitions_are_published_to_the_bus() {
        let mut r = rig();
        let mut alerts = r.bus.subscribe_to(Topic::SafetyAlerts);
        let now = Instant::now();
        *r.serial.lock().unwrap() = Some(inertial(0.1, now));
        r.control.set_request(Command::new(0.5, 0.0, false));
        r.control.tick(now);

        let event = alerts.try_recv().expect("transition should be published");
        assert!(matches!(
            event.payload,
            EventPayload::StateTransition {
                from: ActuationState::Idle,
                to: ActuationState::Driving { .. }
            }
        ));
    }

    #[test]
    fn dispatched_commands_are_published_once_per_change() {
        let mut r = rig();
        let mut commands = r.bus.subscribe_to(Topic::Commands);
        let now = Instant::now();
        *r.serial.lock().unwrap() = Some(inertial(0.1, now));
        r.control.set_request(Command::new(0.5, 0.0, false));
        r.control.tick(now);
        assert!(commands.try_recv().is_some());

        // Unchanged command on the next tick: idempotent, nothing published.
        let later = now + Duration::from_millis(50);
        *r.serial.lock().unwrap() = Some(inertial(0.1, later));
        r.control.tick(later);
        assert!(commands.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_shutdown_then_releases_everything() {
        let mut r = rig();
        let serial = Arc::clone(&r.serial);
        *serial.lock().unwrap() = Some(inertial(0.1, Instant::now()));
        r.control.set_request(Command::new(0.5, 0.0, false));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut control = r.control;
            control.run(shutdown_rx).await;
            control
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown_tx.send(true).unwrap();
        let control = handle.await.unwrap();

        assert_eq!(control.dispatcher().drive().speed, 0.0);
        assert!(control.dispatcher().drive().cleaned_up);
        assert!(control.dispatcher().steering().cleaned_up);
        assert!(control.dispatcher().pump().cleaned_up);
    }
}
