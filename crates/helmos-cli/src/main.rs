//! `helmos` – safety interlock entry point ("ignition switch").
//!
//! This binary:
//!
//! 1. Initialises structured logging (and the optional OTLP exporter).
//! 2. Loads `~/.helmos/config.toml`, writing defaults on first run, and
//!    validates it before anything else starts.
//! 3. Brings up one telemetry channel per configured link and assembles the
//!    control loop around the sim drivers. The real serial/CAN/Bluetooth
//!    transports and chip drivers are wired in at deploy time; until then
//!    the loopback links stay silent and the watchdog keeps the vehicle
//!    emergency-stopped, which is exactly the fail-safe default.
//! 4. Intercepts **Ctrl-C**: the control loop dispatches a final emergency
//!    stop, joins every channel task and releases the drivers before exit.

mod config;

use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use helmos_hal::{CommandDispatcher, SimDriveMotor, SimPump, SimSteeringServo};
use helmos_kernel::{ActuationGate, StabilityEvaluator, Watchdog};
use helmos_middleware::EventBus;
use helmos_runtime::ControlLoop;
use helmos_telemetry::{
    Aggregator, BluetoothJsonDecoder, CanDecoder, FrameDecoder, LoopbackTransport,
    SerialJsonDecoder, TelemetryChannel,
};
use helmos_types::ChannelId;

use config::HelmosConfig;

fn main() {
    // Tracing first; the simple OTLP exporter must be built before the
    // Tokio runtime exists.
    let _guard = helmos_runtime::init_tracing("helmos");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = HelmosConfig::default();
            if let Err(e) = config::save(&cfg) {
                warn!(error = %e, "could not write default config");
            }
            println!(
                "  No config found; defaults written to {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    };
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Config error".red(), e);
        std::process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "Ctrl-C received: stopping the vehicle ...".yellow().bold()
        );
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop with SIGTERM instead");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cfg, shutdown_rx));

    println!("{}", "  Vehicle stopped; all drivers released.".green());
}

async fn run(cfg: HelmosConfig, shutdown: watch::Receiver<bool>) {
    let bus = Arc::new(EventBus::default());
    let dispatcher = CommandDispatcher::new(
        SimDriveMotor::new(),
        SimSteeringServo::new(),
        SimPump::new(),
    )
    .with_epsilon(cfg.dispatch.epsilon);

    let mut control = ControlLoop::new(
        Aggregator::new(cfg.staleness()),
        StabilityEvaluator::new(cfg.safety.accel_threshold_g, cfg.safety.obstacle_threshold_mm),
        ActuationGate::new(cfg.dwell()),
        dispatcher,
        Watchdog::new(cfg.loop_deadline()),
        Arc::clone(&bus),
    )
    .with_cadence(cfg.tick_cadence());

    let plan: Vec<(ChannelId, Box<dyn FrameDecoder>, String)> = vec![
        (
            ChannelId::Serial,
            Box::new(SerialJsonDecoder),
            cfg.serial.port.clone(),
        ),
        (
            ChannelId::Can,
            Box::new(CanDecoder),
            cfg.can.channel.clone(),
        ),
        (
            ChannelId::Bluetooth,
            Box::new(BluetoothJsonDecoder),
            cfg.bluetooth.port.clone(),
        ),
    ];
    for (id, decoder, endpoint) in plan {
        let (transport, _handle) = LoopbackTransport::new(id);
        match TelemetryChannel::connect(id, Box::new(transport), decoder).await {
            Ok(channel) => {
                let channel = channel.with_send_timeout(cfg.send_timeout());
                info!(channel = %id, endpoint, "telemetry channel up");
                control.add_channel(Arc::new(channel), cfg.channel_timeout());
            }
            Err(e) => {
                // The interlock still runs; a missing channel reads as
                // silent telemetry and the vehicle stays stopped.
                error!(channel = %id, endpoint, error = %e, "channel failed to connect");
            }
        }
    }

    control.run(shutdown).await;
}

fn print_banner() {
    println!();
    println!("{}", "  HelmOS – mobile vehicle safety interlock".cyan().bold());
    println!("{}", "  telemetry → verdict → gate → actuators".dimmed());
    println!();
}
