//! Configuration – reads `~/.helmos/config.toml`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use helmos_types::ConfigError;
use serde::{Deserialize, Serialize};

/// Serial link to the sensor microcontroller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
}

/// Vehicle CAN bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanConfig {
    #[serde(default = "default_can_channel")]
    pub channel: String,
    #[serde(default = "default_can_bitrate")]
    pub bitrate: u32,
}

/// Bluetooth (HM-10) link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BluetoothConfig {
    #[serde(default = "default_bt_port")]
    pub port: String,
    #[serde(default = "default_bt_baud")]
    pub baud: u32,
}

/// Safety thresholds and gate behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Max |acceleration| per axis before the verdict flips unstable, in g.
    #[serde(default = "default_accel_threshold_g")]
    pub accel_threshold_g: f64,
    /// Obstacle distance that triggers a soft stop, in mm.
    #[serde(default = "default_obstacle_threshold_mm")]
    pub obstacle_threshold_mm: f64,
    /// Consecutive stable time required before a soft stop resumes, in ms.
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
}

/// Cadence, staleness and liveness timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_tick_cadence_ms")]
    pub tick_cadence_ms: u64,
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,
    #[serde(default = "default_loop_deadline_ms")]
    pub loop_deadline_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Dispatcher change-detection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

/// Persisted configuration stored in `~/.helmos/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmosConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub can: CanConfig,
    #[serde(default)]
    pub bluetooth: BluetoothConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_serial_port() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_serial_baud() -> u32 {
    115_200
}
fn default_can_channel() -> String {
    "can0".to_string()
}
fn default_can_bitrate() -> u32 {
    500_000
}
fn default_bt_port() -> String {
    "/dev/rfcomm0".to_string()
}
fn default_bt_baud() -> u32 {
    9_600
}
fn default_accel_threshold_g() -> f64 {
    0.5
}
fn default_obstacle_threshold_mm() -> f64 {
    300.0
}
fn default_dwell_ms() -> u64 {
    300
}
fn default_tick_cadence_ms() -> u64 {
    50
}
fn default_staleness_ms() -> u64 {
    500
}
fn default_channel_timeout_ms() -> u64 {
    1_000
}
fn default_loop_deadline_ms() -> u64 {
    200
}
fn default_send_timeout_ms() -> u64 {
    100
}
fn default_epsilon() -> f64 {
    1e-3
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud: default_serial_baud(),
        }
    }
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            channel: default_can_channel(),
            bitrate: default_can_bitrate(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            port: default_bt_port(),
            baud: default_bt_baud(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            accel_threshold_g: default_accel_threshold_g(),
            obstacle_threshold_mm: default_obstacle_threshold_mm(),
            dwell_ms: default_dwell_ms(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_cadence_ms: default_tick_cadence_ms(),
            staleness_ms: default_staleness_ms(),
            channel_timeout_ms: default_channel_timeout_ms(),
            loop_deadline_ms: default_loop_deadline_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
        }
    }
}

impl Default for HelmosConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            can: CanConfig::default(),
            bluetooth: BluetoothConfig::default(),
            safety: SafetyConfig::default(),
            timing: TimingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl HelmosConfig {
    /// Reject values that would make the interlock unsafe or inert.
    ///
    /// # Errors
    ///
    /// Returns the first offending field. Validation is fatal at startup,
    /// before any channel or loop starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.safety.accel_threshold_g <= 0.0 {
            return Err(ConfigError::new(
                "safety.accel_threshold_g",
                "must be positive",
            ));
        }
        if self.safety.obstacle_threshold_mm <= 0.0 {
            return Err(ConfigError::new(
                "safety.obstacle_threshold_mm",
                "must be positive",
            ));
        }
        if self.timing.tick_cadence_ms == 0 {
            return Err(ConfigError::new("timing.tick_cadence_ms", "must be positive"));
        }
        if self.timing.staleness_ms == 0 {
            return Err(ConfigError::new("timing.staleness_ms", "must be positive"));
        }
        if self.timing.channel_timeout_ms == 0 {
            return Err(ConfigError::new(
                "timing.channel_timeout_ms",
                "must be positive",
            ));
        }
        if self.timing.loop_deadline_ms < self.timing.tick_cadence_ms {
            return Err(ConfigError::new(
                "timing.loop_deadline_ms",
                "must be at least the tick cadence",
            ));
        }
        if self.timing.send_timeout_ms == 0 {
            return Err(ConfigError::new(
                "timing.send_timeout_ms",
                "must be positive",
            ));
        }
        if self.dispatch.epsilon <= 0.0 {
            return Err(ConfigError::new("dispatch.epsilon", "must be positive"));
        }
        if self.serial.baud == 0 {
            return Err(ConfigError::new("serial.baud", "must be positive"));
        }
        if self.can.bitrate == 0 {
            return Err(ConfigError::new("can.bitrate", "must be positive"));
        }
        if self.bluetooth.baud == 0 {
            return Err(ConfigError::new("bluetooth.baud", "must be positive"));
        }
        Ok(())
    }

    pub fn tick_cadence(&self) -> Duration {
        Duration::from_millis(self.timing.tick_cadence_ms)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.timing.staleness_ms)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.channel_timeout_ms)
    }

    pub fn loop_deadline(&self) -> Duration {
        Duration::from_millis(self.timing.loop_deadline_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.send_timeout_ms)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.safety.dwell_ms)
    }
}

/// Return the path to `~/.helmos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".helmos").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<HelmosConfig>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<HelmosConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: HelmosConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `HELMOS_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `HELMOS_SERIAL_PORT` | `serial.port` |
/// | `HELMOS_CAN_CHANNEL` | `can.channel` |
/// | `HELMOS_BT_PORT` | `bluetooth.port` |
/// | `HELMOS_TICK_CADENCE_MS` | `timing.tick_cadence_ms` |
/// | `HELMOS_STALENESS_MS` | `timing.staleness_ms` |
/// | `HELMOS_ACCEL_THRESHOLD_G` | `safety.accel_threshold_g` |
pub fn apply_env_overrides(cfg: &mut HelmosConfig) {
    if let Ok(v) = std::env::var("HELMOS_SERIAL_PORT") {
        cfg.serial.port = v;
    }
    if let Ok(v) = std::env::var("HELMOS_CAN_CHANNEL") {
        cfg.can.channel = v;
    }
    if let Ok(v) = std::env::var("HELMOS_BT_PORT") {
        cfg.bluetooth.port = v;
    }
    if let Ok(v) = std::env::var("HELMOS_TICK_CADENCE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.timing.tick_cadence_ms = ms;
    }
    if let Ok(v) = std::env::var("HELMOS_STALENESS_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.timing.staleness_ms = ms;
    }
    if let Ok(v) = std::env::var("HELMOS_ACCEL_THRESHOLD_G")
        && let Ok(g) = v.parse::<f64>()
    {
        cfg.safety.accel_threshold_g = g;
    }
}

/// Save the config to disk, creating `~/.helmos/` if necessary.
pub fn save(cfg: &HelmosConfig) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &HelmosConfig, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
