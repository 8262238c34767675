// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Configuration module

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::sensors::SensorDefinition;
use crate::streaming::OverflowPolicy;

/// Shortest broadcast period accepted, in seconds. Anything faster congests
/// the shared link.
pub const MIN_BROADCAST_INTERVAL_SECS: u64 = 5;

/// Environment variable consulted when no `--config` flag is given
pub const CONFIG_ENV_VAR: &str = "MESHSENSE_CONFIG";

/// Configuration errors. These are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("broadcast interval {0}s is below the {MIN_BROADCAST_INTERVAL_SECS}s minimum")]
    IntervalTooShort(u64),

    #[error("min send interval {0} is not a usable number of seconds")]
    InvalidSendInterval(f64),

    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("sensor definition has an empty name")]
    EmptyName,

    #[error("duplicate sensor name '{0}'")]
    DuplicateName(String),

    #[error("sensor '{name}' has unknown type '{sensor_type}'")]
    UnknownType { name: String, sensor_type: String },

    #[error("sensor '{name}': {reason}")]
    InvalidParams { name: String, reason: String },
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Runtime settings
    pub settings: Settings,

    /// Transport settings
    pub transport: TransportConfig,

    /// Sensor definitions, in declaration order
    #[serde(default)]
    pub sensors: Vec<SensorDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            transport: TransportConfig::default(),
            sensors: default_sensors(),
        }
    }
}

impl Config {
    /// Load configuration from file. `.toml` files are read as TOML,
    /// everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        let config: Config = if is_toml(path) {
            toml::from_str(&content).with_context(|| format!("parsing TOML config {:?}", path))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {:?}", path))?
        };
        config.validate()?;
        info!("Loaded configuration from {:?} ({} sensors)", path, config.sensors.len());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            config.save(path)?;
            info!(
                "Created default sensor configuration at {:?}. Review it and enable the sensors you need.",
                path
            );
            Ok(config)
        }
    }

    /// Structural checks that do not need the reader table
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.settings.broadcast_interval < MIN_BROADCAST_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooShort(self.settings.broadcast_interval));
        }
        if self.settings.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        self.settings.min_send_duration()?;

        let mut seen = HashSet::new();
        for def in &self.sensors {
            if def.name.trim().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(def.name.as_str()) {
                return Err(ConfigError::DuplicateName(def.name.clone()));
            }
        }
        Ok(())
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("meshsense"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("sensors.json")
    }

    /// Resolve the config path: explicit flag, then environment, then default
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .unwrap_or_else(Self::default_path)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().map(|e| e.eq_ignore_ascii_case("toml")).unwrap_or(false)
}

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Seconds between ticks
    pub broadcast_interval: u64,

    /// JSON log file path
    pub log_file: PathBuf,

    /// Local node number
    pub node_num: u32,

    /// Local node display name
    pub node_name: String,

    /// Pending outbound messages kept before the overflow policy applies
    pub queue_capacity: usize,

    /// What to drop when the outbound queue is full
    pub overflow_policy: OverflowPolicy,

    /// Minimum seconds between two transmissions
    pub min_send_interval: f64,

    /// Keep a copy of an unreadable log before resetting it
    pub archive_corrupt_log: bool,

    /// Rebuild the sensor registry when the config file changes
    pub watch_config: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let node_name = sysinfo::System::host_name().unwrap_or_else(|| "meshsense".to_string());
        Self {
            broadcast_interval: 30,
            log_file: PathBuf::from("sensor_log.json"),
            node_num: node_num_for(&node_name),
            node_name,
            queue_capacity: 32,
            overflow_policy: OverflowPolicy::DropOldest,
            min_send_interval: 5.0,
            archive_corrupt_log: true,
            watch_config: true,
        }
    }
}

impl Settings {
    /// Local node id in `!xxxxxxxx` form
    pub fn node_id(&self) -> String {
        format!("!{:08x}", self.node_num)
    }

    /// `min_send_interval` as a duration; negative, NaN or overflowing values are rejected
    pub fn min_send_duration(&self) -> std::result::Result<Duration, ConfigError> {
        let secs = self.min_send_interval;
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::InvalidSendInterval(secs));
        }
        Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidSendInterval(secs))
    }
}

/// Stable node number derived from a name (32-bit FNV-1a), so a config
/// without `node_num` keeps the same identity across restarts
pub fn node_num_for(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5_u32, |hash, b| (hash ^ u32::from(b)).wrapping_mul(0x0100_0193))
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub topic_prefix: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mqtt_enabled: false,
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            topic_prefix: "meshsense/sensors".to_string(),
        }
    }
}

fn default_sensors() -> Vec<SensorDefinition> {
    use serde_json::json;

    let def = |name: &str, sensor_type: &str, enabled: bool, params: serde_json::Value| {
        SensorDefinition {
            name: name.to_string(),
            sensor_type: sensor_type.to_string(),
            enabled,
            params: match params {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        }
    };

    vec![
        def("cpu_temp_sim", "simulated_temperature", true,
            json!({"min_temp": 35.0, "max_temp": 65.0, "unit": "C"})),
        def("room_humidity_sim", "simulated_humidity", true,
            json!({"min_hum": 40.0, "max_hum": 60.0, "unit": "%"})),
        def("random_metric", "random_value", true,
            json!({"min_val": 0, "max_val": 100})),
        def("device_status", "static_value", true,
            json!({"value": "online"})),
        def("custom_script_output", "custom_script", false,
            json!({"script_path": "/bin/echo", "args": ["hello_world"], "timeout": 5})),
        def("ambient_temp_bme280", "bme280_temperature", false,
            json!({"unit": "C"})),
        def("ambient_humidity_bme280", "bme280_humidity", false,
            json!({"unit": "%"})),
        def("barometric_pressure_bme280", "bme280_pressure", false,
            json!({"unit": "hPa"})),
    ]
}
