//! Configuration for the WatchHer monitor.

use crate::core::alert::AlertConfig;
use crate::core::windowing::{DEFAULT_SNAPSHOT_EVERY_TICKS, DEFAULT_WINDOW_CAPACITY};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the monitor and companion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cadence of the aggregation tick
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,

    /// Samples kept per sliding window
    pub window_capacity: usize,

    /// Ticks between feature snapshots
    pub snapshot_every_ticks: u64,

    /// Undrained sensor readings held before new ones are dropped
    pub sensor_queue_capacity: usize,

    /// IANA timezone used for the time-of-day feature
    pub timezone: String,

    /// Forest model asset
    pub model_path: PathBuf,

    /// Path for storing counters
    pub data_path: PathBuf,

    /// Alert thresholds and timings
    pub alert: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("watchher");

        Self {
            tick_interval: Duration::from_secs(1),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            snapshot_every_ticks: DEFAULT_SNAPSHOT_EVERY_TICKS,
            sensor_queue_capacity: 1024,
            timezone: "UTC".to_string(),
            model_path: data_dir.join("rf_model.json"),
            data_path: data_dir,
            alert: AlertConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("watchher")
            .join("config.json")
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval must be positive".into()));
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::Invalid("window_capacity must be positive".into()));
        }
        if self.snapshot_every_ticks == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_every_ticks must be positive".into(),
            ));
        }
        if self.sensor_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sensor_queue_capacity must be positive".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.alert.threshold_pct) {
            return Err(ConfigError::Invalid(format!(
                "alert.threshold_pct {} is outside [0, 100]",
                self.alert.threshold_pct
            )));
        }
        if self.alert.vibration_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "alert.vibration_interval must be positive".into(),
            ));
        }
        self.tz()?;
        Ok(())
    }

    /// Parsed timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    /// Path of the persisted counters.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Serde support for Duration as whole milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
