//! WatchHer core: wearable safety monitoring.
//!
//! A wrist device samples heart rate, acceleration and step count, derives
//! an 8-feature vector every 10 seconds and sends it to a paired companion.
//! The companion scores the vector with a tree ensemble and replies with a
//! confidence percentage, which drives the wearable's alert workflow.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── Wearable ────────────────────────┐
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   │
//! │  │  Sensors    │──▶│  Windowing   │──▶│   Features   │───┼──┐
//! │  │ (callbacks) │   │ (20 samples) │   │  (8 values)  │   │  │ watch_to_phone
//! │  └─────────────┘   └──────────────┘   └──────────────┘   │  │
//! │  ┌──────────────────────────┐   ┌──────────────────┐     │  │
//! │  │ Alert state machine      │──▶│ AlertSink        │     │  │
//! │  │ SAFE/DETECTING/ALERT_SENT│   │ vibrate, help    │     │  │
//! │  └──────────────────────────┘   └──────────────────┘     │  │
//! └───────────────▲──────────────────────────────────────────┘  │
//!                 │ phone_to_watch                              │
//! ┌───────────────┴──────── Companion ───────────────────────┐  │
//! │   confidence % ◀── Risk classifier (forest) ◀────────────┼──┘
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use watchher_core::{link_pair, Config, LoggingSink, WearableMonitor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ((to_companion, from_companion), _companion_end) = link_pair();
//!
//! let mut monitor = WearableMonitor::builder(
//!     Config::default(),
//!     Arc::new(to_companion),
//!     Arc::new(LoggingSink),
//! )
//! .build()?;
//! monitor.attach_inbound(from_companion);
//! monitor.start()?;
//!
//! // Platform callbacks push readings through a handle.
//! let sensors = monitor.sensor_handle();
//! sensors.heart_rate(72)?;
//! # Ok(())
//! # }
//! ```

pub mod companion;
pub mod config;
pub mod core;
pub mod monitor;
pub mod sensors;
pub mod simulation;
pub mod sinks;
pub mod stats;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use companion::CompanionService;
pub use config::{Config, ConfigError};
pub use core::{
    AlertConfig, AlertState, AlertStateMachine, FeatureVector, RiskClassifier, RiskScorer,
    SampleAggregator,
};
pub use monitor::{MonitorError, WearableMonitor};
pub use sensors::{SensorHandle, SensorReading};
pub use sinks::{
    AlertSink, CompanionSink, CompanionUpdate, HelpRequest, LoggingSink, MonitorStatus,
    SafetyStatus, SystemClock, WallClock,
};
pub use stats::{create_shared_stats, MonitorStats, SharedStats};
pub use telemetry::{link_pair, TelemetryError, Transport, TransportError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
