//! Counters for every fallback and side effect in the pipeline.
//!
//! Nothing in the core fails loudly, so these counters are how degraded
//! operation (dropped messages, missing model, dropped readings) stays visible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pipeline statistics for the current monitoring session.
#[derive(Debug)]
pub struct MonitorStats {
    /// Aggregator ticks processed
    ticks: AtomicU64,
    /// Feature messages handed to the transport
    snapshots_sent: AtomicU64,
    /// Outbound messages the transport refused
    send_failures: AtomicU64,
    /// Inbound messages discarded by schema validation
    decode_failures: AtomicU64,
    /// Predictions answered with confidence 0 because no model was loaded
    model_fallbacks: AtomicU64,
    /// Predictions served by the classifier
    predictions: AtomicU64,
    /// Vibration pulses requested while detecting
    vibration_pulses: AtomicU64,
    /// Help requests dispatched
    help_dispatches: AtomicU64,
    /// Detections cancelled by the user
    cancellations: AtomicU64,
    /// Sensor readings dropped before reaching the aggregator
    dropped_readings: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            snapshots_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            model_fallbacks: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            vibration_pulses: AtomicU64::new(0),
            help_dispatches: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            dropped_readings: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that accumulate across sessions in a JSON file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous monitor stats");
        }

        stats
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_sent(&self) {
        self.snapshots_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_fallback(&self) {
        self.model_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction(&self) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vibration_pulse(&self) {
        self.vibration_pulses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_help_dispatch(&self) {
        self.help_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_reading(&self) {
        self.dropped_readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            snapshots_sent: self.snapshots_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            model_fallbacks: self.model_fallbacks.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            vibration_pulses: self.vibration_pulses.load(Ordering::Relaxed),
            help_dispatches: self.help_dispatches.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            dropped_readings: self.dropped_readings.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Ticks processed: {}\n\
             - Feature snapshots sent: {} ({} send failures)\n\
             - Predictions: {} ({} without a model)\n\
             - Inbound messages rejected: {}\n\
             - Vibration pulses: {}\n\
             - Help requests dispatched: {}\n\
             - Detections cancelled: {}\n\
             - Sensor readings dropped: {}\n\
             - Session duration: {} seconds",
            stats.ticks,
            stats.snapshots_sent,
            stats.send_failures,
            stats.predictions,
            stats.model_fallbacks,
            stats.decode_failures,
            stats.vibration_pulses,
            stats.help_dispatches,
            stats.cancellations,
            stats.dropped_readings,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                counters: stats.clone(),
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                let c = persisted.counters;

                self.ticks.store(c.ticks, Ordering::Relaxed);
                self.snapshots_sent.store(c.snapshots_sent, Ordering::Relaxed);
                self.send_failures.store(c.send_failures, Ordering::Relaxed);
                self.decode_failures.store(c.decode_failures, Ordering::Relaxed);
                self.model_fallbacks.store(c.model_fallbacks, Ordering::Relaxed);
                self.predictions.store(c.predictions, Ordering::Relaxed);
                self.vibration_pulses.store(c.vibration_pulses, Ordering::Relaxed);
                self.help_dispatches.store(c.help_dispatches, Ordering::Relaxed);
                self.cancellations.store(c.cancellations, Ordering::Relaxed);
                self.dropped_readings.store(c.dropped_readings, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.snapshots_sent,
            &self.send_failures,
            &self.decode_failures,
            &self.model_fallbacks,
            &self.predictions,
            &self.vibration_pulses,
            &self.help_dispatches,
            &self.cancellations,
            &self.dropped_readings,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub snapshots_sent: u64,
    pub send_failures: u64,
    pub decode_failures: u64,
    pub model_fallbacks: u64,
    pub predictions: u64,
    pub vibration_pulses: u64,
    pub help_dispatches: u64,
    pub cancellations: u64,
    pub dropped_readings: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedStats = Arc<MonitorStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(MonitorStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(MonitorStats::with_persistence(path))
}
