//! Outbound capabilities supplied by the host platform.
//!
//! The pipelines never touch hardware or UI directly. They call these traits,
//! and [`LoggingSink`] is the headless implementation used by the CLI.

use crate::core::alert::AlertState;
use crate::core::features::FeatureVector;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Local wall-clock time source, used for the time-of-day feature.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed clock, handy for deterministic snapshots.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl WallClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Help request handed to the platform on escalation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelpRequest {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub confidence_pct: f64,
    /// Most recent snapshot, if one was taken before the escalation
    pub features: Option<FeatureVector>,
}

impl HelpRequest {
    pub fn new(issued_at: DateTime<Utc>, confidence_pct: f64, features: Option<FeatureVector>) -> Self {
        Self {
            id: Uuid::new_v4(),
            issued_at,
            confidence_pct,
            features,
        }
    }
}

/// What the wearable shows after each tick or transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub state: AlertState,
    pub confidence_pct: f64,
    pub heart_rate: Option<u32>,
    pub cooldown_remaining_ms: u64,
    /// Fraction of the dwell elapsed, while detecting
    pub dwell_progress: Option<f64>,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.0}%)", self.state, self.confidence_pct)?;
        if let Some(bpm) = self.heart_rate {
            write!(f, " hr={bpm}")?;
        }
        if let Some(progress) = self.dwell_progress {
            write!(f, " dwell={:.0}%", progress * 100.0)?;
        }
        if self.cooldown_remaining_ms > 0 {
            write!(f, " cooldown={}ms", self.cooldown_remaining_ms)?;
        }
        Ok(())
    }
}

/// Wearable-side effects.
pub trait AlertSink: Send + Sync {
    fn vibrate(&self);
    fn dispatch_help(&self, request: &HelpRequest);
    fn render(&self, status: &MonitorStatus);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyStatus {
    Safe,
    Unsafe,
}

/// What the companion shows for each received feature message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanionUpdate {
    pub status: SafetyStatus,
    pub confidence_pct: f64,
    pub features: FeatureVector,
}

/// Companion-side rendering.
pub trait CompanionSink: Send + Sync {
    fn render(&self, update: &CompanionUpdate);
}

/// Headless sink that reports everything through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

impl AlertSink for LoggingSink {
    fn vibrate(&self) {
        tracing::info!("vibration pulse");
    }

    fn dispatch_help(&self, request: &HelpRequest) {
        tracing::warn!(
            id = %request.id,
            confidence = request.confidence_pct,
            issued_at = %request.issued_at,
            "help request dispatched"
        );
    }

    fn render(&self, status: &MonitorStatus) {
        tracing::debug!(%status, "wearable status");
    }
}

impl CompanionSink for LoggingSink {
    fn render(&self, update: &CompanionUpdate) {
        tracing::info!(
            status = ?update.status,
            confidence = update.confidence_pct,
            hr_mean = update.features.hr_mean,
            steps = update.features.steps_20s,
            "companion status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_display() {
        let status = MonitorStatus {
            state: AlertState::Detecting,
            confidence_pct: 72.0,
            heart_rate: Some(118),
            cooldown_remaining_ms: 0,
            dwell_progress: Some(0.5),
        };
        assert_eq!(status.to_string(), "DETECTING (72%) hr=118 dwell=50%");
    }

    #[test]
    fn test_help_requests_have_unique_ids() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap();
        let a = HelpRequest::new(at, 80.0, None);
        let b = HelpRequest::new(at, 80.0, None);
        assert_ne!(a.id, b.id);
        assert_eq!(FixedClock(at).now(), at);
    }

    #[test]
    fn test_safety_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SafetyStatus::Unsafe).unwrap(),
            "\"unsafe\""
        );
    }
}
