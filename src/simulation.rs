//! Synthetic sensor source for running the pipeline without hardware.
//!
//! Readings are a deterministic function of elapsed time, so a scenario
//! replays identically on every run.

use crate::sensors::{SensorHandle, SensorReading};
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Small forest bundled for demos; scores the distress scenario high.
pub const DEMO_FOREST: &str = include_str!("../models/demo_forest.json");

/// Gap between synthetic readings of each sensor.
pub const READING_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Resting wearer: steady heart rate, gravity-only acceleration
    Calm,
    /// Elevated, erratic heart rate with violent movement
    Distress,
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "calm" => Ok(Scenario::Calm),
            "distress" => Ok(Scenario::Distress),
            other => Err(format!("unknown scenario '{other}' (expected calm or distress)")),
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scenario::Calm => write!(f, "calm"),
            Scenario::Distress => write!(f, "distress"),
        }
    }
}

impl Scenario {
    /// The three readings produced `t` seconds into the scenario.
    pub fn readings_at(&self, t: f64) -> [SensorReading; 3] {
        match self {
            Scenario::Calm => {
                let bpm = 68.0 + 3.0 * (t * 0.35).sin();
                [
                    SensorReading::HeartRate { bpm: bpm.round() as u32 },
                    SensorReading::Accel {
                        x: (0.3 * (t * 1.3).sin()) as f32,
                        y: (0.2 * (t * 0.9).cos()) as f32,
                        z: 9.81,
                    },
                    SensorReading::StepCount {
                        cumulative: (t * 0.2).floor(),
                    },
                ]
            }
            Scenario::Distress => {
                let bpm = 138.0 + 14.0 * (t * 2.3).sin();
                [
                    SensorReading::HeartRate { bpm: bpm.round() as u32 },
                    SensorReading::Accel {
                        x: (26.0 * (t * 1.7).sin()) as f32,
                        y: (15.0 * (t * 2.2).cos()) as f32,
                        z: 9.81,
                    },
                    SensorReading::StepCount {
                        cumulative: (t * 2.5).floor(),
                    },
                ]
            }
        }
    }
}

/// Push scenario readings through `handle` until the task is aborted.
///
/// `speed` compresses scenario time: at 2.0 one real second covers two
/// scenario seconds.
pub fn spawn_sensor_feed(handle: SensorHandle, scenario: Scenario, speed: f64) -> JoinHandle<()> {
    let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(READING_INTERVAL.div_f64(speed));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let t = start.elapsed().as_secs_f64() * speed;
            for reading in scenario.readings_at(t) {
                if let Err(e) = handle.push(reading) {
                    tracing::debug!(error = %e, "synthetic reading dropped");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::RiskClassifier;
    use crate::core::windowing::SampleAggregator;
    use chrono::Utc;

    fn score(scenario: Scenario) -> f64 {
        let classifier = RiskClassifier::from_json(DEMO_FOREST).unwrap();
        let mut aggregator = SampleAggregator::with_defaults();
        for second in 0..20 {
            for reading in scenario.readings_at(second as f64) {
                aggregator.apply(reading);
            }
            aggregator.tick();
        }
        classifier.predict_features(&aggregator.snapshot(Utc::now()))
    }

    #[test]
    fn test_demo_forest_separates_scenarios() {
        assert!(score(Scenario::Calm) < 0.2);
        assert!(score(Scenario::Distress) > 0.6);
    }

    #[test]
    fn test_scenario_parsing() {
        assert_eq!("Distress".parse::<Scenario>(), Ok(Scenario::Distress));
        assert!("panic".parse::<Scenario>().is_err());
        assert_eq!(Scenario::Calm.to_string(), "calm");
    }
}
