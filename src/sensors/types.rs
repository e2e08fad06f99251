//! Raw sensor readings and the samples derived from them.
//!
//! Readings arrive from platform callbacks exactly as the sensors report
//! them; samples are the scalar values that end up in aggregator windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which window a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Beats per minute
    HeartRate,
    /// Euclidean norm of the 3-axis accelerometer vector
    AccelMagnitude,
    /// Steps taken since the previous tick
    StepDelta,
}

/// A timestamped scalar stored in one of the aggregator windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub kind: SampleKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(kind: SampleKind, value: f64) -> Self {
        Self {
            kind,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// A raw reading as delivered by a sensor callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor", rename_all = "snake_case")]
pub enum SensorReading {
    /// Latest heart rate; 0 means the sensor has not locked on yet
    HeartRate { bpm: u32 },
    /// Raw accelerometer axes in m/s²
    Accel { x: f32, y: f32, z: f32 },
    /// Cumulative step counter since device boot
    StepCount { cumulative: f64 },
}

impl SensorReading {
    pub fn kind(&self) -> SampleKind {
        match self {
            SensorReading::HeartRate { .. } => SampleKind::HeartRate,
            SensorReading::Accel { .. } => SampleKind::AccelMagnitude,
            SensorReading::StepCount { .. } => SampleKind::StepDelta,
        }
    }
}

/// Magnitude of an acceleration vector.
pub fn accel_magnitude(x: f32, y: f32, z: f32) -> f64 {
    let (x, y, z) = (x as f64, y as f64, z as f64);
    (x * x + y * y + z * z).sqrt()
}
