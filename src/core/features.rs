//! Feature computation from sample windows.
//!
//! Every statistic here is total: an empty (or too short) window yields 0
//! rather than an error, so a silent sensor can never stall a snapshot.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Number of numeric features fed to the classifier.
pub const FEATURE_COUNT: usize = 8;

/// Wire names of the numeric features, in classifier input order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hrMean",
    "hrStd",
    "hrSlope",
    "steps20s",
    "accelRms",
    "accelPeak",
    "ppgStd",
    "timeOfDay",
];

/// Seconds in a day.
const DAY_SECS: f64 = 86_400.0;

/// 02:30 local time, where the time-of-day feature peaks.
const TIME_OF_DAY_ANCHOR_SECS: f64 = 9_000.0;

/// Immutable summary of one monitoring window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    /// Mean heart rate (bpm)
    pub hr_mean: f64,
    /// Heart-rate variability as RMSSD (bpm)
    pub hr_std: f64,
    /// Endpoint slope of the heart-rate window (bpm per sample)
    pub hr_slope: f64,
    /// Steps summed over the step window
    #[serde(rename = "steps20s")]
    pub steps_20s: u32,
    /// Root mean square of acceleration magnitude
    pub accel_rms: f64,
    /// Largest acceleration magnitude in the window
    pub accel_peak: f64,
    /// Population standard deviation of the pulse window
    pub ppg_std: f64,
    /// 1.0 at 02:30 local time, decreasing linearly through the day
    pub time_of_day: f64,
    /// Whether the wearable has escalated to an alert
    pub needs_help: bool,
}

impl FeatureVector {
    /// Classifier input, ordered as [`FEATURE_NAMES`].
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.hr_mean,
            self.hr_std,
            self.hr_slope,
            self.steps_20s as f64,
            self.accel_rms,
            self.accel_peak,
            self.ppg_std,
            self.time_of_day,
        ]
    }

    /// Same features with the help flag replaced.
    pub fn with_needs_help(mut self, needs_help: bool) -> Self {
        self.needs_help = needs_help;
        self
    }
}

/// Arithmetic mean; 0 for an empty window.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.mean()
}

/// Root mean square of successive differences; 0 below two samples.
pub fn rmssd(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let squared: Vec<f64> = values
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).powi(2))
        .collect();
    mean(&squared).sqrt()
}

/// `(last - first) / (n - 1)`; 0 below two samples.
pub fn endpoint_slope(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) if values.len() >= 2 => {
            (last - first) / (values.len() - 1) as f64
        }
        _ => 0.0,
    }
}

/// Root mean square; 0 for an empty window.
pub fn rms(values: &[f64]) -> f64 {
    let squares: Vec<f64> = values.iter().map(|v| v * v).collect();
    mean(&squares).sqrt()
}

/// Maximum; 0 for an empty window.
pub fn peak(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::max(values)
}

/// Population standard deviation (divides by N); 0 for an empty window.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.population_std_dev()
}

/// Normalized time of day for a local second-of-day.
pub fn time_of_day(seconds_of_day: u32) -> f64 {
    let shifted = (seconds_of_day as f64 - TIME_OF_DAY_ANCHOR_SECS + DAY_SECS) % DAY_SECS;
    1.0 - shifted / DAY_SECS
}

/// Local second-of-day of `now` in `timezone`.
pub fn local_seconds_of_day(now: DateTime<Utc>, timezone: Tz) -> u32 {
    now.with_timezone(&timezone).num_seconds_from_midnight()
}
