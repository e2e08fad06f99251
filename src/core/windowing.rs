//! Sliding sample windows and the aggregator that owns them.
//!
//! Readings are latched as they arrive; every tick pushes the latched values
//! into fixed-capacity windows (oldest evicted first) and every N-th tick
//! produces a [`FeatureVector`].

use crate::core::features::{self, FeatureVector};
use crate::sensors::types::{accel_magnitude, Sample, SampleKind, SensorReading};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of samples kept per window.
pub const DEFAULT_WINDOW_CAPACITY: usize = 20;

/// Default number of ticks between feature snapshots.
pub const DEFAULT_SNAPSHOT_EVERY_TICKS: u64 = 10;

/// Fixed-capacity ring buffer of samples of one kind.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    kind: SampleKind,
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    pub fn new(kind: SampleKind, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            kind,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a value, evicting the oldest sample when full.
    pub fn push(&mut self, value: f64) {
        self.samples.push_back(Sample::new(self.kind, value));
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Values in insertion order.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Owner of all sample windows. The only mutator of window contents.
#[derive(Debug, Clone)]
pub struct SampleAggregator {
    hr: SampleWindow,
    // Mirrors the heart-rate stream; no independent optical channel exists.
    ppg: SampleWindow,
    accel: SampleWindow,
    steps: SampleWindow,
    /// Latest heart rate; 0 until the sensor reports
    latest_bpm: u32,
    /// Latest acceleration magnitude
    latest_accel: f64,
    /// Steps accumulated since the last tick
    pending_steps: f64,
    /// Last cumulative counter value seen
    last_cumulative_steps: Option<f64>,
    tick_count: u64,
    snapshot_every: u64,
    tick_interval: Duration,
    timezone: Tz,
}

impl SampleAggregator {
    /// Create an aggregator with the given window capacity and snapshot cadence.
    pub fn new(capacity: usize, snapshot_every: u64, tick_interval: Duration, timezone: Tz) -> Self {
        Self {
            hr: SampleWindow::new(SampleKind::HeartRate, capacity),
            ppg: SampleWindow::new(SampleKind::HeartRate, capacity),
            accel: SampleWindow::new(SampleKind::AccelMagnitude, capacity),
            steps: SampleWindow::new(SampleKind::StepDelta, capacity),
            latest_bpm: 0,
            latest_accel: 0.0,
            pending_steps: 0.0,
            last_cumulative_steps: None,
            tick_count: 0,
            snapshot_every: snapshot_every.max(1),
            tick_interval,
            timezone,
        }
    }

    /// Aggregator with 20-sample windows, 10-tick snapshots and 1 Hz ticks.
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_WINDOW_CAPACITY,
            DEFAULT_SNAPSHOT_EVERY_TICKS,
            Duration::from_secs(1),
            chrono_tz::UTC,
        )
    }

    pub fn record_heart_rate(&mut self, bpm: u32) {
        self.latest_bpm = bpm;
    }

    /// Latch the magnitude of one accelerometer reading. A faulty axis
    /// (NaN or infinite) reads as 0, like a silent sensor.
    pub fn record_accel(&mut self, x: f32, y: f32, z: f32) {
        let magnitude = accel_magnitude(x, y, z);
        self.latest_accel = if magnitude.is_finite() { magnitude } else { 0.0 };
    }

    /// Accumulate the non-negative delta of a cumulative step counter.
    ///
    /// The first value only establishes the baseline. A counter that goes
    /// backwards (device reboot) contributes nothing and re-baselines.
    pub fn record_step_raw(&mut self, cumulative: f64) {
        if let Some(last) = self.last_cumulative_steps {
            self.pending_steps += (cumulative - last).max(0.0);
        }
        self.last_cumulative_steps = Some(cumulative);
    }

    /// Apply a raw reading from the sensor queue.
    pub fn apply(&mut self, reading: SensorReading) {
        match reading {
            SensorReading::HeartRate { bpm } => self.record_heart_rate(bpm),
            SensorReading::Accel { x, y, z } => self.record_accel(x, y, z),
            SensorReading::StepCount { cumulative } => self.record_step_raw(cumulative),
        }
    }

    /// Push the latched readings into the windows.
    ///
    /// Returns `true` when this tick is due for a snapshot.
    pub fn tick(&mut self) -> bool {
        if self.latest_bpm > 0 {
            let bpm = self.latest_bpm as f64;
            self.hr.push(bpm);
            self.ppg.push(bpm);
        }
        self.accel.push(self.latest_accel);
        self.steps.push(self.pending_steps.floor());
        self.pending_steps = 0.0;

        self.tick_count += 1;
        self.tick_count % self.snapshot_every == 0
    }

    /// Derive the feature vector from the current windows.
    pub fn snapshot(&self, now: DateTime<Utc>) -> FeatureVector {
        let hr = self.hr.values();
        let accel = self.accel.values();
        let ppg = self.ppg.values();
        let steps: f64 = self.steps.values().iter().sum();

        FeatureVector {
            hr_mean: features::mean(&hr),
            hr_std: features::rmssd(&hr),
            hr_slope: features::endpoint_slope(&hr),
            steps_20s: steps.max(0.0) as u32,
            accel_rms: features::rms(&accel),
            accel_peak: features::peak(&accel),
            ppg_std: features::population_std(&ppg),
            time_of_day: features::time_of_day(features::local_seconds_of_day(
                now,
                self.timezone,
            )),
            needs_help: false,
        }
    }

    /// Latest heart rate, if the sensor has reported one.
    pub fn current_heart_rate(&self) -> Option<u32> {
        (self.latest_bpm > 0).then_some(self.latest_bpm)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Wall-clock span covered by a full step window.
    pub fn step_window_span(&self) -> Duration {
        self.tick_interval * self.steps.capacity() as u32
    }

    pub fn window(&self, kind: SampleKind) -> &SampleWindow {
        match kind {
            SampleKind::HeartRate => &self.hr,
            SampleKind::AccelMagnitude => &self.accel,
            SampleKind::StepDelta => &self.steps,
        }
    }

    pub fn ppg_window(&self) -> &SampleWindow {
        &self.ppg
    }

    /// Drop all samples and latched readings.
    pub fn reset(&mut self) {
        self.hr.clear();
        self.ppg.clear();
        self.accel.clear();
        self.steps.clear();
        self.latest_bpm = 0;
        self.latest_accel = 0.0;
        self.pending_steps = 0.0;
        self.last_cumulative_steps = None;
        self.tick_count = 0;
    }
}

impl Default for SampleAggregator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_0230() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap()
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = SampleWindow::new(SampleKind::HeartRate, 20);
        for i in 0..57 {
            window.push(i as f64);
            assert!(window.len() <= 20);
        }
        assert_eq!(window.values().first(), Some(&37.0));
        assert_eq!(window.values().last(), Some(&56.0));
    }

    #[test]
    fn test_aggregator_windows_bounded() {
        let mut agg = SampleAggregator::with_defaults();
        for i in 0..100 {
            agg.record_heart_rate(60 + (i % 7));
            agg.record_accel(i as f32, 0.0, 0.0);
            agg.record_step_raw(i as f64 * 2.0);
            agg.tick();
            for kind in [
                SampleKind::HeartRate,
                SampleKind::AccelMagnitude,
                SampleKind::StepDelta,
            ] {
                assert!(agg.window(kind).len() <= DEFAULT_WINDOW_CAPACITY);
            }
            assert!(agg.ppg_window().len() <= DEFAULT_WINDOW_CAPACITY);
        }
    }

    #[test]
    fn test_snapshot_every_tenth_tick() {
        let mut agg = SampleAggregator::with_defaults();
        let mut due = Vec::new();
        for _ in 0..30 {
            if agg.tick() {
                due.push(agg.tick_count());
            }
        }
        assert_eq!(due, vec![10, 20, 30]);
    }

    #[test]
    fn test_empty_snapshot_is_zero() {
        let agg = SampleAggregator::with_defaults();
        let features = agg.snapshot(at_0230());
        assert_eq!(features.hr_mean, 0.0);
        assert_eq!(features.hr_std, 0.0);
        assert_eq!(features.hr_slope, 0.0);
        assert_eq!(features.steps_20s, 0);
        assert_eq!(features.accel_rms, 0.0);
        assert_eq!(features.accel_peak, 0.0);
        assert_eq!(features.ppg_std, 0.0);
        assert_eq!(features.time_of_day, 1.0);
        assert!(!features.needs_help);
    }

    #[test]
    fn test_heart_rate_skipped_until_sensor_reports() {
        let mut agg = SampleAggregator::with_defaults();
        agg.tick();
        agg.tick();
        assert!(agg.window(SampleKind::HeartRate).is_empty());
        assert_eq!(agg.window(SampleKind::AccelMagnitude).len(), 2);
        assert_eq!(agg.current_heart_rate(), None);

        agg.record_heart_rate(75);
        agg.tick();
        assert_eq!(agg.window(SampleKind::HeartRate).values(), vec![75.0]);
        assert_eq!(agg.ppg_window().values(), vec![75.0]);
    }

    #[test]
    fn test_step_deltas() {
        let mut agg = SampleAggregator::with_defaults();
        agg.record_step_raw(1000.0);
        agg.tick();
        agg.record_step_raw(1003.0);
        agg.record_step_raw(1005.0);
        agg.tick();
        // Counter reset contributes nothing
        agg.record_step_raw(2.0);
        agg.tick();
        agg.record_step_raw(4.0);
        agg.tick();

        assert_eq!(
            agg.window(SampleKind::StepDelta).values(),
            vec![0.0, 5.0, 0.0, 2.0]
        );
        assert_eq!(agg.snapshot(at_0230()).steps_20s, 7);
    }

    #[test]
    fn test_snapshot_features() {
        let mut agg = SampleAggregator::with_defaults();
        for bpm in [70, 72, 70, 74] {
            agg.record_heart_rate(bpm);
            agg.record_accel(3.0, 4.0, 0.0);
            agg.tick();
        }

        let features = agg.snapshot(at_0230());
        assert!((features.hr_mean - 71.5).abs() < 1e-9);
        assert!((features.hr_std - 8.0f64.sqrt()).abs() < 1e-9);
        assert!((features.hr_slope - 4.0 / 3.0).abs() < 1e-9);
        assert!((features.accel_rms - 5.0).abs() < 1e-9);
        assert!((features.accel_peak - 5.0).abs() < 1e-9);
        // Population std of 70, 72, 70, 74: mean 71.5, variance 2.75
        assert!((features.ppg_std - 2.75f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_step_window_span() {
        let agg = SampleAggregator::with_defaults();
        assert_eq!(agg.step_window_span(), Duration::from_secs(20));
    }

    #[test]
    fn test_non_finite_accel_reads_as_zero() {
        let mut agg = SampleAggregator::with_defaults();
        agg.record_accel(f32::NAN, 0.0, 9.81);
        agg.tick();
        agg.record_accel(f32::INFINITY, 0.0, 0.0);
        agg.tick();

        assert_eq!(agg.window(SampleKind::AccelMagnitude).values(), vec![0.0, 0.0]);
        let features = agg.snapshot(Utc::now());
        assert_eq!(features.accel_peak, 0.0);
        assert!(crate::telemetry::encode_features(&features).is_ok());
    }

    #[test]
    fn test_apply_and_reset() {
        let mut agg = SampleAggregator::with_defaults();
        agg.apply(SensorReading::HeartRate { bpm: 88 });
        agg.apply(SensorReading::Accel { x: 0.0, y: 0.0, z: 9.81 });
        agg.tick();
        assert_eq!(agg.current_heart_rate(), Some(88));

        agg.reset();
        assert_eq!(agg.tick_count(), 0);
        assert!(agg.window(SampleKind::AccelMagnitude).is_empty());
        assert_eq!(agg.current_heart_rate(), None);
    }
}
