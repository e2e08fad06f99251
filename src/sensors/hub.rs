//! Queue that serializes concurrent sensor callbacks.
//!
//! Each platform callback holds a cloned [`SensorHandle`] and pushes readings
//! without blocking. The monitor's tick task is the only consumer: it drains
//! the queue into the aggregator right before every tick.

use crate::sensors::types::SensorReading;
use crate::stats::SharedStats;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned to sensor callbacks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SensorError {
    #[error("Sensor hub is already running")]
    AlreadyRunning,
    #[error("Sensor hub is stopped; reading discarded")]
    Stopped,
    #[error("Sensor queue is full; reading discarded")]
    QueueFull,
}

/// Bounded multi-producer queue of raw readings.
pub struct SensorHub {
    sender: Sender<SensorReading>,
    receiver: Receiver<SensorReading>,
    running: Arc<AtomicBool>,
    stats: SharedStats,
}

impl SensorHub {
    /// Create a hub holding at most `capacity` undrained readings.
    pub fn new(capacity: usize, stats: SharedStats) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            stats,
        }
    }

    /// A handle for one sensor callback.
    pub fn handle(&self) -> SensorHandle {
        SensorHandle {
            sender: self.sender.clone(),
            running: self.running.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Start accepting readings.
    pub fn start(&self) -> Result<(), SensorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SensorError::AlreadyRunning);
        }
        Ok(())
    }

    /// Stop accepting readings and discard anything still queued.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Take every reading queued so far, oldest first.
    pub fn drain(&self) -> Vec<SensorReading> {
        self.receiver.try_iter().collect()
    }
}

/// Cloneable producer side of a [`SensorHub`].
#[derive(Clone)]
pub struct SensorHandle {
    sender: Sender<SensorReading>,
    running: Arc<AtomicBool>,
    stats: SharedStats,
}

impl SensorHandle {
    pub fn heart_rate(&self, bpm: u32) -> Result<(), SensorError> {
        self.push(SensorReading::HeartRate { bpm })
    }

    pub fn accel(&self, x: f32, y: f32, z: f32) -> Result<(), SensorError> {
        self.push(SensorReading::Accel { x, y, z })
    }

    pub fn step_count(&self, cumulative: f64) -> Result<(), SensorError> {
        self.push(SensorReading::StepCount { cumulative })
    }

    /// Enqueue a reading without blocking the callback thread.
    pub fn push(&self, reading: SensorReading) -> Result<(), SensorError> {
        if !self.running.load(Ordering::SeqCst) {
            self.stats.record_dropped_reading();
            return Err(SensorError::Stopped);
        }

        match self.sender.try_send(reading) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped_reading();
                tracing::debug!(kind = ?reading.kind(), "sensor queue full, reading dropped");
                Err(SensorError::QueueFull)
            }
        }
    }
}
