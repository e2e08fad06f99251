//! Push-style sensor input.
//!
//! Platform glue (heart-rate, accelerometer and step-counter callbacks) feeds
//! readings in through a [`SensorHandle`]; nothing here depends on a
//! particular sensor framework.

pub mod hub;
pub mod types;

// Re-export commonly used types
pub use hub::{SensorError, SensorHandle, SensorHub};
pub use types::{accel_magnitude, Sample, SampleKind, SensorReading};
