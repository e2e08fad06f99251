//! Wire schema for the two messages exchanged between the paired devices.
//!
//! Schema version 2 (carried in the message path):
//!
//! ```text
//! wearable → companion   /watch_her/v2/watch_to_phone
//!   {"hrMean":f64, "hrStd":f64, "hrSlope":f64, "steps20s":u32,
//!    "accelRms":f64, "accelPeak":f64, "ppgStd":f64, "timeOfDay":f64,
//!    "needsHelp":bool}
//!
//! companion → wearable   /watch_her/v2/phone_to_watch
//!   {"confidencePercentage":f64}        (0 to 100)
//! ```
//!
//! Decoding is strict. Missing, mistyped, out-of-range and unknown fields
//! (including the legacy `ppg`/`heartRate` names) are rejected with an error
//! naming the field, never coerced.

use crate::core::features::{FeatureVector, FEATURE_NAMES};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const SCHEMA_VERSION: u32 = 2;

/// Path of feature messages sent by the wearable.
pub const WATCH_TO_PHONE_PATH: &str = "/watch_her/v2/watch_to_phone";

/// Path of confidence messages sent by the companion.
pub const PHONE_TO_WATCH_PATH: &str = "/watch_her/v2/phone_to_watch";

const CONFIDENCE_FIELD: &str = "confidencePercentage";

const FEATURE_FIELDS: [&str; 9] = [
    "hrMean",
    "hrStd",
    "hrSlope",
    "steps20s",
    "accelRms",
    "accelPeak",
    "ppgStd",
    "timeOfDay",
    "needsHelp",
];

/// Errors produced while encoding or validating a wire message.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TelemetryError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing required field `{0}`")]
    MissingField(String),

    #[error("Invalid value for field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unknown field `{0}`")]
    UnknownField(String),

    #[error("Unknown message path `{0}`")]
    UnknownPath(String),

    #[error("Encoding error: {0}")]
    Encode(String),
}

impl TelemetryError {
    /// The offending field, for schema errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            TelemetryError::MissingField(field)
            | TelemetryError::UnknownField(field)
            | TelemetryError::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Companion → wearable message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceMessage {
    pub confidence_percentage: f64,
}

/// A validated inbound message, routed by path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InboundMessage {
    Features(FeatureVector),
    Confidence(ConfidenceMessage),
}

/// Serialize a snapshot. Non-finite features are refused here since JSON
/// would carry them as `null`.
pub fn encode_features(features: &FeatureVector) -> Result<Vec<u8>, TelemetryError> {
    for (field, value) in FEATURE_NAMES.iter().zip(features.as_array()) {
        if !value.is_finite() {
            return Err(TelemetryError::InvalidField {
                field: field.to_string(),
                reason: format!("{value} is not finite"),
            });
        }
    }
    serde_json::to_vec(features).map_err(|e| TelemetryError::Encode(e.to_string()))
}

pub fn encode_confidence(confidence_pct: f64) -> Result<Vec<u8>, TelemetryError> {
    if !confidence_pct.is_finite() || !(0.0..=100.0).contains(&confidence_pct) {
        return Err(TelemetryError::InvalidField {
            field: CONFIDENCE_FIELD.to_string(),
            reason: format!("{confidence_pct} is outside [0, 100]"),
        });
    }
    let message = ConfidenceMessage {
        confidence_percentage: confidence_pct,
    };
    serde_json::to_vec(&message).map_err(|e| TelemetryError::Encode(e.to_string()))
}

/// Validate a wearable → companion payload.
pub fn decode_features(payload: &[u8]) -> Result<FeatureVector, TelemetryError> {
    let map = parse_object(payload)?;

    let features = FeatureVector {
        hr_mean: number(&map, "hrMean", Domain::NonNegative)?,
        hr_std: number(&map, "hrStd", Domain::NonNegative)?,
        hr_slope: number(&map, "hrSlope", Domain::Any)?,
        steps_20s: count(&map, "steps20s")?,
        accel_rms: number(&map, "accelRms", Domain::NonNegative)?,
        accel_peak: number(&map, "accelPeak", Domain::NonNegative)?,
        ppg_std: number(&map, "ppgStd", Domain::NonNegative)?,
        time_of_day: number(&map, "timeOfDay", Domain::Unit)?,
        needs_help: flag(&map, "needsHelp")?,
    };

    reject_unknown(&map, &FEATURE_FIELDS)?;
    Ok(features)
}

/// Validate a companion → wearable payload.
pub fn decode_confidence(payload: &[u8]) -> Result<ConfidenceMessage, TelemetryError> {
    let map = parse_object(payload)?;
    let confidence_percentage = number(&map, CONFIDENCE_FIELD, Domain::Percent)?;
    reject_unknown(&map, &[CONFIDENCE_FIELD])?;
    Ok(ConfidenceMessage {
        confidence_percentage,
    })
}

/// Route and validate a payload by its message path.
pub fn decode_inbound(path: &str, payload: &[u8]) -> Result<InboundMessage, TelemetryError> {
    match path {
        WATCH_TO_PHONE_PATH => decode_features(payload).map(InboundMessage::Features),
        PHONE_TO_WATCH_PATH => decode_confidence(payload).map(InboundMessage::Confidence),
        other => Err(TelemetryError::UnknownPath(other.to_string())),
    }
}

#[derive(Debug, Clone, Copy)]
enum Domain {
    Any,
    NonNegative,
    Unit,
    Percent,
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, TelemetryError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| TelemetryError::Malformed(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(TelemetryError::NotAnObject),
    }
}

fn field<'a>(map: &'a Map<String, Value>, name: &str) -> Result<&'a Value, TelemetryError> {
    map.get(name)
        .ok_or_else(|| TelemetryError::MissingField(name.to_string()))
}

fn invalid(name: &str, reason: impl Into<String>) -> TelemetryError {
    TelemetryError::InvalidField {
        field: name.to_string(),
        reason: reason.into(),
    }
}

fn number(map: &Map<String, Value>, name: &str, domain: Domain) -> Result<f64, TelemetryError> {
    let value = field(map, name)?
        .as_f64()
        .ok_or_else(|| invalid(name, "expected a number"))?;

    if !value.is_finite() {
        return Err(invalid(name, "expected a finite number"));
    }

    let in_domain = match domain {
        Domain::Any => true,
        Domain::NonNegative => value >= 0.0,
        Domain::Unit => (0.0..=1.0).contains(&value),
        Domain::Percent => (0.0..=100.0).contains(&value),
    };
    if !in_domain {
        return Err(invalid(name, format!("{value} is outside {domain:?} range")));
    }

    Ok(value)
}

fn count(map: &Map<String, Value>, name: &str) -> Result<u32, TelemetryError> {
    field(map, name)?
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid(name, "expected a non-negative integer"))
}

fn flag(map: &Map<String, Value>, name: &str) -> Result<bool, TelemetryError> {
    field(map, name)?
        .as_bool()
        .ok_or_else(|| invalid(name, "expected a boolean"))
}

fn reject_unknown(map: &Map<String, Value>, allowed: &[&str]) -> Result<(), TelemetryError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(TelemetryError::UnknownField(key.clone())),
        None => Ok(()),
    }
}
