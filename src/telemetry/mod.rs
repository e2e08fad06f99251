//! Paired-device messaging.
//!
//! The wearable sends a feature message on every snapshot; the companion
//! answers each one with a confidence message. Delivery is best effort.

pub mod link;
pub mod messages;

// Re-export commonly used types
pub use link::{link_pair, Envelope, LinkReceiver, LinkSender, Transport, TransportError};
pub use messages::{
    decode_confidence, decode_features, decode_inbound, encode_confidence, encode_features,
    ConfidenceMessage, InboundMessage, TelemetryError, PHONE_TO_WATCH_PATH, SCHEMA_VERSION,
    WATCH_TO_PHONE_PATH,
};
