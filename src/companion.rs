//! Companion (phone) side of the link.
//!
//! Stateless per message: every feature message is validated, scored, and
//! answered with one confidence message. Nothing is remembered between
//! messages.

use crate::core::classifier::RiskScorer;
use crate::sinks::{CompanionSink, CompanionUpdate, SafetyStatus};
use crate::stats::SharedStats;
use crate::telemetry::{
    decode_inbound, encode_confidence, InboundMessage, LinkReceiver, TelemetryError, Transport,
    PHONE_TO_WATCH_PATH,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct CompanionService {
    scorer: RiskScorer,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn CompanionSink>,
    stats: SharedStats,
}

impl CompanionService {
    pub fn new(
        scorer: RiskScorer,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn CompanionSink>,
        stats: SharedStats,
    ) -> Self {
        Self {
            scorer,
            transport,
            sink,
            stats,
        }
    }

    pub fn has_model(&self) -> bool {
        self.scorer.has_model()
    }

    /// Handle one inbound message.
    ///
    /// On a schema error nothing is scored, sent or rendered.
    pub fn handle_message(
        &self,
        path: &str,
        payload: &[u8],
    ) -> Result<CompanionUpdate, TelemetryError> {
        let features = match decode_inbound(path, payload) {
            Ok(InboundMessage::Features(features)) => features,
            Ok(InboundMessage::Confidence(_)) => {
                let err = TelemetryError::UnknownPath(path.to_string());
                self.reject(path, &err);
                return Err(err);
            }
            Err(err) => {
                self.reject(path, &err);
                return Err(err);
            }
        };

        let confidence_pct = self.scorer.score_percentage(&features);

        match encode_confidence(confidence_pct) {
            Ok(payload) => match self.transport.send(PHONE_TO_WATCH_PATH, payload) {
                Ok(()) => tracing::debug!(confidence = confidence_pct, "confidence sent"),
                Err(e) => {
                    self.stats.record_send_failure();
                    tracing::warn!(error = %e, "confidence reply not delivered");
                }
            },
            Err(e) => {
                self.stats.record_send_failure();
                tracing::warn!(error = %e, "failed to encode confidence reply");
            }
        }

        let update = CompanionUpdate {
            status: if features.needs_help {
                SafetyStatus::Unsafe
            } else {
                SafetyStatus::Safe
            },
            confidence_pct,
            features,
        };
        self.sink.render(&update);
        Ok(update)
    }

    fn reject(&self, path: &str, err: &TelemetryError) {
        self.stats.record_decode_failure();
        tracing::warn!(
            path,
            field = err.field().unwrap_or("-"),
            error = %err,
            "feature message discarded"
        );
    }

    /// Serve every message arriving on `receiver` until the link closes.
    pub fn spawn(self: Arc<Self>, mut receiver: LinkReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(model = self.has_model(), "companion listening");
            while let Some(envelope) = receiver.recv().await {
                // Failures are logged and counted inside.
                let _ = self.handle_message(&envelope.path, &envelope.payload);
            }
            tracing::debug!("companion link closed");
        })
    }
}
