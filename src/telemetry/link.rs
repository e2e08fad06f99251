//! Transport seam between the paired devices.
//!
//! A [`Transport`] delivers `(path, payload)` envelopes at most once with no
//! acknowledgement. [`link_pair`] builds an in-process link for the
//! simulator and tests; platform bindings implement the trait directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// One message on the link.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub path: String,
    pub payload: Vec<u8>,
}

/// Errors returned by a transport when a send cannot even be attempted.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer is not reachable")]
    Unreachable,
    #[error("Transport failure: {0}")]
    Other(String),
}

/// Fire-and-forget delivery to the paired device.
pub trait Transport: Send + Sync {
    fn send(&self, path: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Sending half of an in-process link.
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::UnboundedSender<Envelope>,
    connected: Arc<AtomicBool>,
}

impl LinkSender {
    /// Simulate the peer going out of range (or coming back).
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

impl Transport for LinkSender {
    fn send(&self, path: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable);
        }
        self.tx
            .send(Envelope {
                path: path.to_string(),
                payload,
            })
            .map_err(|_| TransportError::Unreachable)
    }
}

/// Receiving half of an in-process link.
#[derive(Debug)]
pub struct LinkReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl LinkReceiver {
    /// Next envelope, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

fn channel() -> (LinkSender, LinkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LinkSender {
            tx,
            connected: Arc::new(AtomicBool::new(true)),
        },
        LinkReceiver { rx },
    )
}

/// Two connected endpoints: `(wearable, companion)`.
///
/// Each endpoint sends to the other's receiver.
pub fn link_pair() -> ((LinkSender, LinkReceiver), (LinkSender, LinkReceiver)) {
    let (to_companion, companion_rx) = channel();
    let (to_wearable, wearable_rx) = channel();
    ((to_companion, wearable_rx), (to_wearable, companion_rx))
}
