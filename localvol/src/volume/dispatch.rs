//! One-way casts to compute hosts.

use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};
use localvol_shared::messages::{CastEnvelope, ComputeMessage, host_queue};
use tokio::sync::mpsc;

/// Message bus seam. A cast hands the envelope over and returns without
/// waiting for the receiver.
pub trait CastTransport: Send + Sync {
    fn cast(&self, envelope: CastEnvelope) -> LocalvolResult<()>;
}

/// In-process transport backed by an unbounded channel.
///
/// The receiving half is owned by whatever forwards casts to the bus (or by a
/// test asserting on them).
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<CastEnvelope>,
}

impl ChannelTransport {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CastEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CastTransport for ChannelTransport {
    fn cast(&self, envelope: CastEnvelope) -> LocalvolResult<()> {
        self.tx
            .send(envelope)
            .map_err(|e| LocalvolError::Internal(format!("cast receiver dropped: {}", e.0.queue)))
    }
}

/// Routes messages to `<compute_topic>.<host>`.
#[derive(Clone)]
pub struct ComputeDispatcher {
    transport: Arc<dyn CastTransport>,
    topic: String,
}

impl ComputeDispatcher {
    pub fn new(transport: Arc<dyn CastTransport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }

    /// Best-effort cast. Failures are logged and not returned.
    pub fn cast(&self, host: &str, message: ComputeMessage) {
        let method = message.method();
        let envelope = CastEnvelope {
            queue: host_queue(&self.topic, host),
            message,
        };
        let queue = envelope.queue.clone();

        match self.transport.cast(envelope) {
            Ok(()) => tracing::debug!(%queue, method, "Cast dispatched"),
            Err(e) => tracing::error!(%queue, method, error = %e, "Cast failed"),
        }
    }
}
