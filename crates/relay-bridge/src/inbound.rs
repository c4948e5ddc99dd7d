//! Inbound Relay - accepts relay message envelopes
//!
//! Decodes the borsh envelope and queues it for the block producer.
//! Authentication and payload validation stay with the dispatcher.

use crate::transport::BridgeError;
use dispatch_runtime::WorkSender;
use relay_types::InboundMessage;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct InboundRelay {
    sender: WorkSender,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl InboundRelay {
    pub fn new(sender: WorkSender) -> Self {
        Self {
            sender,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Decode and queue one envelope; returns the queued message
    pub fn submit(&self, envelope: &[u8]) -> Result<InboundMessage, BridgeError> {
        let message = InboundMessage::from_bytes(envelope).map_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Rejected relay envelope ({} bytes): {}", envelope.len(), e);
            BridgeError::from(e)
        })?;

        self.sender.submit_message(message.clone()).map_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Could not queue relay message from {}: {}", message.sender, e);
            BridgeError::from(e)
        })?;

        self.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Queued relay message from {} on chain {}",
            message.sender,
            message.source_chain
        );
        Ok(message)
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
