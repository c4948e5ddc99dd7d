//! Relay transport abstraction

use async_trait::async_trait;
use dispatch_runtime::SubmitError;
use relay_types::{Acknowledgment, CodecError};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] CodecError),

    #[error("Submit failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Outbound side of the message relay
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Hand one acknowledgment to the relay. Postage was already paid from
    /// the dispatcher reserve when the acknowledgment was committed.
    async fn deliver(&self, ack: &Acknowledgment) -> Result<(), BridgeError>;
}

/// Transport that only logs acknowledgments
///
/// Used when no relay endpoint is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingTransport;

#[async_trait]
impl RelayTransport for LoggingTransport {
    async fn deliver(&self, ack: &Acknowledgment) -> Result<(), BridgeError> {
        tracing::info!(
            "Acknowledgment to {} on chain {} ({} bytes, fee {})",
            ack.dest_address,
            ack.dest_chain,
            ack.payload.len(),
            ack.fee
        );
        Ok(())
    }
}
