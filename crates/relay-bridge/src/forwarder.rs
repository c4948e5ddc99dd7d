//! Acknowledgment Forwarder - hands committed acknowledgments to the relay
//!
//! Consumes the block producer's acknowledgment stream, which never drops
//! entries. Each acknowledgment is attempted exactly once. A failed delivery
//! is logged with the full acknowledgment and counted; recovering it is an
//! operator task.

use crate::transport::RelayTransport;
use relay_types::Acknowledgment;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub struct AckForwarder {
    transport: Arc<dyn RelayTransport>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl AckForwarder {
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self {
            transport,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Deliver one acknowledgment; returns whether the transport accepted it
    pub async fn forward(&self, ack: &Acknowledgment) -> bool {
        match self.transport.deliver(ack).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Undelivered acknowledgment to {} on chain {} (fee {}, payload {:?}): {}",
                    ack.dest_address,
                    ack.dest_chain,
                    ack.fee,
                    ack.payload,
                    e
                );
                false
            }
        }
    }

    /// Forward acknowledgments until the producer goes away
    pub async fn run(self: Arc<Self>, mut acks: UnboundedReceiver<Acknowledgment>) {
        tracing::info!("Acknowledgment forwarder started");
        while let Some(ack) = acks.recv().await {
            self.forward(&ack).await;
        }
        tracing::info!(
            "Acknowledgment forwarder stopped ({} delivered, {} failed)",
            self.delivered_count(),
            self.failed_count()
        );
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BridgeError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_types::{Address, ChainId};
    use tokio::sync::mpsc::unbounded_channel;

    /// Records deliveries and fails every call while `down` is set
    #[derive(Default)]
    struct RecordingTransport {
        delivered: Mutex<Vec<Acknowledgment>>,
        down: Mutex<bool>,
    }

    #[async_trait]
    impl RelayTransport for RecordingTransport {
        async fn deliver(&self, ack: &Acknowledgment) -> Result<(), BridgeError> {
            if *self.down.lock() {
                return Err(BridgeError::Delivery("relay unreachable".into()));
            }
            self.delivered.lock().push(ack.clone());
            Ok(())
        }
    }

    fn ack(fee: u64) -> Acknowledgment {
        Acknowledgment {
            dest_chain: ChainId(1),
            dest_address: Address::from_label("source"),
            payload: vec![1, 2, 3],
            fee,
        }
    }

    #[tokio::test]
    async fn test_run_delivers_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let forwarder = Arc::new(AckForwarder::new(transport.clone()));
        let (sender, receiver) = unbounded_channel();

        for fee in 0..70 {
            sender.send(ack(fee)).unwrap();
        }
        drop(sender);
        forwarder.clone().run(receiver).await;

        assert_eq!(forwarder.delivered_count(), 70);
        assert_eq!(forwarder.failed_count(), 0);
        let fees: Vec<u64> = transport.delivered.lock().iter().map(|a| a.fee).collect();
        assert_eq!(fees, (0..70).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let transport = Arc::new(RecordingTransport::default());
        *transport.down.lock() = true;
        let forwarder = AckForwarder::new(transport.clone());

        assert!(!forwarder.forward(&ack(1)).await);
        *transport.down.lock() = false;
        assert!(forwarder.forward(&ack(2)).await);

        assert_eq!(forwarder.failed_count(), 1);
        assert_eq!(forwarder.delivered_count(), 1);
        assert_eq!(*transport.delivered.lock(), vec![ack(2)]);
    }
}
