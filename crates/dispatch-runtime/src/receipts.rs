//! Message receipts keyed by relay identity, using DashMap for concurrent access

use dashmap::DashMap;
use relay_types::{MessageKey, Operation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Executed,
    Rejected,
}

/// Outcome of the latest delivery of one relay message
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub slot: u64,
    pub operation: Operation,
    pub status: ReceiptStatus,
    pub error: Option<String>,
    pub error_code: Option<u32>,
    /// Deliveries seen for this key, including the first
    pub deliveries: u32,
}

/// Thread-safe receipt storage
///
/// Readers (RPC) and the block producer share one store.
#[derive(Clone, Default)]
pub struct ReceiptStore {
    receipts: Arc<DashMap<MessageKey, Receipt>>,
}

impl ReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MessageKey) -> Option<Receipt> {
        self.receipts.get(key).map(|r| r.value().clone())
    }

    /// Record a delivery. A rejected redelivery never replaces an executed
    /// receipt; it only bumps the delivery count.
    pub fn record(&self, key: MessageKey, mut receipt: Receipt) {
        let mut entry = self.receipts.entry(key).or_insert_with(|| Receipt {
            deliveries: 0,
            ..receipt.clone()
        });
        receipt.deliveries = entry.deliveries + 1;
        if entry.status == ReceiptStatus::Executed && receipt.status == ReceiptStatus::Rejected {
            entry.deliveries = receipt.deliveries;
        } else {
            *entry = receipt;
        }
    }

    /// Insert without merging (used when loading from disk)
    pub fn insert(&self, key: MessageKey, receipt: Receipt) {
        self.receipts.insert(key, receipt);
    }

    pub fn all(&self) -> Vec<(MessageKey, Receipt)> {
        self.receipts
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}
