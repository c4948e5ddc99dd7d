//! Dispatch Runtime - execution engine for the farm relay
//!
//! This crate hosts the dispatcher on a concrete ledger:
//! - In-memory ledger implementing the farm, token, bank and relay hosts
//! - Per-message checkpoint and rollback
//! - Fixed-interval block production with acknowledgment hand-off
//! - Message receipts and sled persistence

pub mod block_producer;
pub mod ledger;
pub mod persistence;
pub mod processor;
pub mod receipts;


pub use block_producer::{
    BlockProducer, BlockProducerConfig, BlockUpdate, SubmitError, WorkItem, WorkSender,
};
pub use ledger::{FarmPool, LedgerHost, Position, RelayFees, REWARD_PRECISION};
pub use persistence::{ChainMetadata, PersistentStore, ProcessorPersistence};
pub use processor::{MessageResult, OperatorResult, RelayProcessor};
pub use receipts::{Receipt, ReceiptStatus, ReceiptStore};

/// Block time in milliseconds
pub const BLOCK_TIME_MS: u64 = 200;

/// Maximum work items per block
pub const MAX_ITEMS_PER_BLOCK: usize = 256;
