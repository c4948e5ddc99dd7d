//! Persistence Layer for relay state
//!
//! Uses the sled embedded database to persist the dispatcher, the ledger and
//! message receipts across restarts. State is saved periodically and on
//! shutdown. The dispatcher snapshot, the ledger and the slot are written as
//! one batch, so a crash mid-save keeps the previous consistent image.

use crate::{
    ledger::LedgerHost,
    processor::RelayProcessor,
    receipts::{Receipt, ReceiptStore},
};
use farm_dispatcher::{Dispatcher, DispatcherSnapshot};
use relay_types::MessageKey;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

const DISPATCHER_KEY: &str = "dispatcher";
const LEDGER_KEY: &str = "ledger";
const SLOT_KEY: &str = "slot";
const CHAIN_KEY: &str = "chain";

/// Metadata about the saved state
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainMetadata {
    pub slot: u64,
    pub delegate_count: u64,
    pub receipt_count: u64,
    /// Last save timestamp (unix seconds)
    pub last_save_ts: i64,
}

/// Persistent storage for relay state
pub struct PersistentStore {
    db: Db,
    state: sled::Tree,
    receipts: sled::Tree,
    metadata: sled::Tree,
}

impl PersistentStore {
    /// Open or create a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let state = db.open_tree("state")?;
        let receipts = db.open_tree("receipts")?;
        let metadata = db.open_tree("metadata")?;

        tracing::info!("Opened persistent store at {:?}", path.as_ref());

        Ok(Self {
            db,
            state,
            receipts,
            metadata,
        })
    }

    /// Write the dispatcher snapshot, the ledger and the slot atomically
    pub fn save_state(
        &self,
        snapshot: &DispatcherSnapshot,
        ledger: &LedgerHost,
        slot: u64,
    ) -> anyhow::Result<()> {
        let mut batch = sled::Batch::default();
        batch.insert(DISPATCHER_KEY, bincode::serialize(snapshot)?);
        batch.insert(LEDGER_KEY, bincode::serialize(ledger)?);
        batch.insert(SLOT_KEY, bincode::serialize(&slot)?);
        self.state.apply_batch(batch)?;
        Ok(())
    }

    pub fn load_dispatcher(&self) -> anyhow::Result<Option<DispatcherSnapshot>> {
        match self.state.get(DISPATCHER_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_ledger(&self) -> anyhow::Result<Option<LedgerHost>> {
        match self.state.get(LEDGER_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_slot(&self) -> anyhow::Result<Option<u64>> {
        match self.state.get(SLOT_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn store_receipt(&self, key: &MessageKey, receipt: &Receipt) -> anyhow::Result<()> {
        self.receipts
            .insert(bincode::serialize(key)?, bincode::serialize(receipt)?)?;
        Ok(())
    }

    pub fn get_receipt(&self, key: &MessageKey) -> anyhow::Result<Option<Receipt>> {
        match self.receipts.get(bincode::serialize(key)?)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_all_receipts(&self) -> anyhow::Result<Vec<(MessageKey, Receipt)>> {
        let mut receipts = Vec::new();
        for result in self.receipts.iter() {
            let (key, value) = result?;
            receipts.push((bincode::deserialize(&key)?, bincode::deserialize(&value)?));
        }
        Ok(receipts)
    }

    pub fn save_metadata(&self, metadata: &ChainMetadata) -> anyhow::Result<()> {
        self.metadata.insert(CHAIN_KEY, bincode::serialize(metadata)?)?;
        Ok(())
    }

    pub fn load_metadata(&self) -> anyhow::Result<Option<ChainMetadata>> {
        match self.metadata.get(CHAIN_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) -> anyhow::Result<()> {
        self.state.clear()?;
        self.receipts.clear()?;
        self.metadata.clear()?;
        Ok(())
    }
}

/// Extension trait to add persistence to RelayProcessor
pub trait ProcessorPersistence: Sized {
    /// Save dispatcher, ledger and receipts
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<ChainMetadata>;

    /// Restore a processor saved by `save_to_disk`, if any
    fn load_from_disk(store: &PersistentStore) -> anyhow::Result<Option<Self>>;
}

impl ProcessorPersistence for RelayProcessor {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<ChainMetadata> {
        let snapshot = self.dispatcher().snapshot()?;
        store.save_state(&snapshot, self.host(), self.current_slot())?;

        let receipts = self.receipts().all();
        for (key, receipt) in &receipts {
            store.store_receipt(key, receipt)?;
        }

        let metadata = ChainMetadata {
            slot: self.current_slot(),
            delegate_count: snapshot.delegates.len() as u64,
            receipt_count: receipts.len() as u64,
            last_save_ts: chrono::Utc::now().timestamp(),
        };
        store.save_metadata(&metadata)?;
        store.flush()?;

        tracing::info!(
            "Saved state at slot {} ({} delegates, {} receipts)",
            metadata.slot,
            metadata.delegate_count,
            metadata.receipt_count
        );
        Ok(metadata)
    }

    fn load_from_disk(store: &PersistentStore) -> anyhow::Result<Option<Self>> {
        let Some(snapshot) = store.load_dispatcher()? else {
            return Ok(None);
        };
        let ledger = store
            .load_ledger()?
            .ok_or_else(|| anyhow::anyhow!("dispatcher state saved without ledger"))?;
        let slot = match store.load_slot()? {
            Some(slot) => slot,
            None => store.load_metadata()?.unwrap_or_default().slot,
        };

        let receipts = ReceiptStore::new();
        for (key, receipt) in store.get_all_receipts()? {
            receipts.insert(key, receipt);
        }

        let dispatcher = Dispatcher::from_snapshot(snapshot)?;
        tracing::info!(
            "Loaded state at slot {} ({} delegates, {} receipts)",
            slot,
            dispatcher.registry().len(),
            receipts.len()
        );
        Ok(Some(RelayProcessor::from_parts(
            dispatcher,
            ledger,
            receipts,
            slot,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipts::ReceiptStatus;
    use relay_types::{Address, ChainId, Operation};
    use tempfile::tempdir;

    #[test]
    fn test_store_and_load_receipt() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();

        let key = MessageKey {
            source_chain: ChainId(1),
            sender: Address::from_label("source"),
            user: Address::from_label("user"),
            pool: 2,
            nonce: 9,
        };
        let receipt = Receipt {
            slot: 42,
            operation: Operation::Withdraw,
            status: ReceiptStatus::Rejected,
            error: Some("boom".into()),
            error_code: Some(6),
            deliveries: 1,
        };

        store.store_receipt(&key, &receipt).unwrap();
        store.flush().unwrap();

        assert_eq!(store.get_receipt(&key).unwrap(), Some(receipt));
        assert_eq!(store.receipt_count(), 1);
    }

    #[test]
    fn test_metadata() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();
        assert!(store.load_metadata().unwrap().is_none());

        let metadata = ChainMetadata {
            slot: 1000,
            delegate_count: 3,
            receipt_count: 12,
            last_save_ts: 12345,
        };
        store.save_metadata(&metadata).unwrap();

        assert_eq!(store.load_metadata().unwrap(), Some(metadata));
    }

    #[test]
    fn test_state_written_as_one_image() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();
        let config = farm_dispatcher::DispatcherConfig {
            address: Address::from_label("dispatcher"),
            owner: Address::from_label("owner"),
            operator: Address::from_label("operator"),
            trusted_source: relay_types::Provenance {
                source_chain: ChainId(1),
                sender: Address::from_label("source"),
            },
            destination_chain: ChainId(2),
            incentive_amount: 0,
        };
        let snapshot = Dispatcher::new(config).snapshot().unwrap();
        let mut ledger = LedgerHost::new(Address::from_label("farm"), Default::default());
        ledger.credit_native(&Address::from_label("dispatcher"), 9);

        store.save_state(&snapshot, &ledger, 17).unwrap();

        assert_eq!(store.load_dispatcher().unwrap(), Some(snapshot));
        assert_eq!(store.load_slot().unwrap(), Some(17));
        let restored = store.load_ledger().unwrap().unwrap();
        assert_eq!(
            farm_dispatcher::NativeBank::native_balance(&restored, &Address::from_label("dispatcher")),
            9
        );
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path()).unwrap();
        assert!(RelayProcessor::load_from_disk(&store).unwrap().is_none());
    }
}
