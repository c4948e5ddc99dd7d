//! Relay Message Processor
//!
//! Wraps the [`Dispatcher`] and its [`LedgerHost`] so every relay message and
//! operator call either commits completely or leaves no trace.

use crate::{
    ledger::LedgerHost,
    receipts::{Receipt, ReceiptStatus, ReceiptStore},
};
use farm_dispatcher::{
    processor as operator_processor, DispatchError, DispatchResult, Dispatcher, DispatcherConfig,
    Event,
};
use relay_types::{Acknowledgment, Address, InboundMessage, MessageKey, Operation, Payload};

/// Result of processing a single relay message
#[derive(Debug, Clone)]
pub struct MessageResult {
    /// None when the payload could not be decoded
    pub key: Option<MessageKey>,
    pub operation: Option<Operation>,
    pub slot: u64,
    pub success: bool,
    pub error: Option<DispatchError>,
    pub events: Vec<Event>,
    pub acknowledgment: Option<Acknowledgment>,
}

/// Result of processing a single operator instruction
#[derive(Debug, Clone)]
pub struct OperatorResult {
    pub caller: Address,
    pub slot: u64,
    pub success: bool,
    pub error: Option<DispatchError>,
    pub events: Vec<Event>,
}

/// Relay Processor
///
/// Owns the dispatcher and ledger. Each unit of work runs inside a ledger
/// journal that is rolled back on failure, so partially applied host effects
/// (a mint before a failing stake, a queued acknowledgment before a failing
/// transfer) are discarded. The dispatcher restores its own ledger entries.
pub struct RelayProcessor {
    dispatcher: Dispatcher,
    host: LedgerHost,
    receipts: ReceiptStore,
    current_slot: u64,
}

impl RelayProcessor {
    pub fn new(config: DispatcherConfig, host: LedgerHost, receipts: ReceiptStore) -> Self {
        tracing::info!(
            "Relay processor initialized (dispatcher {}, trusted source {} on chain {})",
            config.address,
            config.trusted_source.sender,
            config.trusted_source.source_chain
        );
        Self {
            dispatcher: Dispatcher::new(config),
            host,
            receipts,
            current_slot: 0,
        }
    }

    /// Rebuild a processor from restored parts
    pub fn from_parts(
        dispatcher: Dispatcher,
        host: LedgerHost,
        receipts: ReceiptStore,
        slot: u64,
    ) -> Self {
        Self {
            dispatcher,
            host,
            receipts,
            current_slot: slot,
        }
    }

    /// Process a batch of relay messages in order
    pub fn process_messages(&mut self, messages: &[InboundMessage]) -> Vec<MessageResult> {
        messages.iter().map(|m| self.process_message(m)).collect()
    }

    pub fn process_message(&mut self, message: &InboundMessage) -> MessageResult {
        let decoded = Payload::decode(&message.payload).ok();
        let key = decoded.as_ref().map(|p| MessageKey {
            source_chain: message.source_chain,
            sender: message.sender,
            user: p.user,
            pool: p.pool,
            nonce: p.nonce,
        });
        let operation = decoded.as_ref().map(|p| p.operation);

        let (result, events) = self.atomically(|dispatcher, host| dispatcher.receive(host, message));

        let (success, error, acknowledgment) = match result {
            Ok(ack) => (true, None, ack),
            Err(e) => {
                tracing::debug!("Message from {} rejected: {}", message.sender, e);
                (false, Some(e), None)
            }
        };

        if let (Some(key), Some(operation)) = (key, operation) {
            self.receipts.record(
                key,
                Receipt {
                    slot: self.current_slot,
                    operation,
                    status: if success {
                        ReceiptStatus::Executed
                    } else {
                        ReceiptStatus::Rejected
                    },
                    error: error.as_ref().map(|e| e.to_string()),
                    error_code: error.as_ref().map(|e| e.code()),
                    deliveries: 0,
                },
            );
        }

        MessageResult {
            key,
            operation,
            slot: self.current_slot,
            success,
            error,
            events,
            acknowledgment,
        }
    }

    /// Process a borsh-encoded operator instruction on behalf of `caller`
    pub fn process_operator(&mut self, caller: &Address, instruction_data: &[u8]) -> OperatorResult {
        let (result, events) = self.atomically(|dispatcher, host| {
            operator_processor::process(dispatcher, host, caller, instruction_data)
        });
        if let Err(e) = &result {
            tracing::warn!("Operator instruction from {} failed: {}", caller, e);
        }
        OperatorResult {
            caller: *caller,
            slot: self.current_slot,
            success: result.is_ok(),
            error: result.err(),
            events,
        }
    }

    fn atomically<T>(
        &mut self,
        op: impl FnOnce(&mut Dispatcher, &mut LedgerHost) -> DispatchResult<T>,
    ) -> (DispatchResult<T>, Vec<Event>) {
        self.host.begin();
        match op(&mut self.dispatcher, &mut self.host) {
            Ok(value) => {
                self.host.commit();
                (Ok(value), self.host.drain_events())
            }
            Err(e) => {
                self.host.rollback();
                (Err(e), Vec::new())
            }
        }
    }

    /// Advance to the next slot
    pub fn advance_slot(&mut self) {
        self.current_slot += 1;
        self.host.advance_slot();
        tracing::trace!("Advanced to slot {}", self.current_slot);
    }

    pub fn current_slot(&self) -> u64 {
        self.current_slot
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn host(&self) -> &LedgerHost {
        &self.host
    }

    /// Direct ledger access for genesis setup (pool registration, reserve funding)
    pub fn host_mut(&mut self) -> &mut LedgerHost {
        &mut self.host
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    /// Acknowledgments committed since the last drain
    pub fn drain_outbox(&mut self) -> Vec<Acknowledgment> {
        self.host.drain_outbox()
    }
}
