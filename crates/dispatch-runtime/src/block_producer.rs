//! Block Producer - relay work loop
//!
//! Drains queued relay messages and operator instructions at a fixed block
//! interval, applies them in arrival order, and broadcasts one update per
//! block. Committed acknowledgments additionally go out on an unbounded
//! channel, so a slow consumer delays them but never loses them.

use crate::{
    processor::{MessageResult, OperatorResult, RelayProcessor},
    BLOCK_TIME_MS, MAX_ITEMS_PER_BLOCK,
};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use relay_types::{Acknowledgment, Address, InboundMessage};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{
    broadcast,
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    oneshot,
};

/// Queued unit of work
#[derive(Debug)]
pub enum WorkItem {
    Message(InboundMessage),
    Operator {
        caller: Address,
        data: Vec<u8>,
        reply: Option<oneshot::Sender<OperatorResult>>,
    },
}

/// Block update event sent to subscribers
#[derive(Clone, Debug)]
pub struct BlockUpdate {
    /// Slot the work was applied in
    pub slot: u64,
    pub message_results: Vec<MessageResult>,
    pub operator_results: Vec<OperatorResult>,
    /// Acknowledgments committed in this block, ready for the relay transport
    pub acknowledgments: Vec<Acknowledgment>,
    /// Block production time in microseconds
    pub processing_time_us: u64,
}

impl BlockUpdate {
    pub fn item_count(&self) -> usize {
        self.message_results.len() + self.operator_results.len()
    }
}

#[derive(Clone, Debug)]
pub struct BlockProducerConfig {
    pub block_time_ms: u64,
    pub max_items_per_block: usize,
    /// Work queue capacity
    pub queue_capacity: usize,
    pub verbose: bool,
}

impl Default for BlockProducerConfig {
    fn default() -> Self {
        Self {
            block_time_ms: BLOCK_TIME_MS,
            max_items_per_block: MAX_ITEMS_PER_BLOCK,
            queue_capacity: 1024,
            verbose: false,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Work queue is full")]
    QueueFull,

    #[error("Block producer is not running")]
    Disconnected,
}

/// Handle for submitting work to the block producer
#[derive(Clone)]
pub struct WorkSender {
    sender: Sender<WorkItem>,
}

impl WorkSender {
    /// Queue a relay message
    pub fn submit_message(&self, message: InboundMessage) -> Result<(), SubmitError> {
        self.send(WorkItem::Message(message))
    }

    /// Queue an operator instruction; the receiver resolves once its block runs
    pub fn submit_operator(
        &self,
        caller: Address,
        data: Vec<u8>,
    ) -> Result<oneshot::Receiver<OperatorResult>, SubmitError> {
        let (reply, receiver) = oneshot::channel();
        self.send(WorkItem::Operator {
            caller,
            data,
            reply: Some(reply),
        })?;
        Ok(receiver)
    }

    fn send(&self, item: WorkItem) -> Result<(), SubmitError> {
        self.sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Disconnected(_) => SubmitError::Disconnected,
        })
    }
}

/// Block Producer
///
/// Shares the processor behind a lock so RPC readers observe committed
/// state between blocks.
pub struct BlockProducer {
    processor: Arc<RwLock<RelayProcessor>>,
    work_receiver: Receiver<WorkItem>,
    work_sender: Sender<WorkItem>,
    update_sender: broadcast::Sender<BlockUpdate>,
    ack_sender: UnboundedSender<Acknowledgment>,
    ack_receiver: Mutex<Option<UnboundedReceiver<Acknowledgment>>>,
    config: BlockProducerConfig,
    running: Arc<AtomicBool>,
}

impl BlockProducer {
    pub fn new(processor: RelayProcessor, config: BlockProducerConfig) -> Self {
        let (work_sender, work_receiver) = bounded(config.queue_capacity);
        let (update_sender, _) = broadcast::channel(64);
        let (ack_sender, ack_receiver) = unbounded_channel();

        Self {
            processor: Arc::new(RwLock::new(processor)),
            work_receiver,
            work_sender,
            update_sender,
            ack_sender,
            ack_receiver: Mutex::new(Some(ack_receiver)),
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn work_sender(&self) -> WorkSender {
        WorkSender {
            sender: self.work_sender.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlockUpdate> {
        self.update_sender.subscribe()
    }

    /// Lossless stream of committed acknowledgments. Only the first call
    /// gets the receiver.
    pub fn acknowledgments(&self) -> Option<UnboundedReceiver<Acknowledgment>> {
        self.ack_receiver.lock().take()
    }

    /// Shared handle to the processor for readers
    pub fn processor(&self) -> Arc<RwLock<RelayProcessor>> {
        self.processor.clone()
    }

    /// Flag that stops the loop when cleared
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn current_slot(&self) -> u64 {
        self.processor.read().current_slot()
    }

    /// Apply up to one block of queued work, advance the slot and broadcast
    /// the update
    pub fn produce_block(&self) -> BlockUpdate {
        let start = Instant::now();
        let items: Vec<WorkItem> = self
            .work_receiver
            .try_iter()
            .take(self.config.max_items_per_block)
            .collect();

        let mut message_results = Vec::new();
        let mut operator_results = Vec::new();

        let mut processor = self.processor.write();
        let slot = processor.current_slot();

        for item in items {
            match item {
                WorkItem::Message(message) => {
                    message_results.push(processor.process_message(&message));
                }
                WorkItem::Operator {
                    caller,
                    data,
                    reply,
                } => {
                    let result = processor.process_operator(&caller, &data);
                    if let Some(reply) = reply {
                        // caller may have stopped waiting
                        let _ = reply.send(result.clone());
                    }
                    operator_results.push(result);
                }
            }
        }

        let acknowledgments = processor.drain_outbox();
        processor.advance_slot();
        drop(processor);

        let processing_time = start.elapsed();
        let update = BlockUpdate {
            slot,
            message_results,
            operator_results,
            acknowledgments,
            processing_time_us: processing_time.as_micros() as u64,
        };

        if update.item_count() > 0 || self.config.verbose {
            tracing::debug!(
                "Slot {} | {} items | {} acks | {:.2}ms",
                slot,
                update.item_count(),
                update.acknowledgments.len(),
                processing_time.as_secs_f64() * 1000.0
            );
        }

        if processing_time > Duration::from_millis(self.config.block_time_ms) {
            tracing::warn!(
                "Block {} took {:.2}ms (target: {}ms)",
                slot,
                processing_time.as_secs_f64() * 1000.0,
                self.config.block_time_ms
            );
        }

        for ack in &update.acknowledgments {
            if self.ack_sender.send(ack.clone()).is_err() {
                tracing::error!(
                    "Acknowledgment consumer gone; undelivered acknowledgment to {} on chain {} (fee {}, payload {:?})",
                    ack.dest_address,
                    ack.dest_chain,
                    ack.fee,
                    ack.payload
                );
            }
        }

        // no subscribers is fine
        let _ = self.update_sender.send(update.clone());
        update
    }

    /// Run the block producer asynchronously (tokio)
    pub async fn run_async(self) {
        self.running.store(true, Ordering::SeqCst);

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.block_time_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Block producer started ({}ms blocks, up to {} items per block)",
            self.config.block_time_ms,
            self.config.max_items_per_block
        );

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            self.produce_block();
        }

        tracing::info!("Block producer stopped at slot {}", self.current_slot());
    }
}
