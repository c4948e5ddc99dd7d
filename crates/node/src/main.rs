//! Farm Relay Node
//!
//! Main entry point for the destination side of the cross-chain farm relay.
//! Applies relay messages and operator instructions in fixed-interval
//! blocks, hands acknowledgments to the relay and serves JSON-RPC.
//! State is persisted to disk and survives restarts.

use anyhow::Result;
use clap::Parser;
use dispatch_runtime::{
    BlockProducer, BlockProducerConfig, LedgerHost, PersistentStore, ProcessorPersistence,
    ReceiptStore, RelayProcessor,
};
use relay_bridge::{AckForwarder, InboundRelay, LoggingTransport};
use rpc_server::{HttpRpcServer, RpcContext, RpcServerConfig};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Cross-chain farm relay node
#[derive(Parser, Debug)]
#[command(name = "xfarm-node")]
#[command(about = "Destination-side dispatcher for the cross-chain farm relay", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP RPC bind address
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Block time in milliseconds
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Data directory for persistent state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Save state every N slots (0 = only on shutdown)
    #[arg(long)]
    save_interval: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(addr) = &self.rpc_addr {
            config.rpc_addr = addr.clone();
        }
        if let Some(ms) = self.block_time_ms {
            config.block_time_ms = ms;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(interval) = self.save_interval {
            config.save_interval = interval;
        }
        Ok(config)
    }
}

/// Build the processor from the genesis section of the config
/// Whether `slot` crossed a save boundary since the slot saved last
fn save_due(interval: u64, last_saved: u64, slot: u64) -> bool {
    interval > 0 && slot > 0 && slot / interval > last_saved / interval
}

fn genesis_processor(config: &NodeConfig) -> RelayProcessor {
    let mut host = LedgerHost::new(config.farm.address, config.relay);
    for pool in &config.farm.pools {
        host.register_pool(pool.pool, pool.token, pool.reward_per_slot);
    }
    host.credit_native(&config.dispatcher.address, config.dispatcher.initial_reserve);
    RelayProcessor::new(config.dispatcher_config(), host, ReceiptStore::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.node_config()?;
    run(config, args.verbose).await
}

async fn run(config: NodeConfig, verbose: bool) -> Result<()> {
    tracing::info!("Starting farm relay node");
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  Block time: {}ms", config.block_time_ms);
    tracing::info!("  Data directory: {:?}", config.data_dir);
    tracing::info!("  Save interval: {} slots", config.save_interval);

    std::fs::create_dir_all(&config.data_dir)?;
    let persistent_store = Arc::new(PersistentStore::open(&config.data_dir)?);

    let processor = match RelayProcessor::load_from_disk(&persistent_store)? {
        Some(processor) => {
            if processor.dispatcher().config().address != config.dispatcher.address {
                tracing::warn!(
                    "Saved dispatcher {} differs from configured {}; using saved state",
                    processor.dispatcher().config().address,
                    config.dispatcher.address
                );
            }
            processor
        }
        None => {
            tracing::info!("No existing state found, starting from genesis");
            genesis_processor(&config)
        }
    };

    let block_producer = BlockProducer::new(
        processor,
        BlockProducerConfig {
            block_time_ms: config.block_time_ms,
            verbose,
            ..Default::default()
        },
    );
    let processor = block_producer.processor();
    let running = block_producer.running_flag();
    let work_sender = block_producer.work_sender();

    // Acknowledgment hand-off
    let forwarder = Arc::new(AckForwarder::new(Arc::new(LoggingTransport)));
    let acknowledgments = block_producer
        .acknowledgments()
        .ok_or_else(|| anyhow::anyhow!("acknowledgment stream already taken"))?;
    let forwarder_handle = tokio::spawn(forwarder.clone().run(acknowledgments));

    // Periodic save to disk
    let mut block_updates = block_producer.subscribe();
    let save_store = persistent_store.clone();
    let save_processor = processor.clone();
    let save_interval = config.save_interval;
    let save_handle = tokio::spawn(async move {
        let mut last_saved = 0;
        loop {
            let slot = match block_updates.recv().await {
                Ok(update) => update.slot,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Save task lagged {} block updates", skipped);
                    save_processor.read().current_slot()
                }
                Err(RecvError::Closed) => break,
            };
            if save_due(save_interval, last_saved, slot) {
                match save_processor.read().save_to_disk(&save_store) {
                    Ok(_) => last_saved = slot,
                    Err(e) => tracing::error!("Failed to save state: {}", e),
                }
            }
        }
    });

    // Start HTTP RPC server
    let rpc_config = RpcServerConfig {
        http_addr: config.rpc_addr.clone(),
        ..Default::default()
    };
    let rpc_context = Arc::new(RpcContext {
        processor: processor.clone(),
        inbound: Arc::new(InboundRelay::new(work_sender.clone())),
        work_sender,
        operator_timeout: Duration::from_millis(rpc_config.operator_timeout_ms),
    });
    let http_server = tokio::spawn(async move {
        let server = HttpRpcServer::new(rpc_context);
        if let Err(e) = server.run(&rpc_config.http_addr).await {
            tracing::error!("HTTP RPC server error: {}", e);
        }
    });

    let producer_handle = tokio::spawn(block_producer.run_async());

    tracing::info!("Relay node running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    running.store(false, std::sync::atomic::Ordering::SeqCst);
    if let Err(e) = producer_handle.await {
        tracing::error!("Block producer task failed: {}", e);
    }

    // Save state before shutdown
    let final_slot = processor.read().current_slot();
    tracing::info!("Saving final state at slot {}...", final_slot);
    if let Err(e) = processor.read().save_to_disk(&persistent_store) {
        tracing::error!("Failed to save final state: {}", e);
    }

    http_server.abort();
    save_handle.abort();
    // the producer is gone, so the forwarder drains what is buffered and exits
    if let Err(e) = forwarder_handle.await {
        tracing::error!("Acknowledgment forwarder task failed: {}", e);
    }
    tracing::info!(
        "Node stopped ({} acknowledgments delivered, {} failed)",
        forwarder.delivered_count(),
        forwarder.failed_count()
    );

    Ok(())
}
