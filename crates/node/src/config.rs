//! Node Configuration

use dispatch_runtime::RelayFees;
use farm_dispatcher::DispatcherConfig;
use relay_types::{Address, ChainId, PoolId, Provenance, TokenId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP RPC bind address
    pub rpc_addr: String,
    /// Block time in milliseconds
    pub block_time_ms: u64,
    /// Data directory for persistent state
    pub data_dir: PathBuf,
    /// Save state every N slots (0 = only on shutdown)
    pub save_interval: u64,
    pub dispatcher: DispatcherSettings,
    pub relay: RelayFees,
    pub farm: FarmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub address: Address,
    pub owner: Address,
    pub operator: Address,
    pub trusted_source_chain: u64,
    pub trusted_sender: Address,
    pub destination_chain: u64,
    pub incentive_amount: u64,
    /// Native reserve credited at genesis
    pub initial_reserve: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmSettings {
    pub address: Address,
    pub pools: Vec<PoolSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub pool: PoolId,
    pub token: TokenId,
    #[serde(default)]
    pub reward_per_slot: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:8899".to_string(),
            block_time_ms: dispatch_runtime::BLOCK_TIME_MS,
            data_dir: PathBuf::from("./data"),
            save_interval: 300,
            dispatcher: DispatcherSettings::default(),
            relay: RelayFees::default(),
            farm: FarmSettings::default(),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            address: Address::from_label("dispatcher"),
            owner: Address::from_label("owner"),
            operator: Address::from_label("operator"),
            trusted_source_chain: 1,
            trusted_sender: Address::from_label("source-controller"),
            destination_chain: 2,
            incentive_amount: 0,
            initial_reserve: 0,
        }
    }
}

impl Default for FarmSettings {
    fn default() -> Self {
        Self {
            address: Address::from_label("farm"),
            pools: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid config {:?}: {}", path, e))?;
        Ok(config)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let settings = &self.dispatcher;
        DispatcherConfig {
            address: settings.address,
            owner: settings.owner,
            operator: settings.operator,
            trusted_source: Provenance {
                source_chain: ChainId(settings.trusted_source_chain),
                sender: settings.trusted_sender,
            },
            destination_chain: ChainId(settings.destination_chain),
            incentive_amount: settings.incentive_amount,
        }
    }
}
