//! RPC Server - JSON-RPC over HTTP for the relay node
//!
//! Provides the node's external interface:
//! - submitMessage: relay envelopes into the work queue
//! - operatorCall: signed, sequenced operator and owner instructions
//! - getDelegate, getStake, getReceipt, getReserve, getCallSequence: state queries
//! - getSlot, getHealth, getVersion

pub mod http_server;
pub mod methods;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};

/// RPC Server configuration
#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    /// HTTP RPC bind address
    pub http_addr: String,
    /// How long operatorCall waits for its block
    pub operator_timeout_ms: u64,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8899".to_string(),
            operator_timeout_ms: 10_000,
        }
    }
}
