//! Relay Bridge - edges between the runtime and the message relay
//!
//! Handles both directions of relay traffic:
//! - Accepting inbound message envelopes and queueing them for the runtime
//! - Forwarding committed acknowledgments to the relay transport

pub mod forwarder;
pub mod inbound;
pub mod transport;

pub use forwarder::AckForwarder;
pub use inbound::InboundRelay;
pub use transport::{BridgeError, LoggingTransport, RelayTransport};
