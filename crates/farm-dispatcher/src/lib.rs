//! Farm Dispatcher - destination side of the cross-chain farm relay
//!
//! Executes relay intents (deposit, withdraw, emergency withdraw) exactly
//! once per (delegate, pool, nonce), staking through a lazily created
//! per-user delegate, and exposes the operator fallback protocol that
//! reconciles partially completed round trips.
//!
//! Components:
//! - Dispatcher: authentication, routing, acknowledgments, welcome incentive
//! - Delegate: per-user stake records and nonce ledger
//! - DelegateRegistry: user <-> delegate mapping
//! - Host traits: farm, tokens, native bank, relay, events

pub mod delegate;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod host;
pub mod instruction;
pub mod processor;
pub mod registry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use delegate::Delegate;
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult, HostError};
pub use events::Event;
pub use host::{EventSink, Farm, Host, HostResult, NativeBank, Relay, RepresentationToken, RewardToken};
pub use instruction::{OperatorCall, OperatorInstruction};
pub use registry::DelegateRegistry;
pub use state::{DelegateSnapshot, DelegateState, DispatcherConfig, DispatcherSnapshot};
