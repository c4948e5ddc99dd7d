//! Events emitted by the dispatcher and its delegates.
//! Indexers and operators consume these to detect stuck messages.

use relay_types::{Address, ChainId, Nonce, Operation, PoolId};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MessageReceived {
        sender: Address,
        source_chain: ChainId,
        nonce: Nonce,
        operation: Operation,
        user: Address,
        pool: PoolId,
        amount: u64,
    },
    DelegateCreated {
        user: Address,
        delegate: Address,
    },
    Deposited {
        delegate: Address,
        user: Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
        reward: u64,
    },
    Withdrawn {
        delegate: Address,
        user: Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
        reward: u64,
    },
    EmergencyWithdrawn {
        delegate: Address,
        user: Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
    },
    Harvested {
        delegate: Address,
        user: Address,
        pool: PoolId,
        reward: u64,
    },
    FallbackDeposited {
        delegate: Address,
        user: Address,
        pool: PoolId,
        nonce: Nonce,
    },
    FallbackWithdrawn {
        delegate: Address,
        user: Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
        reward: u64,
    },
    IncentivePaid {
        user: Address,
        amount: u64,
    },
    AcknowledgmentSent {
        dest_chain: ChainId,
        dest_address: Address,
        user: Address,
        pool: PoolId,
        nonce: Nonce,
        fee: u64,
    },
    OperatorChanged {
        previous: Address,
        current: Address,
    },
    OwnershipTransferred {
        previous: Address,
        current: Address,
    },
    IncentiveAmountChanged {
        previous: u64,
        current: u64,
    },
    ReserveWithdrawn {
        to: Address,
        amount: u64,
    },
}
