//! Dispatcher Errors

use relay_types::{Address, ChainId, CodecError, Nonce, PoolId};
use thiserror::Error;

/// Error raised by a host collaborator (farm, token, bank, relay)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Dispatcher and delegate errors
///
/// Every variant is fatal for the message or call that raised it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Untrusted source: chain {source_chain}, sender {sender}")]
    UntrustedSource { source_chain: ChainId, sender: Address },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("First interaction must be deposit")]
    FirstInteractionMustBeDeposit,

    #[error("Nonce {nonce} already consumed for pool {pool}")]
    NonceAlreadyConsumed { pool: PoolId, nonce: Nonce },

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient stake in pool {pool}: staked {staked}, requested {requested}")]
    InsufficientStake { pool: PoolId, staked: u64, requested: u64 },

    #[error("Nothing staked in pool {pool}")]
    NothingStaked { pool: PoolId },

    #[error("Reentrant call rejected")]
    Reentrancy,

    #[error("Unauthorized caller {0}")]
    Unauthorized(Address),

    #[error("Delegate already exists for user {0}")]
    DelegateExists(Address),

    #[error("No delegate for user {0}")]
    DelegateNotFound(Address),

    #[error("Delegate address {0} already bound to another user")]
    DelegateAddressCollision(Address),

    #[error("Insufficient reserve: required {required}, available {available}")]
    InsufficientReserve { required: u64, available: u64 },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Invalid instruction data")]
    InvalidInstructionData,

    #[error("Stale call sequence {sequence} from {signer}, last accepted {last}")]
    StaleSequence {
        signer: Address,
        sequence: u64,
        last: u64,
    },

    #[error("Host error: {0}")]
    Host(String),
}

impl DispatchError {
    /// Stable numeric code reported to the relay and RPC clients
    pub fn code(&self) -> u32 {
        match self {
            DispatchError::UntrustedSource { .. } => 1,
            DispatchError::InvalidPayload(_) => 2,
            DispatchError::FirstInteractionMustBeDeposit => 3,
            DispatchError::NonceAlreadyConsumed { .. } => 4,
            DispatchError::ZeroAmount => 5,
            DispatchError::InsufficientStake { .. } => 6,
            DispatchError::NothingStaked { .. } => 7,
            DispatchError::Reentrancy => 8,
            DispatchError::Unauthorized(_) => 9,
            DispatchError::DelegateExists(_) => 10,
            DispatchError::DelegateNotFound(_) => 11,
            DispatchError::DelegateAddressCollision(_) => 12,
            DispatchError::InsufficientReserve { .. } => 13,
            DispatchError::ArithmeticOverflow => 14,
            DispatchError::InvalidInstructionData => 15,
            DispatchError::Host(_) => 16,
            DispatchError::StaleSequence { .. } => 17,
        }
    }
}

impl From<HostError> for DispatchError {
    fn from(e: HostError) -> Self {
        DispatchError::Host(e.0)
    }
}

impl From<CodecError> for DispatchError {
    fn from(e: CodecError) -> Self {
        DispatchError::InvalidPayload(e.to_string())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
