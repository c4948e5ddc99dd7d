//! Shared types for source/destination integration
//!
//! These types travel over the message relay and are shared by the
//! dispatcher core, the runtime and the RPC surface. Payloads are
//! borsh-encoded so both chains agree on a single byte layout.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Farm pool identifier. Opaque, meaningful only to the farm.
pub type PoolId = u64;

/// Per-(delegate, pool) message nonce supplied by the source side.
pub type Nonce = u64;

/// Handle of a token known to the destination host.
pub type TokenId = u64;

/// Domain tag mixed into allocated delegate addresses
pub const DELEGATE_ADDRESS_TAG: &[u8; 8] = b"delegate";

/// Opaque 32-byte account identifier (users, delegates, contracts, operators)
///
/// Serializes as a base58 string in human-readable formats (JSON config, RPC)
/// and as raw bytes otherwise.
#[derive(
    BorshSerialize,
    BorshDeserialize,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Address of the `index`-th delegate allocated on `chain`
    pub fn derive_delegate(chain: ChainId, index: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(DELEGATE_ADDRESS_TAG);
        bytes[8..16].copy_from_slice(&chain.0.to_le_bytes());
        bytes[16..24].copy_from_slice(&index.to_le_bytes());
        Self(bytes)
    }

    /// Build an address from a short label (tests and fixtures)
    pub fn from_label(label: &str) -> Self {
        let mut bytes = [0u8; 32];
        let src = label.as_bytes();
        let len = src.len().min(32);
        bytes[..len].copy_from_slice(&src[..len]);
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| CodecError::InvalidAddress(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidAddress(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            Serialize::serialize(&self.0, serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = <String as Deserialize>::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; 32] as Deserialize>::deserialize(deserializer).map(Self)
        }
    }
}

/// Chain identifier as used by the message relay
#[derive(
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Intent carried by a relay message
#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
)]
pub enum Operation {
    Deposit,
    Withdraw,
    EmergencyWithdraw,
}

impl Operation {
    /// Operations that must be acknowledged back to the source chain
    pub fn requires_acknowledgment(&self) -> bool {
        matches!(self, Operation::Withdraw | Operation::EmergencyWithdraw)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::EmergencyWithdraw => "emergency_withdraw",
        };
        f.write_str(name)
    }
}

/// Decoded relay payload (matches the source-side sender layout)
#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
pub struct Payload {
    pub operation: Operation,
    pub user: Address,
    pub pool: PoolId,
    pub amount: u64,
    pub nonce: Nonce,
}

impl Payload {
    /// Encode to the relay byte layout
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Payload serialization into a Vec should not fail")
    }

    /// Decode from the relay byte layout. Trailing bytes are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Payload::try_from_slice(bytes).map_err(|e| CodecError::InvalidPayload(e.to_string()))
    }
}

/// Claimed origin of an inbound message, as reported by the relay
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub source_chain: ChainId,
    pub sender: Address,
}

/// Envelope delivered by the relay to the destination dispatcher
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Contract on the source chain that sent the message
    pub sender: Address,
    /// Chain the message originates from
    pub source_chain: ChainId,
    /// Encoded [`Payload`]
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(source_chain: ChainId, sender: Address, payload: &Payload) -> Self {
        Self {
            sender,
            source_chain,
            payload: payload.encode(),
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            source_chain: self.source_chain,
            sender: self.sender,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("InboundMessage serialization into a Vec should not fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        InboundMessage::try_from_slice(bytes)
            .map_err(|e| CodecError::InvalidEnvelope(e.to_string()))
    }
}

/// Outbound message confirming a withdrawal-class operation on the destination
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Chain the original message came from
    pub dest_chain: ChainId,
    /// Source-side contract that sent the original message
    pub dest_address: Address,
    /// Original payload, re-emitted unchanged
    pub payload: Vec<u8>,
    /// Relay fee paid from the dispatcher reserve
    pub fee: u64,
}

/// Identifies one relay message for receipts and operator lookups
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub source_chain: ChainId,
    pub sender: Address,
    pub user: Address,
    pub pool: PoolId,
    pub nonce: Nonce,
}

/// Wire decoding errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
