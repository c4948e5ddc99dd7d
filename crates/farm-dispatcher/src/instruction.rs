//! Operator Instructions

use borsh::{BorshDeserialize, BorshSerialize};
use relay_types::{Address, Nonce, PoolId};

/// Instructions submitted outside the relay path (operator, owner, anyone for harvest)
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum OperatorInstruction {
    /// Consume a deposit nonce whose destination execution never happened
    ///
    /// Caller: operator
    FallbackDeposit {
        user: Address,
        pool: PoolId,
        nonce: Nonce,
    },

    /// Finalize a withdrawal whose acknowledgment never completed
    ///
    /// Caller: operator
    FallbackWithdraw {
        user: Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
    },

    /// Claim pending reward for a user's delegate
    ///
    /// Caller: anyone
    Harvest { user: Address, pool: PoolId },

    /// Caller: owner
    SetOperator { operator: Address },

    /// Caller: owner
    TransferOwnership { owner: Address },

    /// Caller: owner
    SetIncentiveAmount { amount: u64 },

    /// Move native funds out of the dispatcher reserve
    ///
    /// Caller: owner
    WithdrawReserve { to: Address, amount: u64 },
}

/// Signed envelope around an [`OperatorInstruction`]
///
/// `sequence` must exceed the last sequence accepted from the same signer,
/// so a captured call cannot be executed twice.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct OperatorCall {
    pub sequence: u64,
    pub instruction: OperatorInstruction,
}

impl OperatorCall {
    pub fn new(sequence: u64, instruction: OperatorInstruction) -> Self {
        Self {
            sequence,
            instruction,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("OperatorCall serialization into a Vec should not fail")
    }
}

impl OperatorInstruction {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("OperatorInstruction serialization into a Vec should not fail")
    }
}
