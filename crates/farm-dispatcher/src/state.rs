//! Dispatcher State
//!
//! Ledger structures owned by the dispatcher and its delegates.

use relay_types::{Address, ChainId, Nonce, PoolId, Provenance};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{DispatchError, DispatchResult};

/// Static dispatcher configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Dispatcher's own address (holds the native reserve, mints, calls delegates)
    pub address: Address,
    /// Administrative authority
    pub owner: Address,
    /// Authority allowed to run fallback operations
    pub operator: Address,
    /// The single source chain/sender pair messages are accepted from
    pub trusted_source: Provenance,
    /// Chain this dispatcher runs on
    pub destination_chain: ChainId,
    /// One-time welcome incentive paid in native currency
    pub incentive_amount: u64,
}

/// Per-delegate stake records and nonce ledger
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DelegateState {
    /// Accumulated stake per pool, in representation-token units
    stakes: HashMap<PoolId, u64>,
    /// Consumed nonces per pool. Insertion-only.
    consumed: HashMap<PoolId, HashSet<Nonce>>,
}

impl DelegateState {
    /// Stake record for `pool` (zero when never deposited)
    pub fn stake(&self, pool: PoolId) -> u64 {
        self.stakes.get(&pool).copied().unwrap_or(0)
    }

    pub fn set_stake(&mut self, pool: PoolId, amount: u64) {
        if amount == 0 {
            self.stakes.remove(&pool);
        } else {
            self.stakes.insert(pool, amount);
        }
    }

    /// Pools with a non-zero stake record
    pub fn pools(&self) -> impl Iterator<Item = (PoolId, u64)> + '_ {
        self.stakes.iter().map(|(pool, amount)| (*pool, *amount))
    }

    pub fn is_consumed(&self, pool: PoolId, nonce: Nonce) -> bool {
        self.consumed
            .get(&pool)
            .map(|set| set.contains(&nonce))
            .unwrap_or(false)
    }

    /// Reject `nonce` if it was already consumed for `pool`
    pub fn ensure_unused(&self, pool: PoolId, nonce: Nonce) -> DispatchResult<()> {
        if self.is_consumed(pool, nonce) {
            return Err(DispatchError::NonceAlreadyConsumed { pool, nonce });
        }
        Ok(())
    }

    /// Mark `nonce` consumed for `pool`
    pub fn consume(&mut self, pool: PoolId, nonce: Nonce) -> DispatchResult<()> {
        if !self.consumed.entry(pool).or_default().insert(nonce) {
            return Err(DispatchError::NonceAlreadyConsumed { pool, nonce });
        }
        Ok(())
    }

    /// Number of consumed nonces for `pool`
    pub fn consumed_count(&self, pool: PoolId) -> usize {
        self.consumed.get(&pool).map(HashSet::len).unwrap_or(0)
    }

    /// Check a withdrawal of `amount` against the stake record and return the remainder
    pub fn remaining_after(&self, pool: PoolId, amount: u64) -> DispatchResult<u64> {
        if amount == 0 {
            return Err(DispatchError::ZeroAmount);
        }
        let staked = self.stake(pool);
        staked
            .checked_sub(amount)
            .ok_or(DispatchError::InsufficientStake {
                pool,
                staked,
                requested: amount,
            })
    }
}

/// Serializable image of one delegate
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DelegateSnapshot {
    pub user: Address,
    pub address: Address,
    pub state: DelegateState,
}

/// Serializable image of the whole dispatcher
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DispatcherSnapshot {
    pub config: DispatcherConfig,
    pub next_delegate_index: u64,
    pub delegates: Vec<DelegateSnapshot>,
    pub incentive_paid: Vec<Address>,
    /// Last accepted operator call sequence per signer
    pub call_sequences: Vec<(Address, u64)>,
}
