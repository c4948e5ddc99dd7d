//! In-memory host ledger
//!
//! Implements every collaborator the dispatcher talks to: representation
//! tokens with allowances, a reward-accruing farm, reward and native
//! balances, and the outbound relay queue.
//!
//! Between [`LedgerHost::begin`] and [`LedgerHost::commit`] every write
//! records the entry's prior value, so [`LedgerHost::rollback`] undoes a
//! failed message in time proportional to what it touched.

use farm_dispatcher::{
    Event, EventSink, Farm, HostError, HostResult, NativeBank, Relay, RepresentationToken,
    RewardToken,
};
use relay_types::{Acknowledgment, Address, ChainId, PoolId, TokenId};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

/// Fixed-point precision for accumulated reward per staked unit
pub const REWARD_PRECISION: u128 = 1_000_000_000_000;

/// Farm pool accounting
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FarmPool {
    /// Token staked in this pool
    pub token: TokenId,
    /// Reward distributed per slot across all stakers
    pub reward_per_slot: u64,
    pub total_staked: u64,
    pub acc_reward_per_share: u128,
    pub last_reward_slot: u64,
}

/// One staker's position in a pool
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub amount: u64,
    pub reward_debt: u128,
}

/// Relay pricing
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RelayFees {
    pub base_fee: u64,
    pub fee_per_byte: u64,
}

/// Prior value of one ledger entry
#[derive(Clone, Debug)]
enum Undo {
    Pool(PoolId, Option<FarmPool>),
    Position((Address, PoolId), Option<Position>),
    Balance((TokenId, Address), Option<u64>),
    Supply(TokenId, Option<u64>),
    Allowance((TokenId, Address, Address), Option<u64>),
    Reward(Address, Option<u64>),
    Native(Address, Option<u64>),
}

#[derive(Clone, Debug, Default)]
struct Journal {
    undo: Vec<Undo>,
    relay_fees_collected: u64,
    outbox_len: usize,
    events_len: usize,
}

/// Destination-chain ledger backing the dispatcher host traits
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LedgerHost {
    farm_address: Address,
    relay_fees: RelayFees,
    slot: u64,
    pools: BTreeMap<PoolId, FarmPool>,
    positions: HashMap<(Address, PoolId), Position>,
    balances: HashMap<(TokenId, Address), u64>,
    supply: HashMap<TokenId, u64>,
    allowances: HashMap<(TokenId, Address, Address), u64>,
    rewards: HashMap<Address, u64>,
    native: HashMap<Address, u64>,
    relay_fees_collected: u64,
    /// Acknowledgments accepted by the relay and not yet handed off
    outbox: Vec<Acknowledgment>,
    #[serde(skip)]
    events: Vec<Event>,
    #[serde(skip)]
    journal: Option<Journal>,
}

impl LedgerHost {
    pub fn new(farm_address: Address, relay_fees: RelayFees) -> Self {
        Self {
            farm_address,
            relay_fees,
            ..Default::default()
        }
    }

    /// Register a farm pool staking `token`
    pub fn register_pool(&mut self, pool: PoolId, token: TokenId, reward_per_slot: u64) {
        self.record(|s| Undo::Pool(pool, s.pools.get(&pool).cloned()));
        self.pools.insert(
            pool,
            FarmPool {
                token,
                reward_per_slot,
                last_reward_slot: self.slot,
                ..Default::default()
            },
        );
        tracing::info!(
            "Registered farm pool {} (token {}, {} reward/slot)",
            pool,
            token,
            reward_per_slot
        );
    }

    pub fn pool(&self, pool: PoolId) -> Option<&FarmPool> {
        self.pools.get(&pool)
    }

    /// Credit native currency (reserve top-ups, genesis funding)
    pub fn credit_native(&mut self, owner: &Address, amount: u64) {
        let balance = self.native_balance(owner).saturating_add(amount);
        self.set_native(owner, balance);
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// Advance the farm clock; rewards accrue lazily per pool
    pub fn advance_slot(&mut self) {
        self.slot += 1;
    }

    /// Reward `staker` could claim right now in `pool`
    pub fn pending_reward(&self, staker: &Address, pool: PoolId) -> u64 {
        let Some(farm_pool) = self.pools.get(&pool) else {
            return 0;
        };
        let position = self.position(staker, pool);
        let mut acc = farm_pool.acc_reward_per_share;
        if self.slot > farm_pool.last_reward_slot && farm_pool.total_staked > 0 {
            acc += accrued_per_share(farm_pool, self.slot);
        }
        let accumulated = position.amount as u128 * acc / REWARD_PRECISION;
        accumulated.saturating_sub(position.reward_debt) as u64
    }

    pub fn relay_fees_collected(&self) -> u64 {
        self.relay_fees_collected
    }

    /// Take acknowledgments queued since the last call
    pub fn drain_outbox(&mut self) -> Vec<Acknowledgment> {
        std::mem::take(&mut self.outbox)
    }

    /// Take events emitted since the last call
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // ============ Journal ============

    /// Start recording writes. A journal already open is discarded.
    pub fn begin(&mut self) {
        self.journal = Some(Journal {
            undo: Vec::new(),
            relay_fees_collected: self.relay_fees_collected,
            outbox_len: self.outbox.len(),
            events_len: self.events.len(),
        });
    }

    /// Keep every write since [`LedgerHost::begin`]
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo every write since [`LedgerHost::begin`]. No-op without an open journal.
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        let entries = journal.undo.len();
        for undo in journal.undo.into_iter().rev() {
            match undo {
                Undo::Pool(pool, prior) => match prior {
                    Some(p) => {
                        self.pools.insert(pool, p);
                    }
                    None => {
                        self.pools.remove(&pool);
                    }
                },
                Undo::Position(key, prior) => restore(&mut self.positions, key, prior),
                Undo::Balance(key, prior) => restore(&mut self.balances, key, prior),
                Undo::Supply(key, prior) => restore(&mut self.supply, key, prior),
                Undo::Allowance(key, prior) => restore(&mut self.allowances, key, prior),
                Undo::Reward(key, prior) => restore(&mut self.rewards, key, prior),
                Undo::Native(key, prior) => restore(&mut self.native, key, prior),
            }
        }
        self.relay_fees_collected = journal.relay_fees_collected;
        self.outbox.truncate(journal.outbox_len);
        self.events.truncate(journal.events_len);
        tracing::debug!("Rolled back {} ledger writes", entries);
    }

    fn record(&mut self, undo: impl FnOnce(&Self) -> Undo) {
        if self.journal.is_some() {
            let entry = undo(self);
            if let Some(journal) = self.journal.as_mut() {
                journal.undo.push(entry);
            }
        }
    }

    // ============ Entry writes ============

    fn pool_mut(&mut self, pool: PoolId) -> HostResult<&mut FarmPool> {
        if !self.pools.contains_key(&pool) {
            return Err(HostError::new(format!("unknown pool {pool}")));
        }
        self.record(|s| Undo::Pool(pool, s.pools.get(&pool).cloned()));
        self.pools
            .get_mut(&pool)
            .ok_or_else(|| HostError::new(format!("unknown pool {pool}")))
    }

    fn set_balance(&mut self, token: TokenId, owner: &Address, amount: u64) {
        let key = (token, *owner);
        self.record(|s| Undo::Balance(key, s.balances.get(&key).copied()));
        self.balances.insert(key, amount);
    }

    fn set_supply(&mut self, token: TokenId, amount: u64) {
        self.record(|s| Undo::Supply(token, s.supply.get(&token).copied()));
        self.supply.insert(token, amount);
    }

    fn set_allowance(&mut self, token: TokenId, owner: &Address, spender: &Address, amount: u64) {
        let key = (token, *owner, *spender);
        self.record(|s| Undo::Allowance(key, s.allowances.get(&key).copied()));
        self.allowances.insert(key, amount);
    }

    fn set_reward(&mut self, owner: &Address, amount: u64) {
        let key = *owner;
        self.record(|s| Undo::Reward(key, s.rewards.get(&key).copied()));
        self.rewards.insert(key, amount);
    }

    fn set_native(&mut self, owner: &Address, amount: u64) {
        let key = *owner;
        self.record(|s| Undo::Native(key, s.native.get(&key).copied()));
        self.native.insert(key, amount);
    }

    fn set_position(&mut self, staker: &Address, pool: PoolId, amount: u64, acc: u128) {
        let key = (*staker, pool);
        self.record(|s| Undo::Position(key, s.positions.get(&key).copied()));
        if amount == 0 {
            self.positions.remove(&key);
        } else {
            self.positions.insert(
                key,
                Position {
                    amount,
                    reward_debt: amount as u128 * acc / REWARD_PRECISION,
                },
            );
        }
    }

    // ============ Farm accounting ============

    fn position(&self, staker: &Address, pool: PoolId) -> Position {
        self.positions
            .get(&(*staker, pool))
            .copied()
            .unwrap_or_default()
    }

    fn update_pool(&mut self, pool: PoolId) -> HostResult<&mut FarmPool> {
        let slot = self.slot;
        let farm_pool = self.pool_mut(pool)?;
        if slot > farm_pool.last_reward_slot {
            if farm_pool.total_staked > 0 {
                let accrued = accrued_per_share(farm_pool, slot);
                farm_pool.acc_reward_per_share += accrued;
            }
            farm_pool.last_reward_slot = slot;
        }
        Ok(farm_pool)
    }

    /// Settle pending reward for `staker` and return the pool's accumulator
    fn settle(&mut self, staker: &Address, pool: PoolId) -> HostResult<u128> {
        let acc = self.update_pool(pool)?.acc_reward_per_share;
        let position = self.position(staker, pool);
        let pending = (position.amount as u128 * acc / REWARD_PRECISION)
            .saturating_sub(position.reward_debt);
        if pending > 0 {
            let pending = u64::try_from(pending).map_err(|_| HostError::new("reward overflow"))?;
            let balance = self
                .reward_balance(staker)
                .checked_add(pending)
                .ok_or_else(|| HostError::new("reward overflow"))?;
            self.set_reward(staker, balance);
        }
        Ok(acc)
    }

    fn move_tokens(
        &mut self,
        token: TokenId,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> HostResult<()> {
        let balance = self.balance_of(token, from);
        if balance < amount {
            return Err(HostError::new(format!(
                "token {token}: balance {balance} of {from} below {amount}"
            )));
        }
        self.set_balance(token, from, balance - amount);
        let credited = self.balance_of(token, to) + amount;
        self.set_balance(token, to, credited);
        Ok(())
    }
}

fn restore<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, prior: Option<V>) {
    match prior {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

fn accrued_per_share(pool: &FarmPool, slot: u64) -> u128 {
    let slots = (slot - pool.last_reward_slot) as u128;
    slots * pool.reward_per_slot as u128 * REWARD_PRECISION / pool.total_staked as u128
}

impl Farm for LedgerHost {
    fn farm_address(&self) -> Address {
        self.farm_address
    }

    fn pool_token(&self, pool: PoolId) -> HostResult<TokenId> {
        self.pools
            .get(&pool)
            .map(|p| p.token)
            .ok_or_else(|| HostError::new(format!("unknown pool {pool}")))
    }

    fn stake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()> {
        let token = self.pool_token(pool)?;
        let acc = self.settle(staker, pool)?;

        if amount > 0 {
            let farm = self.farm_address;
            let allowance = self.allowance(token, staker, &farm);
            if allowance < amount {
                return Err(HostError::new(format!(
                    "allowance {allowance} below stake {amount}"
                )));
            }
            if allowance != u64::MAX {
                self.set_allowance(token, staker, &farm, allowance - amount);
            }
            self.move_tokens(token, staker, &farm, amount)?;
        }

        let new_amount = self
            .position(staker, pool)
            .amount
            .checked_add(amount)
            .ok_or_else(|| HostError::new("position overflow"))?;
        self.set_position(staker, pool, new_amount, acc);
        self.pool_mut(pool)?.total_staked += amount;
        Ok(())
    }

    fn unstake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()> {
        let token = self.pool_token(pool)?;
        let position = self.position(staker, pool);
        if position.amount < amount {
            return Err(HostError::new(format!(
                "unstake {amount} exceeds position {}",
                position.amount
            )));
        }
        let acc = self.settle(staker, pool)?;
        let farm = self.farm_address;
        self.move_tokens(token, &farm, staker, amount)?;
        self.set_position(staker, pool, position.amount - amount, acc);
        self.pool_mut(pool)?.total_staked -= amount;
        Ok(())
    }

    fn emergency_unstake(&mut self, staker: &Address, pool: PoolId) -> HostResult<u64> {
        let token = self.pool_token(pool)?;
        let amount = self.position(staker, pool).amount;
        let farm = self.farm_address;
        self.move_tokens(token, &farm, staker, amount)?;
        self.set_position(staker, pool, 0, 0);
        self.pool_mut(pool)?.total_staked -= amount;
        Ok(amount)
    }

    fn staked(&self, staker: &Address, pool: PoolId) -> u64 {
        self.position(staker, pool).amount
    }
}

impl RepresentationToken for LedgerHost {
    fn mint(&mut self, token: TokenId, to: &Address, amount: u64) -> HostResult<()> {
        let supply = self
            .total_supply(token)
            .checked_add(amount)
            .ok_or_else(|| HostError::new("supply overflow"))?;
        self.set_supply(token, supply);
        let balance = self.balance_of(token, to) + amount;
        self.set_balance(token, to, balance);
        Ok(())
    }

    fn burn(&mut self, token: TokenId, from: &Address, amount: u64) -> HostResult<()> {
        let balance = self.balance_of(token, from);
        if balance < amount {
            return Err(HostError::new(format!(
                "burn {amount} exceeds balance {balance} of {from}"
            )));
        }
        self.set_balance(token, from, balance - amount);
        let supply = self.total_supply(token).saturating_sub(amount);
        self.set_supply(token, supply);
        Ok(())
    }

    fn balance_of(&self, token: TokenId, owner: &Address) -> u64 {
        self.balances.get(&(token, *owner)).copied().unwrap_or(0)
    }

    fn total_supply(&self, token: TokenId) -> u64 {
        self.supply.get(&token).copied().unwrap_or(0)
    }

    fn allowance(&self, token: TokenId, owner: &Address, spender: &Address) -> u64 {
        self.allowances
            .get(&(token, *owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    fn approve(
        &mut self,
        token: TokenId,
        owner: &Address,
        spender: &Address,
        amount: u64,
    ) -> HostResult<()> {
        self.set_allowance(token, owner, spender, amount);
        Ok(())
    }
}

impl RewardToken for LedgerHost {
    fn reward_balance(&self, owner: &Address) -> u64 {
        self.rewards.get(owner).copied().unwrap_or(0)
    }

    fn transfer_reward(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()> {
        let balance = self.reward_balance(from);
        if balance < amount {
            return Err(HostError::new("insufficient reward balance"));
        }
        self.set_reward(from, balance - amount);
        let credited = self.reward_balance(to) + amount;
        self.set_reward(to, credited);
        Ok(())
    }
}

impl NativeBank for LedgerHost {
    fn native_balance(&self, owner: &Address) -> u64 {
        self.native.get(owner).copied().unwrap_or(0)
    }

    fn transfer_native(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()> {
        let balance = self.native_balance(from);
        if balance < amount {
            return Err(HostError::new(format!(
                "native balance {balance} of {from} below {amount}"
            )));
        }
        self.set_native(from, balance - amount);
        let credited = self.native_balance(to) + amount;
        self.set_native(to, credited);
        Ok(())
    }
}

impl Relay for LedgerHost {
    fn quote_fee(&self, _dest_chain: ChainId, payload: &[u8]) -> u64 {
        self.relay_fees
            .base_fee
            .saturating_add(self.relay_fees.fee_per_byte.saturating_mul(payload.len() as u64))
    }

    fn send(
        &mut self,
        payer: &Address,
        dest_chain: ChainId,
        dest_address: &Address,
        payload: &[u8],
        fee: u64,
    ) -> HostResult<()> {
        let quoted = self.quote_fee(dest_chain, payload);
        if fee < quoted {
            return Err(HostError::new(format!("relay fee {fee} below quote {quoted}")));
        }
        let balance = self.native_balance(payer);
        if balance < fee {
            return Err(HostError::new(format!(
                "relay fee {fee} exceeds balance {balance} of {payer}"
            )));
        }
        self.set_native(payer, balance - fee);
        self.relay_fees_collected += fee;
        self.outbox.push(Acknowledgment {
            dest_chain,
            dest_address: *dest_address,
            payload: payload.to_vec(),
            fee,
        });
        Ok(())
    }
}

impl EventSink for LedgerHost {
    fn emit(&mut self, event: Event) {
        tracing::debug!(?event, "event");
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: PoolId = 1;
    const TOKEN: TokenId = 11;

    fn host() -> LedgerHost {
        let mut host = LedgerHost::new(Address::from_label("farm"), RelayFees::default());
        host.register_pool(POOL, TOKEN, 100);
        host
    }

    fn staker(label: &str, host: &mut LedgerHost, amount: u64) -> Address {
        let addr = Address::from_label(label);
        host.mint(TOKEN, &addr, amount).unwrap();
        host.approve(TOKEN, &addr, &Address::from_label("farm"), u64::MAX)
            .unwrap();
        addr
    }

    #[test]
    fn test_rewards_split_by_share() {
        let mut host = host();
        let a = staker("a", &mut host, 300);
        let b = staker("b", &mut host, 100);

        host.stake(&a, POOL, 300).unwrap();
        host.stake(&b, POOL, 100).unwrap();
        for _ in 0..4 {
            host.advance_slot();
        }

        assert_eq!(host.pending_reward(&a, POOL), 300);
        assert_eq!(host.pending_reward(&b, POOL), 100);

        // zero-amount stake claims without touching the position
        host.stake(&a, POOL, 0).unwrap();
        assert_eq!(host.reward_balance(&a), 300);
        assert_eq!(host.staked(&a, POOL), 300);
        assert_eq!(host.pending_reward(&a, POOL), 0);
    }

    #[test]
    fn test_stake_requires_allowance() {
        let mut host = host();
        let a = Address::from_label("a");
        host.mint(TOKEN, &a, 10).unwrap();
        assert!(host.stake(&a, POOL, 10).is_err());
        assert_eq!(host.staked(&a, POOL), 0);
    }

    #[test]
    fn test_finite_allowance_is_consumed() {
        let mut host = host();
        let a = Address::from_label("a");
        let farm = Address::from_label("farm");
        host.mint(TOKEN, &a, 10).unwrap();
        host.approve(TOKEN, &a, &farm, 6).unwrap();

        host.stake(&a, POOL, 4).unwrap();
        assert_eq!(host.allowance(TOKEN, &a, &farm), 2);
        assert!(host.stake(&a, POOL, 4).is_err());
    }

    #[test]
    fn test_emergency_unstake_skips_reward() {
        let mut host = host();
        let a = staker("a", &mut host, 50);
        host.stake(&a, POOL, 50).unwrap();
        host.advance_slot();

        assert_eq!(host.emergency_unstake(&a, POOL).unwrap(), 50);
        assert_eq!(host.reward_balance(&a), 0);
        assert_eq!(host.balance_of(TOKEN, &a), 50);
        assert_eq!(host.pool(POOL).unwrap().total_staked, 0);
    }

    #[test]
    fn test_unstake_pays_reward_and_returns_tokens() {
        let mut host = host();
        let a = staker("a", &mut host, 50);
        host.stake(&a, POOL, 50).unwrap();
        host.advance_slot();

        host.unstake(&a, POOL, 20).unwrap();
        assert_eq!(host.reward_balance(&a), 100);
        assert_eq!(host.balance_of(TOKEN, &a), 20);
        assert!(host.unstake(&a, POOL, 31).is_err());
    }

    #[test]
    fn test_rollback_restores_touched_entries() {
        let mut host = LedgerHost::new(
            Address::from_label("farm"),
            RelayFees {
                base_fee: 1,
                fee_per_byte: 0,
            },
        );
        host.register_pool(POOL, TOKEN, 100);
        let a = staker("a", &mut host, 50);
        host.stake(&a, POOL, 20).unwrap();
        host.advance_slot();
        let payer = Address::from_label("dispatcher");
        host.credit_native(&payer, 10);

        host.begin();
        let fresh = staker("fresh", &mut host, 5);
        host.stake(&a, POOL, 30).unwrap();
        host.unstake(&a, POOL, 10).unwrap();
        host.burn(TOKEN, &a, 10).unwrap();
        host.send(&payer, ChainId(1), &Address::from_label("src"), &[1], 1)
            .unwrap();
        host.emit(Event::IncentivePaid { user: a, amount: 1 });
        host.rollback();

        assert_eq!(host.staked(&a, POOL), 20);
        assert_eq!(host.balance_of(TOKEN, &a), 30);
        assert_eq!(host.balance_of(TOKEN, &fresh), 0);
        assert_eq!(host.total_supply(TOKEN), 50);
        assert_eq!(host.reward_balance(&a), 0);
        assert_eq!(host.pending_reward(&a, POOL), 100);
        assert_eq!(host.pool(POOL).unwrap().total_staked, 20);
        assert_eq!(host.native_balance(&payer), 10);
        assert_eq!(host.relay_fees_collected(), 0);
        assert!(host.drain_outbox().is_empty());
        assert!(host.drain_events().is_empty());
    }

    #[test]
    fn test_commit_keeps_writes() {
        let mut host = host();
        let a = staker("a", &mut host, 10);

        host.begin();
        host.stake(&a, POOL, 10).unwrap();
        host.commit();
        host.rollback();

        assert_eq!(host.staked(&a, POOL), 10);
        assert_eq!(host.total_supply(TOKEN), 10);
    }

    #[test]
    fn test_relay_charges_payer() {
        let mut host = LedgerHost::new(
            Address::from_label("farm"),
            RelayFees {
                base_fee: 2,
                fee_per_byte: 1,
            },
        );
        let payer = Address::from_label("dispatcher");
        host.credit_native(&payer, 10);
        let fee = host.quote_fee(ChainId(1), &[0u8; 3]);
        assert_eq!(fee, 5);

        host.send(&payer, ChainId(1), &Address::from_label("src"), &[0u8; 3], fee)
            .unwrap();
        assert_eq!(host.native_balance(&payer), 5);
        assert_eq!(host.relay_fees_collected(), 5);
        assert_eq!(host.drain_outbox().len(), 1);
        assert!(host.drain_outbox().is_empty());

        assert!(host
            .send(&payer, ChainId(1), &Address::from_label("src"), &[0u8; 3], 4)
            .is_err());
    }
}
