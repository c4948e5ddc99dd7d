//! In-crate test host
//!
//! Minimal ledger implementing every host trait, with knobs for
//! rewards, relay fees and injected failures.

use relay_types::{Address, ChainId, PoolId, Provenance, TokenId};
use std::collections::HashMap;

use crate::{
    error::HostError,
    events::Event,
    host::{EventSink, Farm, HostResult, NativeBank, Relay, RepresentationToken, RewardToken},
    state::DispatcherConfig,
    Dispatcher,
};

pub const POOL: PoolId = 7;
pub const TOKEN: TokenId = 70;
pub const SOURCE_CHAIN: ChainId = ChainId(1);
pub const DEST_CHAIN: ChainId = ChainId(2);

pub fn farm() -> Address {
    Address::from_label("farm")
}
pub fn dispatcher_address() -> Address {
    Address::from_label("dispatcher")
}
pub fn owner() -> Address {
    Address::from_label("owner")
}
pub fn operator() -> Address {
    Address::from_label("operator")
}
pub fn source_sender() -> Address {
    Address::from_label("source-sender")
}
pub fn user() -> Address {
    Address::from_label("user-u")
}

pub fn config() -> DispatcherConfig {
    DispatcherConfig {
        address: dispatcher_address(),
        owner: owner(),
        operator: operator(),
        trusted_source: Provenance {
            source_chain: SOURCE_CHAIN,
            sender: source_sender(),
        },
        destination_chain: DEST_CHAIN,
        incentive_amount: 5,
    }
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::new(config())
}

#[derive(Clone, Debug, Default)]
pub struct SentMessage {
    pub dest_chain: ChainId,
    pub dest_address: Address,
    pub payload: Vec<u8>,
    pub fee: u64,
}

#[derive(Clone, Debug, Default)]
pub struct MockHost {
    pub pools: HashMap<PoolId, TokenId>,
    pub positions: HashMap<(Address, PoolId), u64>,
    pub balances: HashMap<(TokenId, Address), u64>,
    pub supply: HashMap<TokenId, u64>,
    pub allowances: HashMap<(TokenId, Address, Address), u64>,
    pub approvals: usize,
    pub rewards: HashMap<Address, u64>,
    /// Reward paid to the staker on every stake/unstake call
    pub reward_per_call: u64,
    pub native: HashMap<Address, u64>,
    pub relay_fee: u64,
    pub sent: Vec<SentMessage>,
    pub events: Vec<Event>,
    pub fail_stake: bool,
    pub fail_send: bool,
}

impl MockHost {
    pub fn new() -> Self {
        let mut host = Self::default();
        host.pools.insert(POOL, TOKEN);
        host
    }

    pub fn with_reserve(mut self, amount: u64) -> Self {
        self.native.insert(dispatcher_address(), amount);
        self
    }

    fn pay_reward(&mut self, staker: &Address) {
        if self.reward_per_call > 0 {
            *self.rewards.entry(*staker).or_default() += self.reward_per_call;
        }
    }

    fn move_tokens(&mut self, token: TokenId, from: &Address, to: &Address, amount: u64) -> HostResult<()> {
        let from_balance = self.balance_of(token, from);
        if from_balance < amount {
            return Err(HostError::new("insufficient token balance"));
        }
        self.balances.insert((token, *from), from_balance - amount);
        *self.balances.entry((token, *to)).or_default() += amount;
        Ok(())
    }
}

impl Farm for MockHost {
    fn farm_address(&self) -> Address {
        farm()
    }

    fn pool_token(&self, pool: PoolId) -> HostResult<TokenId> {
        self.pools
            .get(&pool)
            .copied()
            .ok_or_else(|| HostError::new(format!("unknown pool {pool}")))
    }

    fn stake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()> {
        if self.fail_stake {
            return Err(HostError::new("farm stake failed"));
        }
        let token = self.pool_token(pool)?;
        if amount > 0 {
            let key = (token, *staker, farm());
            let allowance = self.allowances.get(&key).copied().unwrap_or(0);
            if allowance < amount {
                return Err(HostError::new("allowance exceeded"));
            }
            self.allowances.insert(key, allowance - amount);
            self.move_tokens(token, staker, &farm(), amount)?;
        }
        self.pay_reward(staker);
        *self.positions.entry((*staker, pool)).or_default() += amount;
        Ok(())
    }

    fn unstake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()> {
        let token = self.pool_token(pool)?;
        let position = self.staked(staker, pool);
        if position < amount {
            return Err(HostError::new("unstake exceeds position"));
        }
        self.move_tokens(token, &farm(), staker, amount)?;
        self.pay_reward(staker);
        self.positions.insert((*staker, pool), position - amount);
        Ok(())
    }

    fn emergency_unstake(&mut self, staker: &Address, pool: PoolId) -> HostResult<u64> {
        let token = self.pool_token(pool)?;
        let position = self.positions.remove(&(*staker, pool)).unwrap_or(0);
        self.move_tokens(token, &farm(), staker, position)?;
        Ok(position)
    }

    fn staked(&self, staker: &Address, pool: PoolId) -> u64 {
        self.positions.get(&(*staker, pool)).copied().unwrap_or(0)
    }
}

impl RepresentationToken for MockHost {
    fn mint(&mut self, token: TokenId, to: &Address, amount: u64) -> HostResult<()> {
        *self.balances.entry((token, *to)).or_default() += amount;
        *self.supply.entry(token).or_default() += amount;
        Ok(())
    }

    fn burn(&mut self, token: TokenId, from: &Address, amount: u64) -> HostResult<()> {
        let balance = self.balance_of(token, from);
        if balance < amount {
            return Err(HostError::new("burn exceeds balance"));
        }
        self.balances.insert((token, *from), balance - amount);
        *self.supply.entry(token).or_default() -= amount;
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

    fn approve(&mut self, token: TokenId, owner: &Address, spender: &Address, amount: u64) -> HostResult<()> {
        self.approvals += 1;
        self.allowances.insert((token, *owner, *spender), amount);
        Ok(())
    }
}

impl RewardToken for MockHost {
    fn reward_balance(&self, owner: &Address) -> u64 {
        self.rewards.get(owner).copied().unwrap_or(0)
    }

    fn transfer_reward(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()> {
        let balance = self.reward_balance(from);
        if balance < amount {
            return Err(HostError::new("insufficient reward balance"));
        }
        self.rewards.insert(*from, balance - amount);
        *self.rewards.entry(*to).or_default() += amount;
        Ok(())
    }
}

impl NativeBank for MockHost {
    fn native_balance(&self, owner: &Address) -> u64 {
        self.native.get(owner).copied().unwrap_or(0)
    }

    fn transfer_native(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()> {
        let balance = self.native_balance(from);
        if balance < amount {
            return Err(HostError::new("insufficient native balance"));
        }
        self.native.insert(*from, balance - amount);
        *self.native.entry(*to).or_default() += amount;
        Ok(())
    }
}

impl Relay for MockHost {
    fn quote_fee(&self, _dest_chain: ChainId, _payload: &[u8]) -> u64 {
        self.relay_fee
    }

    fn send(
        &mut self,
        payer: &Address,
        dest_chain: ChainId,
        dest_address: &Address,
        payload: &[u8],
        fee: u64,
    ) -> HostResult<()> {
        if self.fail_send {
            return Err(HostError::new("relay send failed"));
        }
        let balance = self.native_balance(payer);
        if balance < fee {
            return Err(HostError::new("insufficient relay fee"));
        }
        self.native.insert(*payer, balance - fee);
        self.sent.push(SentMessage {
            dest_chain,
            dest_address: *dest_address,
            payload: payload.to_vec(),
            fee,
        });
        Ok(())
    }
}

impl EventSink for MockHost {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}
