//! Host Interfaces
//!
//! Everything the dispatcher touches outside its own ledger goes through
//! these traits: the farm, the representation token, the reward token,
//! native balances, the message relay and the event log.

use relay_types::{Address, ChainId, PoolId, TokenId};

use crate::{error::HostError, events::Event};

pub type HostResult<T> = Result<T, HostError>;

/// Reward-distribution farm
pub trait Farm {
    /// Address the farm pulls staked tokens into
    fn farm_address(&self) -> Address;

    /// Token staked in `pool`
    fn pool_token(&self, pool: PoolId) -> HostResult<TokenId>;

    /// Stake `amount` (may be zero) and pay pending reward to `staker`
    fn stake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()>;

    /// Unstake `amount` back to `staker` and pay pending reward
    fn unstake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()>;

    /// Return the whole position to `staker` without paying reward.
    /// Returns the amount released.
    fn emergency_unstake(&mut self, staker: &Address, pool: PoolId) -> HostResult<u64>;

    /// Amount currently staked by `staker` in `pool`
    fn staked(&self, staker: &Address, pool: PoolId) -> u64;
}

/// Synthetic token minted 1:1 against value locked on the source chain
pub trait RepresentationToken {
    fn mint(&mut self, token: TokenId, to: &Address, amount: u64) -> HostResult<()>;

    fn burn(&mut self, token: TokenId, from: &Address, amount: u64) -> HostResult<()>;

    fn balance_of(&self, token: TokenId, owner: &Address) -> u64;

    fn total_supply(&self, token: TokenId) -> u64;

    fn allowance(&self, token: TokenId, owner: &Address, spender: &Address) -> u64;

    fn approve(
        &mut self,
        token: TokenId,
        owner: &Address,
        spender: &Address,
        amount: u64,
    ) -> HostResult<()>;
}

/// Token the farm pays rewards in
pub trait RewardToken {
    fn reward_balance(&self, owner: &Address) -> u64;

    fn transfer_reward(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()>;
}

/// Native currency balances (dispatcher reserve, incentive payouts)
pub trait NativeBank {
    fn native_balance(&self, owner: &Address) -> u64;

    fn transfer_native(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()>;
}

/// Outbound side of the message relay
pub trait Relay {
    /// Fee quoted by the relay for delivering `payload` to `dest_chain`
    fn quote_fee(&self, dest_chain: ChainId, payload: &[u8]) -> u64;

    /// Queue `payload` for delivery, debiting `fee` from `payer`
    fn send(
        &mut self,
        payer: &Address,
        dest_chain: ChainId,
        dest_address: &Address,
        payload: &[u8],
        fee: u64,
    ) -> HostResult<()>;
}

/// Sink for structured events
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// Full environment a dispatcher runs against
pub trait Host: Farm + RepresentationToken + RewardToken + NativeBank + Relay + EventSink {}

impl<T> Host for T where T: Farm + RepresentationToken + RewardToken + NativeBank + Relay + EventSink {}
