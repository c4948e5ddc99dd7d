//! Delegate Ledger
//!
//! One delegate per user. The delegate owns the farm positions opened on
//! the user's behalf, the stake record per pool and the nonce ledger.
//! Mutating entries other than `harvest` accept calls from the dispatcher
//! only.
//!
//! Every entry holds the delegate's state lock for its whole duration,
//! external calls included. A second entry while the lock is held fails
//! with [`DispatchError::Reentrancy`] instead of waiting.
//!
//! Preconditions are checked before the first host call, and the stake
//! record and nonce ledger are only written after every host call returned.

use parking_lot::{Mutex, MutexGuard};
use relay_types::{Address, Nonce, PoolId};

use crate::{
    error::{DispatchError, DispatchResult},
    events::Event,
    host::Host,
    state::{DelegateSnapshot, DelegateState},
};

/// Per-user sub-account performing farm operations
#[derive(Debug)]
pub struct Delegate {
    address: Address,
    user: Address,
    dispatcher: Address,
    state: Mutex<DelegateState>,
}

impl Delegate {
    pub fn new(address: Address, user: Address, dispatcher: Address) -> Self {
        Self::with_state(address, user, dispatcher, DelegateState::default())
    }

    pub fn with_state(
        address: Address,
        user: Address,
        dispatcher: Address,
        state: DelegateState,
    ) -> Self {
        Self {
            address,
            user,
            dispatcher,
            state: Mutex::new(state),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// User this delegate is bound to
    pub fn user(&self) -> Address {
        self.user
    }

    /// Stake record for `pool`
    pub fn staked(&self, pool: PoolId) -> DispatchResult<u64> {
        Ok(self.enter()?.stake(pool))
    }

    pub fn is_consumed(&self, pool: PoolId, nonce: Nonce) -> DispatchResult<bool> {
        Ok(self.enter()?.is_consumed(pool, nonce))
    }

    pub fn snapshot(&self) -> DispatchResult<DelegateSnapshot> {
        Ok(DelegateSnapshot {
            user: self.user,
            address: self.address,
            state: self.enter()?.clone(),
        })
    }

    /// Replace the stake records and nonce ledger with an earlier image
    pub(crate) fn restore(&self, snapshot: DelegateSnapshot) -> DispatchResult<()> {
        *self.enter()? = snapshot.state;
        Ok(())
    }

    /// Mint `amount` of representation token to the delegate and stake it
    /// into `pool`. Returns the reward forwarded to the user.
    pub fn deposit<H: Host>(
        &self,
        host: &mut H,
        caller: &Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
    ) -> DispatchResult<u64> {
        self.only_dispatcher(caller)?;
        let mut state = self.enter()?;
        state.ensure_unused(pool, nonce)?;
        if amount == 0 {
            return Err(DispatchError::ZeroAmount);
        }
        let new_stake = state
            .stake(pool)
            .checked_add(amount)
            .ok_or(DispatchError::ArithmeticOverflow)?;

        let token = host.pool_token(pool)?;
        host.mint(token, &self.address, amount)?;
        let farm = host.farm_address();
        if host.allowance(token, &self.address, &farm) < amount {
            host.approve(token, &self.address, &farm, u64::MAX)?;
        }
        host.stake(&self.address, pool, amount)?;
        let reward = self.forward_rewards(host)?;

        state.set_stake(pool, new_stake);
        state.consume(pool, nonce)?;

        tracing::debug!(
            "Delegate {} deposited {} into pool {} (nonce {})",
            self.address,
            amount,
            pool,
            nonce
        );
        host.emit(Event::Deposited {
            delegate: self.address,
            user: self.user,
            pool,
            amount,
            nonce,
            reward,
        });

        Ok(reward)
    }

    /// Unstake and burn `amount`. Returns the reward forwarded to the user.
    pub fn withdraw<H: Host>(
        &self,
        host: &mut H,
        caller: &Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
    ) -> DispatchResult<u64> {
        self.only_dispatcher(caller)?;
        let mut state = self.enter()?;
        let reward = self.unstake_and_burn(host, &mut state, pool, amount, nonce)?;

        host.emit(Event::Withdrawn {
            delegate: self.address,
            user: self.user,
            pool,
            amount,
            nonce,
            reward,
        });

        Ok(reward)
    }

    /// Exit the whole tracked position without reward. Returns the amount burned.
    pub fn emergency_withdraw<H: Host>(
        &self,
        host: &mut H,
        caller: &Address,
        pool: PoolId,
        nonce: Nonce,
    ) -> DispatchResult<u64> {
        self.only_dispatcher(caller)?;
        let mut state = self.enter()?;
        state.ensure_unused(pool, nonce)?;
        let amount = state.stake(pool);
        if amount == 0 {
            return Err(DispatchError::NothingStaked { pool });
        }

        let token = host.pool_token(pool)?;
        let released = host.emergency_unstake(&self.address, pool)?;
        if released != amount {
            tracing::warn!(
                "Farm released {} for delegate {} pool {}, tracked stake is {}",
                released,
                self.address,
                pool,
                amount
            );
        }
        host.burn(token, &self.address, amount)?;

        state.set_stake(pool, 0);
        state.consume(pool, nonce)?;

        host.emit(Event::EmergencyWithdrawn {
            delegate: self.address,
            user: self.user,
            pool,
            amount,
            nonce,
        });

        Ok(amount)
    }

    /// Claim pending reward without changing the stake. Callable by anyone;
    /// the reward always goes to the bound user.
    pub fn harvest<H: Host>(&self, host: &mut H, pool: PoolId) -> DispatchResult<u64> {
        let state = self.enter()?;
        if state.stake(pool) == 0 {
            return Err(DispatchError::NothingStaked { pool });
        }

        // zero-amount stake is the farm's claim idiom
        host.stake(&self.address, pool, 0)?;
        let reward = self.forward_rewards(host)?;

        host.emit(Event::Harvested {
            delegate: self.address,
            user: self.user,
            pool,
            reward,
        });

        Ok(reward)
    }

    /// Mark `nonce` consumed for a deposit that never executed here
    pub fn fallback_deposit<H: Host>(
        &self,
        host: &mut H,
        caller: &Address,
        pool: PoolId,
        nonce: Nonce,
    ) -> DispatchResult<()> {
        self.only_dispatcher(caller)?;
        let mut state = self.enter()?;
        state.consume(pool, nonce)?;

        host.emit(Event::FallbackDeposited {
            delegate: self.address,
            user: self.user,
            pool,
            nonce,
        });

        Ok(())
    }

    /// Finalize a withdrawal whose round trip never completed. Same local
    /// effects as [`Delegate::withdraw`]; nothing is sent back to the source.
    pub fn fallback_withdraw<H: Host>(
        &self,
        host: &mut H,
        caller: &Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
    ) -> DispatchResult<u64> {
        self.only_dispatcher(caller)?;
        let mut state = self.enter()?;
        let reward = self.unstake_and_burn(host, &mut state, pool, amount, nonce)?;

        host.emit(Event::FallbackWithdrawn {
            delegate: self.address,
            user: self.user,
            pool,
            amount,
            nonce,
            reward,
        });

        Ok(reward)
    }

    fn unstake_and_burn<H: Host>(
        &self,
        host: &mut H,
        state: &mut DelegateState,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
    ) -> DispatchResult<u64> {
        state.ensure_unused(pool, nonce)?;
        let remaining = state.remaining_after(pool, amount)?;

        let token = host.pool_token(pool)?;
        host.unstake(&self.address, pool, amount)?;
        host.burn(token, &self.address, amount)?;
        let reward = self.forward_rewards(host)?;

        state.set_stake(pool, remaining);
        state.consume(pool, nonce)?;

        tracing::debug!(
            "Delegate {} withdrew {} from pool {} (nonce {}), {} left",
            self.address,
            amount,
            pool,
            nonce,
            remaining
        );

        Ok(reward)
    }

    /// Send the delegate's whole reward balance to its user
    fn forward_rewards<H: Host>(&self, host: &mut H) -> DispatchResult<u64> {
        let balance = host.reward_balance(&self.address);
        if balance > 0 {
            host.transfer_reward(&self.address, &self.user, balance)?;
        }
        Ok(balance)
    }

    fn only_dispatcher(&self, caller: &Address) -> DispatchResult<()> {
        if *caller != self.dispatcher {
            return Err(DispatchError::Unauthorized(*caller));
        }
        Ok(())
    }

    fn enter(&self) -> DispatchResult<MutexGuard<'_, DelegateState>> {
        self.state.try_lock().ok_or(DispatchError::Reentrancy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::HostError,
        host::{EventSink, Farm, HostResult, NativeBank, Relay, RepresentationToken, RewardToken},
        testing::*,
    };
    use relay_types::{ChainId, TokenId};
    use std::sync::Arc;

    fn delegate() -> Delegate {
        Delegate::new(
            Address::from_label("delegate-0"),
            user(),
            dispatcher_address(),
        )
    }

    #[test]
    fn test_deposit_stakes_and_forwards_reward() {
        let mut host = MockHost::new();
        host.reward_per_call = 3;
        let d = delegate();

        let reward = d.deposit(&mut host, &dispatcher_address(), POOL, 100, 1).unwrap();

        assert_eq!(reward, 3);
        assert_eq!(d.staked(POOL).unwrap(), 100);
        assert!(d.is_consumed(POOL, 1).unwrap());
        assert_eq!(host.staked(&d.address(), POOL), 100);
        assert_eq!(host.reward_balance(&user()), 3);
        assert_eq!(host.reward_balance(&d.address()), 0);
    }

    #[test]
    fn test_deposit_without_reward_does_not_fail() {
        let mut host = MockHost::new();
        let d = delegate();
        assert_eq!(d.deposit(&mut host, &dispatcher_address(), POOL, 10, 1), Ok(0));
    }

    #[test]
    fn test_rejected_deposit_leaves_supply_untouched() {
        let mut host = MockHost::new();
        let d = delegate();
        d.deposit(&mut host, &dispatcher_address(), POOL, 10, 1).unwrap();

        assert_eq!(
            d.deposit(&mut host, &dispatcher_address(), POOL, 10, 1),
            Err(DispatchError::NonceAlreadyConsumed { pool: POOL, nonce: 1 })
        );
        assert_eq!(
            d.deposit(&mut host, &dispatcher_address(), POOL, 0, 2),
            Err(DispatchError::ZeroAmount)
        );
        assert_eq!(host.total_supply(TOKEN), 10);
        assert_eq!(d.staked(POOL).unwrap(), 10);
    }

    #[test]
    fn test_allowance_topped_up_only_when_exhausted() {
        let mut host = MockHost::new();
        let d = delegate();

        d.deposit(&mut host, &dispatcher_address(), POOL, 10, 1).unwrap();
        d.deposit(&mut host, &dispatcher_address(), POOL, 10, 2).unwrap();
        assert_eq!(host.approvals, 1);

        // drain the allowance so the next deposit has to top it up
        host.approve(TOKEN, &d.address(), &farm(), 5).unwrap();
        d.deposit(&mut host, &dispatcher_address(), POOL, 10, 3).unwrap();
        assert_eq!(host.approvals, 3);
        assert_eq!(d.staked(POOL).unwrap(), 30);
    }

    #[test]
    fn test_only_dispatcher_may_mutate() {
        let mut host = MockHost::new();
        let d = delegate();
        let stranger = Address::from_label("stranger");

        assert_eq!(
            d.deposit(&mut host, &stranger, POOL, 10, 1),
            Err(DispatchError::Unauthorized(stranger))
        );
        assert_eq!(
            d.fallback_deposit(&mut host, &stranger, POOL, 1),
            Err(DispatchError::Unauthorized(stranger))
        );
        assert_eq!(d.staked(POOL).unwrap(), 0);
    }

    #[test]
    fn test_withdraw_burns_and_decrements() {
        let mut host = MockHost::new();
        let d = delegate();
        d.deposit(&mut host, &dispatcher_address(), POOL, 100, 1).unwrap();

        d.withdraw(&mut host, &dispatcher_address(), POOL, 40, 2).unwrap();

        assert_eq!(d.staked(POOL).unwrap(), 60);
        assert_eq!(host.total_supply(TOKEN), 60);
        assert_eq!(host.staked(&d.address(), POOL), 60);
    }

    #[test]
    fn test_withdraw_rejections_leave_state_untouched() {
        let mut host = MockHost::new();
        let d = delegate();
        d.deposit(&mut host, &dispatcher_address(), POOL, 60, 1).unwrap();

        assert_eq!(
            d.withdraw(&mut host, &dispatcher_address(), POOL, 70, 3),
            Err(DispatchError::InsufficientStake {
                pool: POOL,
                staked: 60,
                requested: 70
            })
        );
        assert_eq!(
            d.withdraw(&mut host, &dispatcher_address(), POOL, 0, 3),
            Err(DispatchError::ZeroAmount)
        );
        assert_eq!(
            d.withdraw(&mut host, &dispatcher_address(), POOL, 10, 1),
            Err(DispatchError::NonceAlreadyConsumed { pool: POOL, nonce: 1 })
        );
        assert_eq!(d.staked(POOL).unwrap(), 60);
        assert!(!d.is_consumed(POOL, 3).unwrap());
        assert_eq!(host.total_supply(TOKEN), 60);
    }

    #[test]
    fn test_emergency_withdraw_forfeits_reward() {
        let mut host = MockHost::new();
        let d = delegate();
        d.deposit(&mut host, &dispatcher_address(), POOL, 60, 1).unwrap();
        host.reward_per_call = 9;

        let burned = d
            .emergency_withdraw(&mut host, &dispatcher_address(), POOL, 4)
            .unwrap();

        assert_eq!(burned, 60);
        assert_eq!(d.staked(POOL).unwrap(), 0);
        assert_eq!(host.total_supply(TOKEN), 0);
        assert_eq!(host.reward_balance(&user()), 0);
        assert_eq!(
            d.emergency_withdraw(&mut host, &dispatcher_address(), POOL, 5),
            Err(DispatchError::NothingStaked { pool: POOL })
        );
    }

    #[test]
    fn test_harvest_requires_stake_and_is_repeatable() {
        let mut host = MockHost::new();
        host.reward_per_call = 2;
        let d = delegate();

        assert_eq!(
            d.harvest(&mut host, POOL),
            Err(DispatchError::NothingStaked { pool: POOL })
        );

        d.deposit(&mut host, &dispatcher_address(), POOL, 10, 1).unwrap();
        assert_eq!(d.harvest(&mut host, POOL), Ok(2));
        assert_eq!(d.harvest(&mut host, POOL), Ok(2));
        assert_eq!(host.reward_balance(&user()), 6);
        assert_eq!(d.staked(POOL).unwrap(), 10);
    }

    #[test]
    fn test_fallback_deposit_only_marks_nonce() {
        let mut host = MockHost::new();
        let d = delegate();

        d.fallback_deposit(&mut host, &dispatcher_address(), POOL, 9).unwrap();

        assert!(d.is_consumed(POOL, 9).unwrap());
        assert_eq!(d.staked(POOL).unwrap(), 0);
        assert!(host.positions.is_empty());
        assert_eq!(
            d.fallback_deposit(&mut host, &dispatcher_address(), POOL, 9),
            Err(DispatchError::NonceAlreadyConsumed { pool: POOL, nonce: 9 })
        );
    }

    #[test]
    fn test_failed_farm_call_leaves_ledger_untouched() {
        let mut host = MockHost::new();
        let d = delegate();
        host.fail_stake = true;

        assert!(matches!(
            d.deposit(&mut host, &dispatcher_address(), POOL, 10, 1),
            Err(DispatchError::Host(_))
        ));
        assert_eq!(d.staked(POOL).unwrap(), 0);
        assert!(!d.is_consumed(POOL, 1).unwrap());
    }

    /// Host whose farm calls back into the delegate during `stake`
    struct ReentrantHost {
        inner: MockHost,
        target: Option<Arc<Delegate>>,
        observed: Option<DispatchResult<u64>>,
    }

    impl Farm for ReentrantHost {
        fn farm_address(&self) -> Address {
            self.inner.farm_address()
        }
        fn pool_token(&self, pool: PoolId) -> HostResult<TokenId> {
            self.inner.pool_token(pool)
        }
        fn stake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()> {
            if let Some(target) = self.target.take() {
                let mut nested = self.inner.clone();
                self.observed = Some(target.harvest(&mut nested, pool));
            }
            self.inner.stake(staker, pool, amount)
        }
        fn unstake(&mut self, staker: &Address, pool: PoolId, amount: u64) -> HostResult<()> {
            self.inner.unstake(staker, pool, amount)
        }
        fn emergency_unstake(&mut self, staker: &Address, pool: PoolId) -> HostResult<u64> {
            self.inner.emergency_unstake(staker, pool)
        }
        fn staked(&self, staker: &Address, pool: PoolId) -> u64 {
            self.inner.staked(staker, pool)
        }
    }

    impl RepresentationToken for ReentrantHost {
        fn mint(&mut self, token: TokenId, to: &Address, amount: u64) -> HostResult<()> {
            self.inner.mint(token, to, amount)
        }
        fn burn(&mut self, token: TokenId, from: &Address, amount: u64) -> HostResult<()> {
            self.inner.burn(token, from, amount)
        }
        fn balance_of(&self, token: TokenId, owner: &Address) -> u64 {
            self.inner.balance_of(token, owner)
        }
        fn total_supply(&self, token: TokenId) -> u64 {
            self.inner.total_supply(token)
        }
        fn allowance(&self, token: TokenId, owner: &Address, spender: &Address) -> u64 {
            self.inner.allowance(token, owner, spender)
        }
        fn approve(
            &mut self,
            token: TokenId,
            owner: &Address,
            spender: &Address,
            amount: u64,
        ) -> HostResult<()> {
            self.inner.approve(token, owner, spender, amount)
        }
    }

    impl RewardToken for ReentrantHost {
        fn reward_balance(&self, owner: &Address) -> u64 {
            self.inner.reward_balance(owner)
        }
        fn transfer_reward(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()> {
            self.inner.transfer_reward(from, to, amount)
        }
    }

    impl NativeBank for ReentrantHost {
        fn native_balance(&self, owner: &Address) -> u64 {
            self.inner.native_balance(owner)
        }
        fn transfer_native(&mut self, from: &Address, to: &Address, amount: u64) -> HostResult<()> {
            self.inner.transfer_native(from, to, amount)
        }
    }

    impl Relay for ReentrantHost {
        fn quote_fee(&self, dest_chain: ChainId, payload: &[u8]) -> u64 {
            self.inner.quote_fee(dest_chain, payload)
        }
        fn send(
            &mut self,
            payer: &Address,
            dest_chain: ChainId,
            dest_address: &Address,
            payload: &[u8],
            fee: u64,
        ) -> HostResult<()> {
            self.inner.send(payer, dest_chain, dest_address, payload, fee)
        }
    }

    impl EventSink for ReentrantHost {
        fn emit(&mut self, event: Event) {
            self.inner.emit(event)
        }
    }

    #[test]
    fn test_reentrant_call_is_rejected() {
        let d = Arc::new(delegate());
        let mut host = ReentrantHost {
            inner: MockHost::new(),
            target: Some(d.clone()),
            observed: None,
        };

        d.deposit(&mut host, &dispatcher_address(), POOL, 10, 1).unwrap();

        assert_eq!(host.observed, Some(Err(DispatchError::Reentrancy)));
        assert_eq!(d.staked(POOL).unwrap(), 10);
    }

    #[test]
    fn test_host_error_conversion() {
        let err: DispatchError = HostError::new("boom").into();
        assert_eq!(err, DispatchError::Host("boom".to_string()));
    }
}
