//! Dispatcher
//!
//! Single authenticated entry point for relay messages. Authenticates the
//! claimed provenance, resolves or creates the user's delegate, routes the
//! intent and acknowledges withdrawal-class operations back to the source.
//! Also hosts the operator fallback entries and owner administration.

use relay_types::{Acknowledgment, Address, InboundMessage, Nonce, Operation, Payload, PoolId, Provenance};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    delegate::Delegate,
    error::{DispatchError, DispatchResult},
    events::Event,
    host::Host,
    registry::DelegateRegistry,
    state::{DispatcherConfig, DispatcherSnapshot},
};

#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: DelegateRegistry,
    incentive_paid: HashSet<Address>,
    call_sequences: HashMap<Address, u64>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let registry = DelegateRegistry::new(config.destination_chain);
        Self {
            config,
            registry,
            incentive_paid: HashSet::new(),
            call_sequences: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &DelegateRegistry {
        &self.registry
    }

    pub fn delegate_of(&self, user: &Address) -> Option<Arc<Delegate>> {
        self.registry.resolve(user)
    }

    pub fn incentive_received(&self, user: &Address) -> bool {
        self.incentive_paid.contains(user)
    }

    /// Last operator call sequence accepted from `signer` (zero when none)
    pub fn last_sequence(&self, signer: &Address) -> u64 {
        self.call_sequences.get(signer).copied().unwrap_or(0)
    }

    /// Reject a call sequence that does not exceed the signer's last one
    pub fn check_sequence(&self, signer: &Address, sequence: u64) -> DispatchResult<()> {
        let last = self.last_sequence(signer);
        if sequence <= last {
            return Err(DispatchError::StaleSequence {
                signer: *signer,
                sequence,
                last,
            });
        }
        Ok(())
    }

    /// Record `sequence` as the signer's last accepted call
    pub fn record_sequence(&mut self, signer: &Address, sequence: u64) -> DispatchResult<()> {
        self.check_sequence(signer, sequence)?;
        self.call_sequences.insert(*signer, sequence);
        Ok(())
    }

    /// Handle one relay message.
    ///
    /// Returns the acknowledgment queued for withdrawal-class operations.
    /// A failed message leaves the registry, the delegate ledger and the
    /// incentive flags as they were; host effects of a failed message must
    /// be discarded by the caller.
    pub fn receive<H: Host>(
        &mut self,
        host: &mut H,
        message: &InboundMessage,
    ) -> DispatchResult<Option<Acknowledgment>> {
        let provenance = message.provenance();
        self.authenticate(&provenance)?;
        let payload = Payload::decode(&message.payload)?;

        let (delegate, created) = match self.registry.resolve(&payload.user) {
            Some(delegate) => (delegate, false),
            None => {
                if payload.operation != Operation::Deposit {
                    return Err(DispatchError::FirstInteractionMustBeDeposit);
                }
                let delegate = self.registry.create_for(payload.user, self.config.address)?;
                (delegate, true)
            }
        };

        let checkpoint = delegate.snapshot()?;
        let had_incentive = self.incentive_paid.contains(&payload.user);
        let result = self.route(host, &delegate, &provenance, &payload, &message.payload);
        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                if created {
                    self.registry.rollback_creation(&payload.user);
                } else {
                    delegate.restore(checkpoint)?;
                }
                if !had_incentive {
                    self.incentive_paid.remove(&payload.user);
                }
                return Err(e);
            }
        };

        if created {
            host.emit(Event::DelegateCreated {
                user: payload.user,
                delegate: delegate.address(),
            });
        }
        host.emit(Event::MessageReceived {
            sender: provenance.sender,
            source_chain: provenance.source_chain,
            nonce: payload.nonce,
            operation: payload.operation,
            user: payload.user,
            pool: payload.pool,
            amount: payload.amount,
        });

        tracing::debug!(
            "Dispatched {} for user {} pool {} nonce {}",
            payload.operation,
            payload.user,
            payload.pool,
            payload.nonce
        );

        Ok(ack)
    }

    fn authenticate(&self, provenance: &Provenance) -> DispatchResult<()> {
        if *provenance != self.config.trusted_source {
            return Err(DispatchError::UntrustedSource {
                source_chain: provenance.source_chain,
                sender: provenance.sender,
            });
        }
        Ok(())
    }

    fn route<H: Host>(
        &mut self,
        host: &mut H,
        delegate: &Delegate,
        provenance: &Provenance,
        payload: &Payload,
        raw_payload: &[u8],
    ) -> DispatchResult<Option<Acknowledgment>> {
        let me = self.config.address;
        match payload.operation {
            Operation::Deposit => {
                delegate.deposit(host, &me, payload.pool, payload.amount, payload.nonce)?;
                self.pay_incentive(host, &payload.user)?;
                Ok(None)
            }
            Operation::Withdraw => {
                let fee = self.reserve_for_ack(host, provenance, raw_payload)?;
                delegate.withdraw(host, &me, payload.pool, payload.amount, payload.nonce)?;
                self.acknowledge(host, provenance, payload, raw_payload, fee).map(Some)
            }
            Operation::EmergencyWithdraw => {
                let fee = self.reserve_for_ack(host, provenance, raw_payload)?;
                delegate.emergency_withdraw(host, &me, payload.pool, payload.nonce)?;
                self.acknowledge(host, provenance, payload, raw_payload, fee).map(Some)
            }
        }
    }

    /// Quote the acknowledgment fee and make sure the reserve covers it
    fn reserve_for_ack<H: Host>(
        &self,
        host: &H,
        provenance: &Provenance,
        raw_payload: &[u8],
    ) -> DispatchResult<u64> {
        let fee = host.quote_fee(provenance.source_chain, raw_payload);
        let available = host.native_balance(&self.config.address);
        if available < fee {
            return Err(DispatchError::InsufficientReserve {
                required: fee,
                available,
            });
        }
        Ok(fee)
    }

    fn acknowledge<H: Host>(
        &self,
        host: &mut H,
        provenance: &Provenance,
        payload: &Payload,
        raw_payload: &[u8],
        fee: u64,
    ) -> DispatchResult<Acknowledgment> {
        host.send(
            &self.config.address,
            provenance.source_chain,
            &provenance.sender,
            raw_payload,
            fee,
        )?;
        host.emit(Event::AcknowledgmentSent {
            dest_chain: provenance.source_chain,
            dest_address: provenance.sender,
            user: payload.user,
            pool: payload.pool,
            nonce: payload.nonce,
            fee,
        });

        Ok(Acknowledgment {
            dest_chain: provenance.source_chain,
            dest_address: provenance.sender,
            payload: raw_payload.to_vec(),
            fee,
        })
    }

    /// Pay the one-time welcome incentive if the reserve covers it.
    /// A short reserve skips this payment without queueing it.
    fn pay_incentive<H: Host>(&mut self, host: &mut H, user: &Address) -> DispatchResult<()> {
        let amount = self.config.incentive_amount;
        if amount == 0 || self.incentive_paid.contains(user) {
            return Ok(());
        }
        let reserve = host.native_balance(&self.config.address);
        if reserve < amount {
            tracing::warn!(
                "Skipping incentive for {}: reserve {} below {}",
                user,
                reserve,
                amount
            );
            return Ok(());
        }

        host.transfer_native(&self.config.address, user, amount)?;
        self.incentive_paid.insert(*user);
        host.emit(Event::IncentivePaid { user: *user, amount });

        Ok(())
    }

    // ============ Operator fallbacks ============

    /// Consume `nonce` for a deposit the source committed but that never ran here
    pub fn fallback_deposit<H: Host>(
        &mut self,
        host: &mut H,
        caller: &Address,
        user: &Address,
        pool: PoolId,
        nonce: Nonce,
    ) -> DispatchResult<()> {
        self.only_operator(caller)?;
        let delegate = self.existing_delegate(user)?;
        delegate.fallback_deposit(host, &self.config.address, pool, nonce)?;
        tracing::info!("Fallback deposit: user {} pool {} nonce {}", user, pool, nonce);
        Ok(())
    }

    /// Finalize a withdrawal whose acknowledgment never completed the round trip
    pub fn fallback_withdraw<H: Host>(
        &mut self,
        host: &mut H,
        caller: &Address,
        user: &Address,
        pool: PoolId,
        amount: u64,
        nonce: Nonce,
    ) -> DispatchResult<()> {
        self.only_operator(caller)?;
        let delegate = self.existing_delegate(user)?;
        delegate.fallback_withdraw(host, &self.config.address, pool, amount, nonce)?;
        tracing::info!(
            "Fallback withdraw: user {} pool {} amount {} nonce {}",
            user,
            pool,
            amount,
            nonce
        );
        Ok(())
    }

    /// Claim pending reward for `user` in `pool`. Open to any caller.
    pub fn harvest<H: Host>(&self, host: &mut H, user: &Address, pool: PoolId) -> DispatchResult<u64> {
        self.existing_delegate(user)?.harvest(host, pool)
    }

    // ============ Administration ============

    pub fn set_operator<H: Host>(
        &mut self,
        host: &mut H,
        caller: &Address,
        operator: Address,
    ) -> DispatchResult<()> {
        self.only_owner(caller)?;
        let previous = std::mem::replace(&mut self.config.operator, operator);
        host.emit(Event::OperatorChanged {
            previous,
            current: operator,
        });
        Ok(())
    }

    pub fn transfer_ownership<H: Host>(
        &mut self,
        host: &mut H,
        caller: &Address,
        owner: Address,
    ) -> DispatchResult<()> {
        self.only_owner(caller)?;
        let previous = std::mem::replace(&mut self.config.owner, owner);
        host.emit(Event::OwnershipTransferred {
            previous,
            current: owner,
        });
        Ok(())
    }

    pub fn set_incentive_amount<H: Host>(
        &mut self,
        host: &mut H,
        caller: &Address,
        amount: u64,
    ) -> DispatchResult<()> {
        self.only_owner(caller)?;
        let previous = std::mem::replace(&mut self.config.incentive_amount, amount);
        host.emit(Event::IncentiveAmountChanged {
            previous,
            current: amount,
        });
        Ok(())
    }

    /// Move native funds out of the reserve
    pub fn withdraw_reserve<H: Host>(
        &mut self,
        host: &mut H,
        caller: &Address,
        to: &Address,
        amount: u64,
    ) -> DispatchResult<()> {
        self.only_owner(caller)?;
        let available = host.native_balance(&self.config.address);
        if available < amount {
            return Err(DispatchError::InsufficientReserve {
                required: amount,
                available,
            });
        }
        host.transfer_native(&self.config.address, to, amount)?;
        host.emit(Event::ReserveWithdrawn { to: *to, amount });
        Ok(())
    }

    // ============ Snapshots ============

    pub fn snapshot(&self) -> DispatchResult<DispatcherSnapshot> {
        let mut delegates = self
            .registry
            .delegates()
            .map(|d| d.snapshot())
            .collect::<DispatchResult<Vec<_>>>()?;
        delegates.sort_by_key(|d| d.address);

        let mut incentive_paid: Vec<Address> = self.incentive_paid.iter().copied().collect();
        incentive_paid.sort();
        let mut call_sequences: Vec<(Address, u64)> =
            self.call_sequences.iter().map(|(a, s)| (*a, *s)).collect();
        call_sequences.sort();

        Ok(DispatcherSnapshot {
            config: self.config.clone(),
            next_delegate_index: self.registry.next_index(),
            delegates,
            incentive_paid,
            call_sequences,
        })
    }

    pub fn from_snapshot(snapshot: DispatcherSnapshot) -> DispatchResult<Self> {
        let registry = DelegateRegistry::restore(
            snapshot.config.destination_chain,
            snapshot.next_delegate_index,
            snapshot.delegates,
            snapshot.config.address,
        )?;
        Ok(Self {
            config: snapshot.config,
            registry,
            incentive_paid: snapshot.incentive_paid.into_iter().collect(),
            call_sequences: snapshot.call_sequences.into_iter().collect(),
        })
    }

    fn existing_delegate(&self, user: &Address) -> DispatchResult<Arc<Delegate>> {
        self.registry
            .resolve(user)
            .ok_or(DispatchError::DelegateNotFound(*user))
    }

    fn only_operator(&self, caller: &Address) -> DispatchResult<()> {
        if *caller != self.config.operator {
            return Err(DispatchError::Unauthorized(*caller));
        }
        Ok(())
    }

    fn only_owner(&self, caller: &Address) -> DispatchResult<()> {
        if *caller != self.config.owner {
            return Err(DispatchError::Unauthorized(*caller));
        }
        Ok(())
    }
}
