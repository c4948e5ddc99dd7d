//! Delegate Registry
//!
//! Bidirectional user <-> delegate mapping. Addresses are allocated from a
//! per-chain index so the next address is known before creation.

use relay_types::{Address, ChainId};
use std::{collections::HashMap, sync::Arc};

use crate::{
    delegate::Delegate,
    error::{DispatchError, DispatchResult},
    state::DelegateSnapshot,
};

#[derive(Debug)]
pub struct DelegateRegistry {
    chain: ChainId,
    next_index: u64,
    by_user: HashMap<Address, Arc<Delegate>>,
    by_delegate: HashMap<Address, Address>,
}

impl DelegateRegistry {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            next_index: 0,
            by_user: HashMap::new(),
            by_delegate: HashMap::new(),
        }
    }

    /// Rebuild a registry from persisted delegates
    pub fn restore(
        chain: ChainId,
        next_index: u64,
        delegates: Vec<DelegateSnapshot>,
        dispatcher: Address,
    ) -> DispatchResult<Self> {
        let mut registry = Self::new(chain);
        registry.next_index = next_index;
        for snapshot in delegates {
            if registry.by_user.contains_key(&snapshot.user) {
                return Err(DispatchError::DelegateExists(snapshot.user));
            }
            if registry.by_delegate.contains_key(&snapshot.address) {
                return Err(DispatchError::DelegateAddressCollision(snapshot.address));
            }
            let delegate = Arc::new(Delegate::with_state(
                snapshot.address,
                snapshot.user,
                dispatcher,
                snapshot.state,
            ));
            registry.by_delegate.insert(snapshot.address, snapshot.user);
            registry.by_user.insert(snapshot.user, delegate);
        }
        Ok(registry)
    }

    pub fn resolve(&self, user: &Address) -> Option<Arc<Delegate>> {
        self.by_user.get(user).cloned()
    }

    /// User bound to `delegate`
    pub fn user_of(&self, delegate: &Address) -> Option<Address> {
        self.by_delegate.get(delegate).copied()
    }

    /// Address the next `create_for` call will allocate
    pub fn predict_next(&self) -> Address {
        Address::derive_delegate(self.chain, self.next_index)
    }

    /// Create the delegate for `user`
    pub fn create_for(&mut self, user: Address, dispatcher: Address) -> DispatchResult<Arc<Delegate>> {
        if self.by_user.contains_key(&user) {
            return Err(DispatchError::DelegateExists(user));
        }
        let address = self.predict_next();
        if self.by_delegate.contains_key(&address) {
            return Err(DispatchError::DelegateAddressCollision(address));
        }

        let delegate = Arc::new(Delegate::new(address, user, dispatcher));
        self.next_index += 1;
        self.by_delegate.insert(address, user);
        self.by_user.insert(user, delegate.clone());

        tracing::info!("Created delegate {} for user {}", address, user);

        Ok(delegate)
    }

    /// Undo the most recent `create_for(user)` when its dispatch failed
    pub(crate) fn rollback_creation(&mut self, user: &Address) {
        if let Some(delegate) = self.by_user.remove(user) {
            self.by_delegate.remove(&delegate.address());
            self.next_index = self.next_index.saturating_sub(1);
            tracing::debug!("Rolled back delegate {} for user {}", delegate.address(), user);
        }
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn delegates(&self) -> impl Iterator<Item = &Arc<Delegate>> {
        self.by_user.values()
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}
