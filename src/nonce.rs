//! Per-account nonce sequencing.
//!
//! Every transaction an account sends must carry the next unused nonce, so
//! all submission paths for one account funnel through a single
//! [`NonceSequencer`] entry. The sequencer hands out a [`NonceLease`] (an
//! owned mutex guard), which is the only way to read, advance, or resync
//! the counter; holding the lock across the whole build-sign-send sequence
//! is therefore enforced by construction rather than by convention.
//!
//! Registration is idempotent: concurrent `register` calls for the same
//! address share one map slot and perform exactly one chain fetch.

use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::debug;

use crate::chain::{ChainClient, ChainError};

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("account {0} is not registered with the nonce sequencer")]
    NotRegistered(Address),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Default)]
struct AccountNonce {
    init: OnceCell<()>,
    next: Arc<Mutex<u64>>,
}

pub struct NonceSequencer {
    chain: Arc<dyn ChainClient>,
    accounts: DashMap<Address, Arc<AccountNonce>>,
}

impl NonceSequencer {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            accounts: DashMap::new(),
        }
    }

    pub fn chain(&self) -> &dyn ChainClient {
        &*self.chain
    }

    /// Seed the counter for `address` from the chain. Safe to call
    /// concurrently and repeatedly; the fetch runs at most once.
    pub async fn register(&self, address: Address) -> Result<(), NonceError> {
        let slot = self.accounts.entry(address).or_default().value().clone();
        slot.init
            .get_or_try_init(|| async {
                let onchain = self.chain.transaction_count(address).await?;
                *slot.next.lock().await = onchain;
                debug!(account = %address, nonce = onchain, "nonce registered");
                Ok::<(), ChainError>(())
            })
            .await?;
        Ok(())
    }

    /// Acquire the per-account lock. FIFO fair; at most one lease per
    /// account exists at any time.
    pub async fn acquire(&self, address: Address) -> Result<NonceLease, NonceError> {
        let slot = self
            .accounts
            .get(&address)
            .ok_or(NonceError::NotRegistered(address))?
            .value()
            .clone();
        if slot.init.get().is_none() {
            return Err(NonceError::NotRegistered(address));
        }
        let guard = slot.next.clone().lock_owned().await;
        Ok(NonceLease { address, guard })
    }

    /// Advisory read for logging and tests; briefly takes the lock.
    pub async fn current_nonce(&self, address: Address) -> Result<u64, NonceError> {
        let slot = self
            .accounts
            .get(&address)
            .ok_or(NonceError::NotRegistered(address))?
            .value()
            .clone();
        let value = *slot.next.lock().await;
        Ok(value)
    }
}

/// Exclusive access to one account's nonce counter. Dropping the lease
/// releases the lock on every exit path.
pub struct NonceLease {
    address: Address,
    guard: OwnedMutexGuard<u64>,
}

impl NonceLease {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn nonce(&self) -> u64 {
        *self.guard
    }

    /// Consume the current nonce after the chain accepted a transaction
    /// carrying it.
    pub fn advance(&mut self) {
        *self.guard += 1;
    }

    /// Re-read the confirmed transaction count after a desync signal.
    pub async fn resync(&mut self, chain: &dyn ChainClient) -> Result<(), ChainError> {
        let onchain = chain.transaction_count(self.address).await?;
        debug!(account = %self.address, local = *self.guard, onchain, "nonce resynced");
        *self.guard = onchain;
        Ok(())
    }
}
