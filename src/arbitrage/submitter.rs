//! Transaction submission under a nonce lease.
//!
//! The submitter brackets a caller-supplied build-and-send closure with the
//! account's nonce lease: the closure receives the nonce to use, and the
//! counter only advances when the chain actually accepted the carrying
//! transaction. A desync signal resyncs the counter in place and surfaces
//! as [`SubmitError::ResetNonce`]; retrying is the caller's decision.

use std::future::Future;
use std::sync::Arc;

use alloy::primitives::Address;
use thiserror::Error;
use tracing::warn;

use crate::chain::ChainError;
use crate::nonce::{NonceError, NonceSequencer};
use crate::types::TxHandle;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The nonce was stale; it has been resynced from the chain. The
    /// attempted transaction was not accepted.
    #[error("nonce was out of sync and has been reset; retry with a fresh nonce")]
    ResetNonce,
    #[error(transparent)]
    Sequencer(#[from] NonceError),
    #[error(transparent)]
    Chain(ChainError),
}

pub struct TransactionSubmitter {
    sequencer: Arc<NonceSequencer>,
}

impl TransactionSubmitter {
    pub fn new(sequencer: Arc<NonceSequencer>) -> Self {
        Self { sequencer }
    }

    /// Run `build_and_send` with the account's next nonce, holding the
    /// account lock for the whole build-sign-send sequence.
    ///
    /// Outcomes:
    /// - success: nonce advances, handle returned;
    /// - [`ChainError::NonceDesync`]: nonce resynced, [`SubmitError::ResetNonce`];
    /// - whitelist rejection of a follow-up read: the transaction went out,
    ///   so the nonce advances and an unconfirmed handle is returned;
    /// - any other failure: nonce untouched, error propagated.
    pub async fn submit<F, Fut>(
        &self,
        account: Address,
        build_and_send: F,
    ) -> Result<TxHandle, SubmitError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<TxHandle, ChainError>>,
    {
        let mut lease = self.sequencer.acquire(account).await?;
        match build_and_send(lease.nonce()).await {
            Ok(handle) => {
                lease.advance();
                Ok(handle)
            }
            Err(ChainError::NonceDesync(message)) => {
                warn!(%account, %message, "nonce desync, resyncing from chain");
                lease
                    .resync(self.sequencer.chain())
                    .await
                    .map_err(SubmitError::Chain)?;
                Err(SubmitError::ResetNonce)
            }
            Err(ChainError::MethodNotWhitelisted {
                submission_accepted: true,
                message,
            }) => {
                warn!(
                    %account,
                    %message,
                    "transaction accepted but status read rejected by sequencer whitelist"
                );
                lease.advance();
                Ok(TxHandle::unconfirmed())
            }
            Err(other) => Err(SubmitError::Chain(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use alloy::primitives::B256;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    fn owner() -> Address {
        Address::repeat_byte(0x0f)
    }

    async fn setup(start_nonce: u64) -> (Arc<MockChain>, Arc<NonceSequencer>, TransactionSubmitter) {
        let chain = Arc::new(MockChain::new(start_nonce));
        let sequencer = Arc::new(NonceSequencer::new(chain.clone()));
        sequencer.register(owner()).await.unwrap();
        let submitter = TransactionSubmitter::new(sequencer.clone());
        (chain, sequencer, submitter)
    }

    #[tokio::test]
    async fn success_advances_the_nonce() {
        let (_, sequencer, submitter) = setup(3).await;
        let handle = submitter
            .submit(owner(), |nonce| async move {
                assert_eq!(nonce, 3);
                Ok(TxHandle::sent(B256::repeat_byte(1)))
            })
            .await
            .unwrap();
        assert_eq!(handle.hash, Some(B256::repeat_byte(1)));
        assert_eq!(sequencer.current_nonce(owner()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn failure_leaves_the_nonce_untouched() {
        let (_, sequencer, submitter) = setup(3).await;
        let result = submitter
            .submit(owner(), |_| async {
                Err(ChainError::Rpc("gateway timeout".to_string()))
            })
            .await;
        assert!(matches!(result, Err(SubmitError::Chain(_))));
        assert_eq!(sequencer.current_nonce(owner()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn concurrent_submissions_are_serialized_and_gap_free() {
        let (_, sequencer, submitter) = setup(50).await;
        let submitter = Arc::new(submitter);
        let in_flight = Arc::new(AtomicI64::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let submitter = submitter.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                submitter
                    .submit(owner(), move |nonce| async move {
                        assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        let mut hash = [0u8; 32];
                        hash[24..].copy_from_slice(&nonce.to_be_bytes());
                        Ok(TxHandle::sent(B256::from(hash)))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut nonces: Vec<u64> = Vec::new();
        for h in handles {
            let handle = h.await.unwrap();
            let hash = handle.hash.unwrap();
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&hash[24..]);
            nonces.push(u64::from_be_bytes(raw));
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (50..60).collect::<Vec<_>>());
        assert_eq!(sequencer.current_nonce(owner()).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn desync_resyncs_and_surfaces_reset() {
        let (chain, sequencer, submitter) = setup(10).await;

        // Drift the local counter ahead of the chain.
        {
            let mut lease = sequencer.acquire(owner()).await.unwrap();
            lease.advance();
            lease.advance();
        }
        chain.onchain_nonce.store(10, Ordering::SeqCst);

        let result = submitter
            .submit(owner(), |_| async {
                Err(ChainError::NonceDesync("nonce too low".to_string()))
            })
            .await;
        assert!(matches!(result, Err(SubmitError::ResetNonce)));

        // Next submission picks up the resynced value.
        submitter
            .submit(owner(), |nonce| async move {
                assert_eq!(nonce, 10);
                Ok(TxHandle::sent(B256::ZERO))
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn whitelist_soft_success_advances_without_a_hash() {
        let (_, sequencer, submitter) = setup(5).await;
        let handle = submitter
            .submit(owner(), |_| async {
                Err(ChainError::MethodNotWhitelisted {
                    submission_accepted: true,
                    message: "rpc method is not whitelisted: eth_blockNumber".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(handle.hash, None);
        assert_eq!(sequencer.current_nonce(owner()).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn whitelist_hard_rejection_propagates() {
        let (_, sequencer, submitter) = setup(5).await;
        let result = submitter
            .submit(owner(), |_| async {
                Err(ChainError::MethodNotWhitelisted {
                    submission_accepted: false,
                    message: "rpc method is not whitelisted: eth_sendRawTransaction".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(SubmitError::Chain(_))));
        assert_eq!(sequencer.current_nonce(owner()).await.unwrap(), 5);
    }
}
