//! Chain access boundary.
//!
//! Everything the runner needs from a node goes through [`ChainClient`]:
//! speculative `eth_call`, gas estimation, transaction-count reads, and raw
//! submission. Keeping the surface this small lets the nonce sequencer,
//! submitter, and evaluator run against a scripted in-memory chain in tests.

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use thiserror::Error;

use crate::types::TxHandle;

pub mod rpc;

pub use rpc::RpcChainClient;

/// Failure kinds the rest of the runner dispatches on.
///
/// `Revert` carries both the decoded reason string (empty when the payload
/// was not an `Error(string)`) and the raw return data hex, because known
/// no-opportunity signatures are matched against either.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("execution reverted: {reason} (data: {data})")]
    Revert { reason: String, data: String },

    /// The node rejected our nonce: another submission path got ahead of
    /// the local counter.
    #[error("nonce out of sync with chain: {0}")]
    NonceDesync(String),

    /// Restricted-sequencer quirk: the endpoint whitelists only a few
    /// methods. `submission_accepted` is true when the rejected method was
    /// a follow-up status read, meaning the transaction itself went out.
    #[error("rpc method not whitelisted (submission accepted: {submission_accepted}): {message}")]
    MethodNotWhitelisted {
        submission_accepted: bool,
        message: String,
    },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Minimal node interface; object safe so components hold `Arc<dyn ChainClient>`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Speculative execution of `data` against `to` (eth_call).
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Gas units the node expects `data` to consume.
    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes)
        -> Result<u64, ChainError>;

    /// Confirmed transaction count, i.e. the next valid nonce.
    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    /// Submit a signed EIP-2718 envelope. Fire-and-forget; the handle does
    /// not wait for inclusion.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHandle, ChainError>;
}
