//! Flash arbitrage runner.
//!
//! Evaluates DEX arbitrage candidates by speculative on-chain execution
//! and submits the profitable ones, with per-account nonce sequencing,
//! profit-derived gas bidding, and a timed-batch scheduling loop.

pub mod arbitrage;
pub mod catalog;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod gas;
pub mod history;
pub mod nonce;
pub mod quotes;
pub mod types;

pub use arbitrage::{Evaluation, LoopSummary, OpportunityEvaluator, SchedulingLoop};
pub use catalog::CandidateCatalog;
pub use chain::{ChainClient, ChainError, RpcChainClient};
pub use nonce::{NonceLease, NonceSequencer};
pub use types::{Account, Candidate, GasBid, ProfitResult, Route, TxHandle};
