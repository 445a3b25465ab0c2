//! Core value types shared across the runner.
//!
//! A `Candidate` describes one arbitrage attempt; `ProfitResult` is the
//! outcome of one speculative evaluation; `GasBid` is the priority-fee bid
//! derived from expected profit. All monetary values are integer base units
//! (`U256`), never floating point.

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;

/// One signing account. Created at startup, owns exactly one entry in the
/// nonce sequencer.
pub struct Account {
    pub address: Address,
    pub signer: PrivateKeySigner,
}

impl Account {
    pub fn new(signer: PrivateKeySigner) -> Self {
        let address = signer.address();
        Self { address, signer }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}

/// Handle for a submitted transaction.
///
/// `hash` is `None` on the sequencer-whitelist soft-success path, where the
/// node accepted the submission but rejected the follow-up status read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle {
    pub hash: Option<B256>,
}

impl TxHandle {
    pub fn sent(hash: B256) -> Self {
        Self { hash: Some(hash) }
    }

    /// Accepted by the node, but no hash could be read back.
    pub fn unconfirmed() -> Self {
        Self { hash: None }
    }
}

/// Which settlement-contract entry point a candidate goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Flash-loan route: borrow from `borrow_pool`, settle in one call.
    /// `second_leg` selects the second-swap implementation on-chain.
    Flash { borrow_pool: Address, second_leg: u8 },
    /// Aggregator route: first leg executed with an off-chain-quoted
    /// aggregator swap, second leg through Uniswap V3 at `v3_fee`.
    Aggregator { v3_fee: u32 },
}

/// An immutable description of one arbitrage attempt. Produced by the
/// candidate catalog, consumed exactly once per evaluation.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Human label for logs, e.g. "WETH/USDCe".
    pub pair: String,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub min_profit: U256,
    pub route: Route,
    /// Sweep a range of input sizes during simulation. Flash routes only;
    /// an aggregator quote is priced for a single amount.
    pub sweep: bool,
}

/// Outcome of one speculative evaluation at the chosen amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitResult {
    pub amount_in: U256,
    pub profit: U256,
    /// Gas units from `eth_estimateGas`, when the estimate succeeded.
    pub estimated_gas: Option<u64>,
}

/// A type-2 gas bid derived from expected profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasBid {
    pub tx_type: u8,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}
