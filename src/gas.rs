//! Profit-derived gas bidding.
//!
//! The bid spends a configured fraction of the expected profit on gas:
//! profit is converted to wei through a per-token price table, buffered
//! down, and divided by the expected gas usage. Everything is integer
//! `U256` arithmetic in base units.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use tracing::warn;

use crate::types::GasBid;

/// What to do when the computed priority fee lands below the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloorPolicy {
    /// Skip the opportunity; a floor-priced bid would be unprofitable.
    Abstain,
    /// Bid the floor anyway and accept the marginal loss.
    Clamp,
}

impl FromStr for FloorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abstain" => Ok(Self::Abstain),
            "clamp" => Ok(Self::Clamp),
            other => Err(format!("unknown floor policy '{other}' (abstain|clamp)")),
        }
    }
}

/// Wei value of one whole token, with the token's decimals.
#[derive(Debug, Clone, Copy)]
pub struct TokenPrice {
    pub decimals: u8,
    pub wei_per_token: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasQuote {
    Bid(GasBid),
    Abstain,
}

pub struct GasPricer {
    table: HashMap<Address, TokenPrice>,
    /// Percent of profit to spend on gas.
    buffer_percent: u64,
    /// Gas usage assumed when no estimate is available.
    assumed_gas: u64,
    base_fee_wei: u128,
    min_priority_fee_wei: u128,
    policy: FloorPolicy,
}

impl GasPricer {
    pub fn new(
        table: HashMap<Address, TokenPrice>,
        buffer_percent: u64,
        assumed_gas: u64,
        base_fee_wei: u128,
        min_priority_fee_wei: u128,
        policy: FloorPolicy,
    ) -> Self {
        Self {
            table,
            buffer_percent,
            assumed_gas,
            base_fee_wei,
            min_priority_fee_wei,
            policy,
        }
    }

    /// Price a bid for `profit` (base units of `token`). Returns `Abstain`
    /// for unpriceable tokens and, under [`FloorPolicy::Abstain`], for bids
    /// below the floor.
    pub fn price(&self, token: Address, profit: U256, estimated_gas: Option<u64>) -> GasQuote {
        let Some(entry) = self.table.get(&token) else {
            warn!(%token, "no price entry for token, abstaining from gas bid");
            return GasQuote::Abstain;
        };

        let scale = U256::from(10).pow(U256::from(entry.decimals));
        let profit_wei = profit * entry.wei_per_token / scale;
        let budget_wei = profit_wei * U256::from(self.buffer_percent) / U256::from(100);

        let gas = estimated_gas.unwrap_or(self.assumed_gas).max(1);
        let fee_wei: u128 = (budget_wei / U256::from(gas)).saturating_to();
        let priority = fee_wei.saturating_sub(self.base_fee_wei);

        let priority = if priority < self.min_priority_fee_wei {
            match self.policy {
                FloorPolicy::Abstain => return GasQuote::Abstain,
                FloorPolicy::Clamp => self.min_priority_fee_wei,
            }
        } else {
            priority
        };

        GasQuote::Bid(GasBid {
            tx_type: 2,
            max_fee_per_gas: priority.saturating_add(self.base_fee_wei),
            max_priority_fee_per_gas: priority,
        })
    }
}
