//! Revert classification.
//!
//! Settlement reverts fall into two classes: expected "no opportunity"
//! signals thrown by routers and by the contract's own profit guard, and
//! everything else. The distinction gates logging noise and, more
//! importantly, fatality: an unknown revert always propagates.

use crate::chain::ChainError;

/// Reverts the routers and the settlement contract throw when a trade
/// simply does not clear. Custom-error selectors are matched against raw
/// revert data, text reasons against the decoded reason string.
const DEFAULT_NO_OPPORTUNITY_SIGNATURES: &[&str] = &[
    // Uniswap V3 router slippage guard
    "Too little received",
    // InsufficientOutputAmount()
    "0x42301c23",
    // DODO-style pools
    "baseAmount_LT_minBaseAmount",
    "quoteAmount_LT_minQuoteAmount",
    "base2Amount_LT_minBase2Amount",
    "!ORACLE_FEASIBLE",
    "insufficient amountOut",
    "poolAmount < buffer",
    // NoProfit()
    "0xe39aafee",
    // SwapFail()
    "0xb70946b8",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertClass {
    /// The trade would not clear; skip quietly.
    NoOpportunity,
    /// Anything unrecognized. Never swallowed.
    Fatal,
}

pub struct RevertClassifier {
    signatures: Vec<String>,
}

impl RevertClassifier {
    pub fn with_defaults() -> Self {
        Self {
            signatures: DEFAULT_NO_OPPORTUNITY_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Add catalog-supplied signatures on top of the defaults.
    pub fn extend(&mut self, extra: impl IntoIterator<Item = String>) {
        self.signatures.extend(extra);
    }

    /// Classify a revert by substring match against the decoded reason and
    /// the raw data hex. Pure; identical inputs always classify alike.
    pub fn classify(&self, reason: &str, data: &str) -> RevertClass {
        let data_lower = data.to_ascii_lowercase();
        let known = self.signatures.iter().any(|sig| {
            if sig.starts_with("0x") {
                reason.contains(sig.as_str()) || data_lower.contains(&sig.to_ascii_lowercase())
            } else {
                reason.contains(sig.as_str())
            }
        });
        if known {
            RevertClass::NoOpportunity
        } else {
            RevertClass::Fatal
        }
    }

    /// Convenience for classifying a [`ChainError::Revert`].
    pub fn classify_error(&self, err: &ChainError) -> RevertClass {
        match err {
            ChainError::Revert { reason, data } => self.classify(reason, data),
            _ => RevertClass::Fatal,
        }
    }
}
