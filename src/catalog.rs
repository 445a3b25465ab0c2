//! Candidate catalog.
//!
//! Candidates live in a JSON file alongside the deployment: token pair,
//! amount range, profit floor, and route. Each wave draws a subset without
//! replacement and realizes a fresh random amount per candidate, so
//! repeated waves probe different trade sizes. The file also carries the
//! gas-pricing token table and optional extra no-opportunity revert
//! signatures.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::gas::TokenPrice;
use crate::types::{Candidate, Route};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub version: Option<String>,
    /// Gas-pricing table: wei value of one whole token.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
    /// Extra revert signatures treated as no-opportunity.
    #[serde(default)]
    pub no_opportunity_reverts: Vec<String>,
    pub candidates: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub address: String,
    pub decimals: u8,
    pub wei_per_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub pair: String,
    pub token_in: String,
    pub token_out: String,
    pub amount: AmountSpec,
    /// Profit floor in base units of `token_in`.
    pub min_profit: String,
    pub route: RouteEntry,
    #[serde(default)]
    pub sweep: bool,
}

/// Whole-token amount range; realized amounts get tenth-of-a-token
/// granularity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AmountSpec {
    pub min_whole: u64,
    pub max_whole: u64,
    pub decimals: u8,
}

impl AmountSpec {
    fn random_amount(&self, rng: &mut impl Rng) -> U256 {
        let hi_whole = self.max_whole.max(self.min_whole);
        if self.decimals == 0 {
            return U256::from(rng.random_range(self.min_whole..=hi_whole));
        }
        let tenths = rng.random_range(self.min_whole * 10..=hi_whole * 10);
        U256::from(tenths) * U256::from(10).pow(U256::from(self.decimals - 1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteEntry {
    Flash { borrow_pool: String, second_leg: u8 },
    Aggregator { v3_fee: u32 },
}

#[derive(Debug)]
struct ParsedEntry {
    pair: String,
    token_in: Address,
    token_out: Address,
    amount: AmountSpec,
    min_profit: U256,
    route: Route,
    sweep: bool,
}

impl ParsedEntry {
    fn realize(&self, rng: &mut impl Rng) -> Candidate {
        Candidate {
            pair: self.pair.clone(),
            token_in: self.token_in,
            token_out: self.token_out,
            amount_in: self.amount.random_amount(rng),
            min_profit: self.min_profit,
            route: self.route,
            sweep: self.sweep,
        }
    }
}

#[derive(Debug)]
pub struct CandidateCatalog {
    entries: Vec<ParsedEntry>,
    token_prices: HashMap<Address, TokenPrice>,
    extra_reverts: Vec<String>,
}

impl CandidateCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse catalog file {}", path.display()))?;
        Self::from_file(file)
    }

    pub fn from_file(file: CatalogFile) -> Result<Self> {
        let mut entries = Vec::with_capacity(file.candidates.len());
        for entry in &file.candidates {
            entries.push(parse_entry(entry).with_context(|| {
                format!("invalid catalog entry for pair {}", entry.pair)
            })?);
        }
        let mut token_prices = HashMap::with_capacity(file.tokens.len());
        for token in &file.tokens {
            let address = parse_address(&token.address, "token address")?;
            let wei_per_token = parse_u256(&token.wei_per_token, "wei_per_token")?;
            token_prices.insert(
                address,
                TokenPrice {
                    decimals: token.decimals,
                    wei_per_token,
                },
            );
        }
        Ok(Self {
            entries,
            token_prices,
            extra_reverts: file.no_opportunity_reverts,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn token_prices(&self) -> HashMap<Address, TokenPrice> {
        self.token_prices.clone()
    }

    pub fn extra_no_opportunity_signatures(&self) -> &[String] {
        &self.extra_reverts
    }

    /// Distinct token_in addresses; the allowance bootstrap walks these.
    pub fn input_tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = self.entries.iter().map(|e| e.token_in).collect();
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }

    /// Largest realizable input amount per token; the allowance bootstrap
    /// compares against these.
    pub fn max_amounts(&self) -> HashMap<Address, U256> {
        let mut amounts: HashMap<Address, U256> = HashMap::new();
        for entry in &self.entries {
            let max = U256::from(entry.amount.max_whole)
                * U256::from(10).pow(U256::from(entry.amount.decimals));
            let slot = amounts.entry(entry.token_in).or_default();
            if max > *slot {
                *slot = max;
            }
        }
        amounts
    }

    /// Draw up to `n` candidates without replacement, each with a freshly
    /// randomized amount.
    pub fn sample(&self, n: usize) -> Vec<Candidate> {
        let mut rng = rand::rng();
        let k = n.min(self.entries.len());
        if k == 0 {
            return Vec::new();
        }
        rand::seq::index::sample(&mut rng, self.entries.len(), k)
            .iter()
            .map(|i| self.entries[i].realize(&mut rng))
            .collect()
    }
}

fn parse_entry(entry: &CatalogEntry) -> Result<ParsedEntry> {
    if entry.amount.min_whole > entry.amount.max_whole {
        bail!(
            "amount range is inverted: {} > {}",
            entry.amount.min_whole,
            entry.amount.max_whole
        );
    }
    let route = match &entry.route {
        RouteEntry::Flash {
            borrow_pool,
            second_leg,
        } => Route::Flash {
            borrow_pool: parse_address(borrow_pool, "borrow_pool")?,
            second_leg: *second_leg,
        },
        RouteEntry::Aggregator { v3_fee } => Route::Aggregator { v3_fee: *v3_fee },
    };
    Ok(ParsedEntry {
        pair: entry.pair.clone(),
        token_in: parse_address(&entry.token_in, "token_in")?,
        token_out: parse_address(&entry.token_out, "token_out")?,
        amount: entry.amount,
        min_profit: parse_u256(&entry.min_profit, "min_profit")?,
        route,
        sweep: entry.sweep,
    })
}

fn parse_address(raw: &str, field: &str) -> Result<Address> {
    Address::from_str(raw).with_context(|| format!("invalid {field} address: {raw}"))
}

fn parse_u256(raw: &str, field: &str) -> Result<U256> {
    U256::from_str(raw).with_context(|| format!("invalid {field} value: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "version": "1",
            "tokens": [
                {
                    "address": "0x82af49447d8a07e3bd95bd0d56f35241523fbab1",
                    "decimals": 18,
                    "wei_per_token": "1000000000000000000"
                }
            ],
            "no_opportunity_reverts": ["K too small"],
            "candidates": [
                {
                    "pair": "WETH/USDCe",
                    "token_in": "0x82af49447d8a07e3bd95bd0d56f35241523fbab1",
                    "token_out": "0xff970a61a04b1ca14834a43f5de4533ebddb5cc8",
                    "amount": { "min_whole": 1, "max_whole": 10, "decimals": 18 },
                    "min_profit": "100000000000000",
                    "route": {
                        "kind": "flash",
                        "borrow_pool": "0xc31e54c7a869b9fcbecc14363cf510d1c41fa443",
                        "second_leg": 1
                    },
                    "sweep": true
                },
                {
                    "pair": "WETH/ARB",
                    "token_in": "0x82af49447d8a07e3bd95bd0d56f35241523fbab1",
                    "token_out": "0x912ce59144191c1204e64559fe8253a0e49e6548",
                    "amount": { "min_whole": 1, "max_whole": 5, "decimals": 18 },
                    "min_profit": "100000000000000",
                    "route": { "kind": "aggregator", "v3_fee": 500 }
                }
            ]
        }"#
    }

    fn catalog() -> CandidateCatalog {
        let file: CatalogFile = serde_json::from_str(sample_json()).unwrap();
        CandidateCatalog::from_file(file).unwrap()
    }

    #[test]
    fn parses_routes_tokens_and_reverts() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.token_prices().len(), 1);
        assert_eq!(catalog.extra_no_opportunity_signatures(), ["K too small"]);
        assert_eq!(catalog.input_tokens().len(), 1);
    }

    #[test]
    fn sample_is_without_replacement() {
        let catalog = catalog();
        for _ in 0..20 {
            let wave = catalog.sample(2);
            assert_eq!(wave.len(), 2);
            assert_ne!(wave[0].pair, wave[1].pair);
        }
        // Oversampling clamps to the catalog size.
        assert_eq!(catalog.sample(10).len(), 2);
    }

    #[test]
    fn realized_amounts_stay_in_range() {
        let catalog = catalog();
        let one = U256::from(10u64).pow(U256::from(18));
        for _ in 0..50 {
            for candidate in catalog.sample(2) {
                let (lo, hi) = match candidate.pair.as_str() {
                    "WETH/USDCe" => (one, one * U256::from(10u64)),
                    _ => (one, one * U256::from(5u64)),
                };
                assert!(candidate.amount_in >= lo, "{} too small", candidate.amount_in);
                assert!(candidate.amount_in <= hi, "{} too large", candidate.amount_in);
                // Tenth-of-a-token granularity.
                assert_eq!(
                    candidate.amount_in % (one / U256::from(10u64)),
                    U256::ZERO
                );
            }
        }
    }

    #[test]
    fn max_amounts_take_the_largest_range_per_token() {
        let catalog = catalog();
        let amounts = catalog.max_amounts();
        assert_eq!(amounts.len(), 1);
        let weth = Address::from_str("0x82af49447d8a07e3bd95bd0d56f35241523fbab1").unwrap();
        assert_eq!(
            amounts[&weth],
            U256::from(10u64) * U256::from(10u64).pow(U256::from(18))
        );
    }

    #[test]
    fn sweep_defaults_off() {
        let catalog = catalog();
        let aggregator = catalog
            .sample(2)
            .into_iter()
            .find(|c| c.pair == "WETH/ARB")
            .unwrap();
        assert!(!aggregator.sweep);
        assert_eq!(aggregator.route, Route::Aggregator { v3_fee: 500 });
    }

    #[test]
    fn bad_address_is_rejected_with_context() {
        let mut file: CatalogFile = serde_json::from_str(sample_json()).unwrap();
        file.candidates[0].token_in = "not-an-address".to_string();
        let err = CandidateCatalog::from_file(file).unwrap_err();
        assert!(format!("{err:#}").contains("WETH/USDCe"));
    }

    #[test]
    fn inverted_amount_range_is_rejected() {
        let mut file: CatalogFile = serde_json::from_str(sample_json()).unwrap();
        file.candidates[0].amount.min_whole = 20;
        assert!(CandidateCatalog::from_file(file).is_err());
    }
}
