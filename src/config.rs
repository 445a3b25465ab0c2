//! Environment-based configuration.
//!
//! Everything operational comes from the environment (a `.env` file is
//! honored); the candidate catalog and token price table live in the JSON
//! file `CATALOG_FILE` points at. Missing required variables fail fast at
//! startup with the variable name in the error.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};

use crate::arbitrage::scheduler::TerminationPolicy;
use crate::gas::FloorPolicy;

#[derive(Debug, Clone)]
pub struct GasSettings {
    /// Percent of expected profit to spend on gas.
    pub buffer_percent: u64,
    pub assumed_gas: u64,
    pub base_fee_wei: u128,
    pub min_priority_fee_wei: u128,
    pub floor_policy: FloorPolicy,
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub endpoint: String,
    pub api_keys: Vec<String>,
    pub slippage: String,
    pub protocols: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub root: String,
    pub bucket: String,
    pub key: String,
    pub window: usize,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub network_name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    /// Separate submission endpoint for restricted sequencers.
    pub sequencer_rpc_url: Option<String>,
    pub owner_private_key: String,
    pub settlement_address: Address,
    pub catalog_file: String,
    pub deadline: Duration,
    pub wave_size: usize,
    pub termination: TerminationPolicy,
    pub stop_on_fatal: bool,
    pub gas: GasSettings,
    pub aggregator: Option<AggregatorSettings>,
    pub history: Option<HistorySettings>,
}

pub fn load_config() -> Result<RunnerConfig> {
    let network_name = required("NETWORK_NAME")?;
    let chain_id = parsed("NETWORK_CHAIN_ID")?;
    let rpc_url = required("RPC_PROVIDER_URL")?;
    let sequencer_rpc_url = optional("SEQUENCER_RPC_PROVIDER_URL");
    let owner_private_key = required("OWNER_PRIVATE_KEY")?;
    let settlement_address = Address::from_str(&required("ARBITRAGEUR_ADDRESS")?)
        .context("ARBITRAGEUR_ADDRESS is not a valid address")?;
    let catalog_file = required("CATALOG_FILE")?;

    let timeout_seconds: f64 = parsed_or("TIMEOUT_SECONDS", 60.0)?;
    let deadline = Duration::from_secs_f64(timeout_seconds);
    let wave_size = parsed_or("WAVE_SIZE", 6usize)?;
    let termination = if parsed_or("EXIT_ON_FIRST_SUCCESS", false)? {
        TerminationPolicy::StopOnFirstSuccess
    } else {
        TerminationPolicy::RunUntilDeadline
    };
    let stop_on_fatal = parsed_or("EXIT_ON_FATAL", true)?;

    let gas = GasSettings {
        buffer_percent: parsed_or("GAS_BUFFER_PERCENT", 60u64)?,
        assumed_gas: parsed_or("GAS_ASSUMED_USAGE", 500_000u64)?,
        base_fee_wei: parsed_or("GAS_BASE_FEE_WEI", 0u128)?,
        min_priority_fee_wei: parsed_or("GAS_MIN_PRIORITY_FEE_WEI", 1_000_000_000u128)?,
        floor_policy: FloorPolicy::from_str(&parsed_or(
            "GAS_FLOOR_POLICY",
            "abstain".to_string(),
        )?)
        .map_err(anyhow::Error::msg)
        .context("GAS_FLOOR_POLICY")?,
    };

    let aggregator = optional("ONEINCH_API_ENDPOINT").map(|endpoint| {
        let api_keys = optional("ONEINCH_API_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok::<_, anyhow::Error>(AggregatorSettings {
            endpoint,
            api_keys,
            slippage: parsed_or("ONEINCH_SLIPPAGE", "50".to_string())?,
            protocols: optional("ONEINCH_PROTOCOLS"),
            timeout: Duration::from_millis(parsed_or("ONEINCH_TIMEOUT_MS", 5_000u64)?),
        })
    });
    let aggregator = aggregator.transpose()?;

    let history = optional("PRICE_HISTORY_DIR").map(|root| {
        Ok::<_, anyhow::Error>(HistorySettings {
            root,
            bucket: parsed_or("PRICE_HISTORY_BUCKET", "prices".to_string())?,
            key: parsed_or(
                "PRICE_HISTORY_KEY",
                format!("{network_name}-window.json"),
            )?,
            window: parsed_or("PRICE_HISTORY_WINDOW", 1_000usize)?,
        })
    });
    let history = history.transpose()?;

    Ok(RunnerConfig {
        network_name,
        chain_id,
        rpc_url,
        sequencer_rpc_url,
        owner_private_key,
        settlement_address,
        catalog_file,
        deadline,
        wave_size,
        termination,
        stop_on_fatal,
        gas,
        aggregator,
        history,
    })
}

fn required(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} is not set"))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T>(name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    required(name)?
        .parse()
        .with_context(|| format!("{name} is not a valid value"))
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{name} is not a valid value")),
        None => Ok(default),
    }
}
