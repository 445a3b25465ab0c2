//! Swap-quote aggregator client.
//!
//! Aggregator-routed candidates need an off-chain quote: the aggregator
//! returns the calldata for the first swap leg, which is forwarded into the
//! settlement contract. Rate limiting (HTTP 429) is an expected operating
//! condition and gets its own error variant so the evaluator can back off
//! instead of failing the candidate.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Source of swap quotes; the evaluator only sees this trait.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_swap(
        &self,
        src: Address,
        dst: Address,
        amount: U256,
        from: Address,
    ) -> Result<SwapQuote, QuoteError>;
}

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("aggregator rate limited (HTTP 429)")]
    RateLimited,
    #[error("aggregator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("aggregator response missing swap payload: {0}")]
    MissingPayload(String),
    #[error("unparseable aggregator field {field}: {value}")]
    Malformed { field: &'static str, value: String },
    #[error("aggregator transport error: {0}")]
    Transport(String),
}

/// One priced swap: target contract, calldata, and the quoted output amount.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub to: Address,
    pub data: Bytes,
    pub to_amount: U256,
}

#[derive(Debug, Clone)]
pub struct QuoteConfig {
    /// Base URL, e.g. `https://api.1inch.dev/swap/v6.0/42161`.
    pub endpoint: String,
    /// Bearer tokens, load-balanced by random choice per request.
    pub api_keys: Vec<String>,
    /// Slippage tolerance in the aggregator's own unit (percent string).
    pub slippage: String,
    /// Optional protocol whitelist passed through verbatim.
    pub protocols: Option<String>,
    pub timeout: Duration,
}

pub struct QuoteClient {
    http: reqwest::Client,
    config: QuoteConfig,
}

#[derive(Deserialize)]
struct SwapResponse {
    tx: Option<SwapTx>,
    #[serde(rename = "toAmount")]
    to_amount: Option<String>,
}

#[derive(Deserialize)]
struct SwapTx {
    to: Option<String>,
    data: Option<String>,
}

impl QuoteClient {
    pub fn new(config: QuoteConfig) -> Result<Self, QuoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QuoteError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Fetch swap calldata for `amount` of `src` into `dst`, executed by
    /// `from` (the settlement contract).
    pub async fn fetch_swap(
        &self,
        src: Address,
        dst: Address,
        amount: U256,
        from: Address,
    ) -> Result<SwapQuote, QuoteError> {
        let url = format!("{}/swap", self.config.endpoint.trim_end_matches('/'));
        let mut query: Vec<(&str, String)> = vec![
            ("src", src.to_string()),
            ("dst", dst.to_string()),
            ("amount", amount.to_string()),
            ("from", from.to_string()),
            ("slippage", self.config.slippage.clone()),
            ("disableEstimate", "true".to_string()),
        ];
        if let Some(protocols) = &self.config.protocols {
            query.push(("protocols", protocols.clone()));
        }

        let mut request = self.http.get(&url).query(&query);
        if !self.config.api_keys.is_empty() {
            let key = &self.config.api_keys
                [rand::rng().random_range(0..self.config.api_keys.len())];
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QuoteError::Transport(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(QuoteError::RateLimited);
        }
        let body = response
            .text()
            .await
            .map_err(|e| QuoteError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(QuoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(%src, %dst, %amount, "swap quote fetched");
        parse_swap_body(&body)
    }
}

#[async_trait]
impl QuoteSource for QuoteClient {
    async fn fetch_swap(
        &self,
        src: Address,
        dst: Address,
        amount: U256,
        from: Address,
    ) -> Result<SwapQuote, QuoteError> {
        QuoteClient::fetch_swap(self, src, dst, amount, from).await
    }
}

fn parse_swap_body(body: &str) -> Result<SwapQuote, QuoteError> {
    let parsed: SwapResponse = serde_json::from_str(body)
        .map_err(|_| QuoteError::MissingPayload(body.to_string()))?;
    let tx = parsed
        .tx
        .ok_or_else(|| QuoteError::MissingPayload(body.to_string()))?;
    let to = tx
        .to
        .ok_or_else(|| QuoteError::MissingPayload(body.to_string()))?;
    let data = tx
        .data
        .ok_or_else(|| QuoteError::MissingPayload(body.to_string()))?;

    let to = Address::from_str(&to).map_err(|_| QuoteError::Malformed {
        field: "tx.to",
        value: to.clone(),
    })?;
    let data = Bytes::from_str(&data).map_err(|_| QuoteError::Malformed {
        field: "tx.data",
        value: data.clone(),
    })?;
    let to_amount = match parsed.to_amount {
        Some(raw) => U256::from_str(&raw).map_err(|_| QuoteError::Malformed {
            field: "toAmount",
            value: raw.clone(),
        })?,
        None => U256::ZERO,
    };

    Ok(SwapQuote {
        to,
        data,
        to_amount,
    })
}
