//! Candidate evaluation: quote, simulate, price, submit.
//!
//! One `evaluate` call walks a candidate through the whole pipeline:
//! fetch an aggregator quote when the route needs one, speculatively
//! execute the settlement call across a sweep of input sizes, pick the
//! most profitable size, derive a gas bid from the expected profit, and
//! hand the signed transaction to the submitter. Fire-and-forget; nothing
//! here waits for inclusion.
//!
//! The outcome split is deliberate: expected conditions (no opportunity,
//! rate limiting, a lost nonce race, an abstaining pricer) come back as
//! `Ok(Evaluation::..)`, while anything unexpected is an `Err` the caller
//! cannot ignore.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::rpc::build_signed_tx;
use crate::chain::{ChainClient, ChainError};
use crate::contracts::{CodecError, SettlementCodec};
use crate::gas::{GasPricer, GasQuote};
use crate::history::PriceHistory;
use crate::quotes::{QuoteError, QuoteSource, SwapQuote};
use crate::types::{Account, Candidate, ProfitResult, Route, TxHandle};

use super::classify::{RevertClass, RevertClassifier};
use super::submitter::{SubmitError, TransactionSubmitter};

/// Input-size sweep, percent of the candidate's `amount_in`.
const SWEEP_PERCENTS: [u64; 5] = [100, 80, 60, 40, 20];

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("aggregator route configured without a quote source")]
    AggregatorUnconfigured,
    #[error("quote fetch failed: {0}")]
    Quote(#[from] QuoteError),
    #[error("unexpected settlement revert: {reason} (data: {data})")]
    UnexpectedRevert { reason: String, data: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Chain(ChainError),
    #[error(transparent)]
    Submit(SubmitError),
}

/// Expected evaluation outcomes. Per-candidate; a wave aggregates these.
#[derive(Debug)]
pub enum Evaluation {
    Submitted {
        handle: TxHandle,
        amount_in: U256,
        profit: U256,
    },
    /// No input size cleared the profit guard; `reason` is the last
    /// classified revert.
    NoOpportunity { reason: String },
    /// The pricer declined to bid below the fee floor.
    Abstained,
    /// Quote fetch hit HTTP 429; a jittered backoff was observed.
    RateLimited { backed_off: Duration },
    /// Another path consumed our nonce; the counter has been resynced.
    NonceConflict,
}

pub struct EvaluatorConfig {
    pub chain_id: u64,
    /// Settlement contract address; simulation target and tx recipient.
    pub settlement: Address,
    /// Margin on top of the gas estimate, percent.
    pub gas_margin_percent: u64,
    /// Gas limit when estimation fails.
    pub fallback_gas_limit: u64,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            settlement: Address::ZERO,
            gas_margin_percent: 20,
            fallback_gas_limit: 800_000,
            backoff_min: Duration::from_millis(200),
            backoff_max: Duration::from_millis(1000),
        }
    }
}

pub struct OpportunityEvaluator {
    chain: Arc<dyn ChainClient>,
    /// Submission endpoint; may differ from `chain` on sequencer chains.
    send_chain: Arc<dyn ChainClient>,
    submitter: Arc<TransactionSubmitter>,
    codec: Arc<dyn SettlementCodec>,
    classifier: RevertClassifier,
    pricer: GasPricer,
    account: Arc<Account>,
    quotes: Option<Arc<dyn QuoteSource>>,
    history: Option<Arc<PriceHistory>>,
    config: EvaluatorConfig,
}

struct SweepOutcome {
    best: Option<(U256, U256, Bytes)>,
    last_skip: Option<String>,
}

impl OpportunityEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        send_chain: Arc<dyn ChainClient>,
        submitter: Arc<TransactionSubmitter>,
        codec: Arc<dyn SettlementCodec>,
        classifier: RevertClassifier,
        pricer: GasPricer,
        account: Arc<Account>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            chain,
            send_chain,
            submitter,
            codec,
            classifier,
            pricer,
            account,
            quotes: None,
            history: None,
            config,
        }
    }

    pub fn with_quotes(mut self, quotes: Arc<dyn QuoteSource>) -> Self {
        self.quotes = Some(quotes);
        self
    }

    pub fn with_history(mut self, history: Arc<PriceHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn evaluate(&self, candidate: &Candidate) -> Result<Evaluation, EvalError> {
        let quote = match candidate.route {
            Route::Aggregator { .. } => {
                let source = self
                    .quotes
                    .as_ref()
                    .ok_or(EvalError::AggregatorUnconfigured)?;
                match source
                    .fetch_swap(
                        candidate.token_in,
                        candidate.token_out,
                        candidate.amount_in,
                        self.config.settlement,
                    )
                    .await
                {
                    Ok(quote) => {
                        if let Some(history) = &self.history {
                            history.record(&candidate.pair, candidate.amount_in, quote.to_amount);
                        }
                        Some(quote)
                    }
                    Err(QuoteError::RateLimited) => {
                        let backed_off = jittered_backoff(
                            self.config.backoff_min,
                            self.config.backoff_max,
                        );
                        debug!(
                            pair = %candidate.pair,
                            backoff_ms = backed_off.as_millis() as u64,
                            "aggregator rate limited, backing off"
                        );
                        tokio::time::sleep(backed_off).await;
                        return Ok(Evaluation::RateLimited { backed_off });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Route::Flash { .. } => None,
        };

        let outcome = self.sweep(candidate, quote.as_ref()).await?;
        let Some((amount_in, profit, data)) = outcome.best else {
            let reason = outcome
                .last_skip
                .unwrap_or_else(|| "no profitable size".to_string());
            debug!(pair = %candidate.pair, %reason, "no opportunity");
            return Ok(Evaluation::NoOpportunity { reason });
        };

        let estimated_gas = match self
            .chain
            .estimate_gas(self.account.address, self.config.settlement, data.clone())
            .await
        {
            Ok(gas) => Some(gas),
            Err(e) => {
                debug!(pair = %candidate.pair, error = %e, "gas estimate failed, using fallback ceiling");
                None
            }
        };
        let best = ProfitResult {
            amount_in,
            profit,
            estimated_gas,
        };

        let bid = match self
            .pricer
            .price(candidate.token_in, best.profit, best.estimated_gas)
        {
            GasQuote::Bid(bid) => bid,
            GasQuote::Abstain => {
                debug!(pair = %candidate.pair, profit = %best.profit, "pricer abstained");
                return Ok(Evaluation::Abstained);
            }
        };
        let gas_limit = best
            .estimated_gas
            .map(|g| g + g * self.config.gas_margin_percent / 100)
            .unwrap_or(self.config.fallback_gas_limit);

        let account = Arc::clone(&self.account);
        let send_chain = Arc::clone(&self.send_chain);
        let to = self.config.settlement;
        let chain_id = self.config.chain_id;
        let tx_data = data.clone();
        let result = self
            .submitter
            .submit(self.account.address, move |nonce| async move {
                let raw =
                    build_signed_tx(&account, to, tx_data, nonce, gas_limit, &bid, chain_id)?;
                send_chain.send_raw_transaction(raw).await
            })
            .await;

        match result {
            Ok(handle) => {
                info!(
                    pair = %candidate.pair,
                    amount_in = %best.amount_in,
                    profit = %best.profit,
                    max_priority_fee_per_gas = bid.max_priority_fee_per_gas,
                    gas_limit,
                    hash = ?handle.hash,
                    "arbitrage transaction sent"
                );
                Ok(Evaluation::Submitted {
                    handle,
                    amount_in: best.amount_in,
                    profit: best.profit,
                })
            }
            Err(SubmitError::ResetNonce) => {
                warn!(pair = %candidate.pair, "lost nonce race, skipping candidate");
                Ok(Evaluation::NonceConflict)
            }
            Err(e) => Err(EvalError::Submit(e)),
        }
    }

    /// Simulate the settlement call across the input-size sweep and keep
    /// the strictly most profitable size. Flash routes only; an aggregator
    /// quote is priced for one amount, so it is simulated as-is.
    async fn sweep(
        &self,
        candidate: &Candidate,
        quote: Option<&SwapQuote>,
    ) -> Result<SweepOutcome, EvalError> {
        let percents: &[u64] = if candidate.sweep && matches!(candidate.route, Route::Flash { .. })
        {
            &SWEEP_PERCENTS
        } else {
            &[100]
        };

        let mut outcome = SweepOutcome {
            best: None,
            last_skip: None,
        };
        for percent in percents {
            let amount = candidate.amount_in * U256::from(*percent) / U256::from(100);
            if amount.is_zero() {
                continue;
            }
            let data = self.codec.encode(candidate, amount, quote)?;
            match self.chain.call(self.config.settlement, data.clone()).await {
                Ok(ret) => {
                    let profit = self.codec.decode_profit(&ret)?;
                    let improves = outcome
                        .best
                        .as_ref()
                        .map_or(true, |(_, best_profit, _)| profit > *best_profit);
                    if improves {
                        outcome.best = Some((amount, profit, data));
                    }
                }
                Err(ChainError::Revert { reason, data }) => {
                    match self.classifier.classify(&reason, &data) {
                        RevertClass::NoOpportunity => {
                            debug!(pair = %candidate.pair, %amount, %reason, "size not viable");
                            outcome.last_skip = Some(reason);
                        }
                        RevertClass::Fatal => {
                            return Err(EvalError::UnexpectedRevert { reason, data });
                        }
                    }
                }
                Err(other) => return Err(EvalError::Chain(other)),
            }
        }
        Ok(outcome)
    }
}

/// Uniform random backoff in `[min, max]`.
fn jittered_backoff(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = (max.as_millis() as u64).max(lo);
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::contracts::{FlashSettlement, IFlashArbitrageur};
    use crate::gas::{FloorPolicy, GasPricer, TokenPrice};
    use crate::nonce::NonceSequencer;
    use alloy::consensus::{Transaction, TxEnvelope};
    use alloy::eips::eip2718::Decodable2718;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::sol_types::SolCall;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn token_in() -> Address {
        Address::repeat_byte(0x11)
    }

    fn flash_candidate(sweep: bool) -> Candidate {
        Candidate {
            pair: "WETH/USDCe".to_string(),
            token_in: token_in(),
            token_out: Address::repeat_byte(0x22),
            amount_in: U256::from(100u64),
            min_profit: U256::from(1u64),
            route: Route::Flash {
                borrow_pool: Address::repeat_byte(0x33),
                second_leg: 0,
            },
            sweep,
        }
    }

    /// Prices the test token so single-digit profits clear the fee floor.
    fn test_pricer() -> GasPricer {
        let table = HashMap::from([(
            token_in(),
            TokenPrice {
                decimals: 0,
                wei_per_token: U256::from(10u64).pow(U256::from(18)),
            },
        )]);
        GasPricer::new(table, 50, 500_000, 0, 1_000_000_000, FloorPolicy::Abstain)
    }

    async fn evaluator(chain: Arc<MockChain>) -> (OpportunityEvaluator, Arc<NonceSequencer>) {
        let sequencer = Arc::new(NonceSequencer::new(chain.clone()));
        let account = Arc::new(Account::new(PrivateKeySigner::random()));
        sequencer.register(account.address).await.unwrap();
        let submitter = Arc::new(TransactionSubmitter::new(sequencer.clone()));
        let config = EvaluatorConfig {
            chain_id: 42161,
            settlement: Address::repeat_byte(0x77),
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(3),
            ..EvaluatorConfig::default()
        };
        let evaluator = OpportunityEvaluator::new(
            chain.clone(),
            chain,
            submitter,
            Arc::new(FlashSettlement),
            RevertClassifier::with_defaults(),
            test_pricer(),
            account,
            config,
        );
        (evaluator, sequencer)
    }

    fn decode_sent(raw: &Bytes) -> TxEnvelope {
        TxEnvelope::decode_2718(&mut raw.as_ref()).unwrap()
    }

    struct ScriptedQuotes {
        result: std::sync::Mutex<Option<Result<SwapQuote, QuoteError>>>,
    }

    impl ScriptedQuotes {
        fn new(result: Result<SwapQuote, QuoteError>) -> Self {
            Self {
                result: std::sync::Mutex::new(Some(result)),
            }
        }
    }

    #[async_trait]
    impl QuoteSource for ScriptedQuotes {
        async fn fetch_swap(
            &self,
            _src: Address,
            _dst: Address,
            _amount: U256,
            _from: Address,
        ) -> Result<SwapQuote, QuoteError> {
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(QuoteError::RateLimited))
        }
    }

    #[tokio::test]
    async fn profitable_candidate_is_submitted_and_nonce_advances() {
        let chain = Arc::new(MockChain::new(12));
        chain.script_call(Ok(MockChain::ret_uint(2)));
        chain.script_estimate(Ok(500_000));
        let (evaluator, sequencer) = evaluator(chain.clone()).await;

        let result = evaluator.evaluate(&flash_candidate(false)).await.unwrap();
        match result {
            Evaluation::Submitted { profit, .. } => assert_eq!(profit, U256::from(2u64)),
            other => panic!("expected submission, got {other:?}"),
        }

        assert_eq!(chain.sent_count(), 1);
        let envelope = decode_sent(&chain.sent.lock().unwrap()[0]);
        assert_eq!(envelope.nonce(), 12);
        // 500_000 estimate plus the 20% margin.
        assert_eq!(envelope.gas_limit(), 600_000);
        let owner = evaluator.account.address;
        assert_eq!(
            sequencer.current_nonce(owner).await.unwrap(),
            13
        );
    }

    #[tokio::test]
    async fn sweep_selects_the_strictly_most_profitable_size() {
        let chain = Arc::new(MockChain::new(0));
        // Sizes 100, 80, 60, 40, 20.
        chain.script_call(Ok(MockChain::ret_uint(5)));
        chain.script_call(Ok(MockChain::ret_uint(9)));
        chain.script_call(Err(ChainError::Revert {
            reason: "Too little received".to_string(),
            data: String::new(),
        }));
        chain.script_call(Ok(MockChain::ret_uint(9)));
        chain.script_call(Ok(MockChain::ret_uint(3)));
        chain.script_estimate(Ok(400_000));
        let (evaluator, _) = evaluator(chain.clone()).await;

        let result = evaluator.evaluate(&flash_candidate(true)).await.unwrap();
        match result {
            Evaluation::Submitted {
                amount_in, profit, ..
            } => {
                // First size reaching the max wins; the equal later size loses.
                assert_eq!(amount_in, U256::from(80u64));
                assert_eq!(profit, U256::from(9u64));
            }
            other => panic!("expected submission, got {other:?}"),
        }

        let envelope = decode_sent(&chain.sent.lock().unwrap()[0]);
        let call = IFlashArbitrageur::arbitrageCall::abi_decode(envelope.input()).unwrap();
        assert_eq!(call.amountIn, U256::from(80u64));
    }

    #[tokio::test]
    async fn all_sizes_reverting_is_no_opportunity() {
        // Unscripted calls default to a known revert.
        let chain = Arc::new(MockChain::new(0));
        let (evaluator, _) = evaluator(chain.clone()).await;

        let result = evaluator.evaluate(&flash_candidate(true)).await.unwrap();
        match result {
            Evaluation::NoOpportunity { reason } => {
                assert_eq!(reason, "Too little received")
            }
            other => panic!("expected no opportunity, got {other:?}"),
        }
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn unknown_revert_aborts_the_candidate() {
        let chain = Arc::new(MockChain::new(0));
        chain.script_call(Ok(MockChain::ret_uint(5)));
        chain.script_call(Err(ChainError::Revert {
            reason: "SafeMath: subtraction overflow".to_string(),
            data: String::new(),
        }));
        let (evaluator, _) = evaluator(chain.clone()).await;

        let result = evaluator.evaluate(&flash_candidate(true)).await;
        assert!(matches!(result, Err(EvalError::UnexpectedRevert { .. })));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn tiny_profit_abstains_instead_of_bidding() {
        let chain = Arc::new(MockChain::new(0));
        chain.script_call(Ok(MockChain::ret_uint(0)));
        let (evaluator, _) = evaluator(chain.clone()).await;

        let mut candidate = flash_candidate(false);
        candidate.min_profit = U256::ZERO;
        let result = evaluator.evaluate(&candidate).await.unwrap();
        assert!(matches!(result, Evaluation::Abstained));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn lost_nonce_race_maps_to_nonce_conflict() {
        let chain = Arc::new(MockChain::new(4));
        chain.script_call(Ok(MockChain::ret_uint(3)));
        chain.script_send(Err(ChainError::NonceDesync("nonce too low".to_string())));
        let (evaluator, sequencer) = evaluator(chain.clone()).await;

        let result = evaluator.evaluate(&flash_candidate(false)).await.unwrap();
        assert!(matches!(result, Evaluation::NonceConflict));
        // Resynced back to the chain's count.
        let owner = evaluator.account.address;
        assert_eq!(sequencer.current_nonce(owner).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn failed_estimate_falls_back_to_the_ceiling() {
        let chain = Arc::new(MockChain::new(0));
        chain.script_call(Ok(MockChain::ret_uint(6)));
        chain.script_estimate(Err(ChainError::Rpc("estimate unavailable".to_string())));
        let (evaluator, _) = evaluator(chain.clone()).await;

        evaluator.evaluate(&flash_candidate(false)).await.unwrap();
        let envelope = decode_sent(&chain.sent.lock().unwrap()[0]);
        assert_eq!(envelope.gas_limit(), 800_000);
    }

    #[tokio::test]
    async fn aggregator_candidate_records_history_and_submits() {
        let chain = Arc::new(MockChain::new(0));
        chain.script_call(Ok(MockChain::ret_uint(4)));
        chain.script_estimate(Ok(300_000));
        let (evaluator, _) = evaluator(chain.clone()).await;
        let history = Arc::new(PriceHistory::new(10));
        let quote = SwapQuote {
            to: Address::repeat_byte(0x44),
            data: Bytes::from(vec![0x01, 0x02]),
            to_amount: U256::from(99u64),
        };
        let evaluator = evaluator
            .with_quotes(Arc::new(ScriptedQuotes::new(Ok(quote))))
            .with_history(history.clone());

        let mut candidate = flash_candidate(false);
        candidate.route = Route::Aggregator { v3_fee: 500 };
        let result = evaluator.evaluate(&candidate).await.unwrap();
        assert!(matches!(result, Evaluation::Submitted { .. }));
        assert_eq!(history.len(), 1);
        assert_eq!(history.snapshot()[0].to_amount, "99");
    }

    #[tokio::test]
    async fn rate_limit_backs_off_and_sends_nothing() {
        let chain = Arc::new(MockChain::new(0));
        let (evaluator, _) = evaluator(chain.clone()).await;
        let evaluator =
            evaluator.with_quotes(Arc::new(ScriptedQuotes::new(Err(QuoteError::RateLimited))));

        let mut candidate = flash_candidate(false);
        candidate.route = Route::Aggregator { v3_fee: 500 };
        let result = evaluator.evaluate(&candidate).await.unwrap();
        match result {
            Evaluation::RateLimited { backed_off } => {
                assert!(backed_off >= Duration::from_millis(1));
                assert!(backed_off <= Duration::from_millis(3));
            }
            other => panic!("expected rate limited, got {other:?}"),
        }
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn aggregator_route_without_source_is_an_error() {
        let chain = Arc::new(MockChain::new(0));
        let (evaluator, _) = evaluator(chain).await;
        let mut candidate = flash_candidate(false);
        candidate.route = Route::Aggregator { v3_fee: 500 };
        assert!(matches!(
            evaluator.evaluate(&candidate).await,
            Err(EvalError::AggregatorUnconfigured)
        ));
    }

    #[test]
    fn backoff_jitter_stays_in_bounds() {
        let min = Duration::from_millis(200);
        let max = Duration::from_millis(1000);
        for _ in 0..200 {
            let d = jittered_backoff(min, max);
            assert!(d >= min && d <= max);
        }
    }
}
