//! Binary entry point: wire the components from the environment and run
//! the scheduling loop once until its deadline.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::U256;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use flasharb_bot::arbitrage::{
    EvaluatorConfig, OpportunityEvaluator, RevertClassifier, SchedulerConfig, SchedulingLoop,
    TransactionSubmitter,
};
use flasharb_bot::catalog::CandidateCatalog;
use flasharb_bot::chain::rpc::build_signed_tx;
use flasharb_bot::chain::{ChainClient, RpcChainClient};
use flasharb_bot::config::{load_config, RunnerConfig};
use flasharb_bot::contracts::{FlashSettlement, IERC20};
use flasharb_bot::gas::GasPricer;
use flasharb_bot::history::{FsObjectStore, PriceHistory};
use flasharb_bot::nonce::NonceSequencer;
use flasharb_bot::quotes::{QuoteClient, QuoteConfig, QuoteSource};
use flasharb_bot::types::{Account, GasBid};

use alloy::sol_types::SolCall;

#[derive(Parser, Debug)]
#[command(name = "flasharb-bot", about = "Speculative DEX arbitrage runner")]
struct Args {
    /// Alternative .env file to load before reading the environment.
    #[arg(long)]
    env_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    match &args.env_file {
        Some(path) => {
            dotenv::from_filename(path)
                .with_context(|| format!("failed to load env file {path}"))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let config = load_config()?;
    info!(
        network = %config.network_name,
        chain_id = config.chain_id,
        settlement = %config.settlement_address,
        deadline_secs = config.deadline.as_secs_f64(),
        wave_size = config.wave_size,
        "starting flash arbitrage runner"
    );

    run(config).await
}

async fn run(config: RunnerConfig) -> Result<()> {
    let chain: Arc<dyn ChainClient> =
        Arc::new(RpcChainClient::connect(&config.rpc_url).context("primary rpc provider")?);
    let send_chain: Arc<dyn ChainClient> = match &config.sequencer_rpc_url {
        Some(url) => {
            Arc::new(RpcChainClient::connect(url).context("sequencer rpc provider")?)
        }
        None => Arc::clone(&chain),
    };

    let signer = PrivateKeySigner::from_str(config.owner_private_key.trim())
        .context("OWNER_PRIVATE_KEY is not a valid private key")?;
    let account = Arc::new(Account::new(signer));

    let catalog = Arc::new(CandidateCatalog::load(&config.catalog_file)?);
    info!(candidates = catalog.len(), "candidate catalog loaded");

    let sequencer = Arc::new(NonceSequencer::new(Arc::clone(&chain)));
    sequencer
        .register(account.address)
        .await
        .context("failed to register owner account")?;
    info!(
        owner = %account.address,
        nonce = sequencer.current_nonce(account.address).await?,
        "owner account registered"
    );
    let submitter = Arc::new(TransactionSubmitter::new(Arc::clone(&sequencer)));

    ensure_allowances(&config, &chain, &submitter, &account, &catalog)
        .await
        .context("allowance bootstrap failed")?;

    let mut classifier = RevertClassifier::with_defaults();
    classifier.extend(
        catalog
            .extra_no_opportunity_signatures()
            .iter()
            .cloned(),
    );
    let pricer = GasPricer::new(
        catalog.token_prices(),
        config.gas.buffer_percent,
        config.gas.assumed_gas,
        config.gas.base_fee_wei,
        config.gas.min_priority_fee_wei,
        config.gas.floor_policy,
    );

    let mut evaluator = OpportunityEvaluator::new(
        Arc::clone(&chain),
        send_chain,
        submitter,
        Arc::new(FlashSettlement),
        classifier,
        pricer,
        Arc::clone(&account),
        EvaluatorConfig {
            chain_id: config.chain_id,
            settlement: config.settlement_address,
            ..EvaluatorConfig::default()
        },
    );
    if let Some(settings) = &config.aggregator {
        let quotes: Arc<dyn QuoteSource> = Arc::new(QuoteClient::new(QuoteConfig {
            endpoint: settings.endpoint.clone(),
            api_keys: settings.api_keys.clone(),
            slippage: settings.slippage.clone(),
            protocols: settings.protocols.clone(),
            timeout: settings.timeout,
        })
        .map_err(|e| anyhow!("failed to build quote client: {e}"))?);
        evaluator = evaluator.with_quotes(quotes);
    }

    let mut store = None;
    if let Some(settings) = &config.history {
        let fs_store = FsObjectStore::new(&settings.root);
        let history = match PriceHistory::restore(
            &fs_store,
            &settings.bucket,
            &settings.key,
            settings.window,
        )
        .await
        {
            Ok(history) => {
                info!(points = history.len(), "price history restored");
                history
            }
            Err(e) => {
                warn!(error = %e, "no usable price history, starting fresh");
                PriceHistory::new(settings.window)
            }
        };
        let history = Arc::new(history);
        evaluator = evaluator.with_history(Arc::clone(&history));
        store = Some((fs_store, history));
    }

    let scheduler = SchedulingLoop::new(
        catalog,
        Arc::new(evaluator),
        SchedulerConfig {
            deadline: config.deadline,
            wave_size: config.wave_size,
            termination: config.termination,
            stop_on_fatal: config.stop_on_fatal,
        },
    );
    let result = scheduler.run().await;

    if let (Some((fs_store, history)), Some(settings)) = (&store, &config.history) {
        if let Err(e) = history
            .persist(fs_store, &settings.bucket, &settings.key)
            .await
        {
            warn!(error = %e, "failed to persist price history");
        }
    }

    let summary = result.map_err(|e| anyhow!(e).context("scheduling loop failed"))?;
    info!(
        waves = summary.waves,
        evaluated = summary.evaluated,
        submitted = summary.submitted,
        no_opportunity = summary.no_opportunity,
        abstained = summary.abstained,
        rate_limited = summary.rate_limited,
        nonce_conflicts = summary.nonce_conflicts,
        failed = summary.failed,
        "run complete"
    );
    Ok(())
}

/// Make sure the settlement contract can pull each input token from the
/// owner. Approvals go through the submitter so they participate in nonce
/// sequencing; any failure here is fatal setup.
async fn ensure_allowances(
    config: &RunnerConfig,
    chain: &Arc<dyn ChainClient>,
    submitter: &TransactionSubmitter,
    account: &Arc<Account>,
    catalog: &CandidateCatalog,
) -> Result<()> {
    let spender = config.settlement_address;
    for (token, needed) in catalog.max_amounts() {
        let call = IERC20::allowanceCall {
            owner: account.address,
            spender,
        };
        let ret = chain
            .call(token, call.abi_encode().into())
            .await
            .with_context(|| format!("allowance read failed for token {token}"))?;
        let allowance = IERC20::allowanceCall::abi_decode_returns(&ret)
            .with_context(|| format!("undecodable allowance return for token {token}"))?;
        if allowance >= needed {
            continue;
        }

        info!(%token, %spender, "submitting max approval");
        let data: alloy::primitives::Bytes = IERC20::approveCall {
            spender,
            amount: U256::MAX,
        }
        .abi_encode()
        .into();
        let bid = GasBid {
            tx_type: 2,
            max_fee_per_gas: config
                .gas
                .min_priority_fee_wei
                .saturating_add(config.gas.base_fee_wei),
            max_priority_fee_per_gas: config.gas.min_priority_fee_wei,
        };
        let chain_id = config.chain_id;
        let signer = Arc::clone(account);
        let send_chain = Arc::clone(chain);
        let handle = submitter
            .submit(account.address, move |nonce| async move {
                let raw = build_signed_tx(&signer, token, data, nonce, 100_000, &bid, chain_id)?;
                send_chain.send_raw_transaction(raw).await
            })
            .await;
        match handle {
            Ok(handle) => info!(%token, hash = ?handle.hash, "approval sent"),
            Err(e) => return Err(anyhow!(e).context(format!("approval failed for {token}"))),
        }
    }
    Ok(())
}
