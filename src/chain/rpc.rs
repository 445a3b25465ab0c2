//! HTTP JSON-RPC implementation of [`ChainClient`] on top of alloy, plus
//! the raw transaction builder used by the submission path.
//!
//! The interesting part is error classification: JSON-RPC error payloads
//! are folded into the [`ChainError`] taxonomy so the submitter and
//! evaluator can dispatch on nonce desync, known reverts, and the
//! restricted-sequencer whitelist quirk without string-matching at every
//! call site.

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{TransactionBuilder, TxSignerSync};
use alloy::primitives::{hex, Address, Bytes, TxKind, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::TransportError;
use async_trait::async_trait;

use super::{ChainClient, ChainError};
use crate::types::{Account, GasBid, TxHandle};

/// `Error(string)` selector.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

pub struct RpcChainClient {
    provider: DynProvider,
}

impl RpcChainClient {
    pub fn connect(url: &str) -> Result<Self, ChainError> {
        let url = url
            .parse()
            .map_err(|e| ChainError::Transport(format!("invalid rpc url {url}: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.provider.call(tx).await.map_err(classify_rpc_error)
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<u64, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(data);
        self.provider
            .estimate_gas(tx)
            .await
            .map_err(classify_rpc_error)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(classify_rpc_error)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHandle, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw.as_ref())
            .await
            .map_err(classify_rpc_error)?;
        Ok(TxHandle::sent(*pending.tx_hash()))
    }
}

/// Sign a type-2 transaction and return the EIP-2718 envelope bytes.
pub fn build_signed_tx(
    account: &Account,
    to: Address,
    data: Bytes,
    nonce: u64,
    gas_limit: u64,
    bid: &GasBid,
    chain_id: u64,
) -> Result<Bytes, ChainError> {
    let mut tx = TxEip1559 {
        chain_id,
        nonce,
        gas_limit,
        max_fee_per_gas: bid.max_fee_per_gas,
        max_priority_fee_per_gas: bid.max_priority_fee_per_gas,
        to: TxKind::Call(to),
        value: U256::ZERO,
        access_list: Default::default(),
        input: data,
    };
    let signature = account
        .signer
        .sign_transaction_sync(&mut tx)
        .map_err(|e| ChainError::Transport(format!("failed to sign transaction: {e}")))?;
    let signed: TxEnvelope = tx.into_signed(signature).into();
    Ok(signed.encoded_2718().into())
}

fn classify_rpc_error(err: TransportError) -> ChainError {
    match err.as_error_resp() {
        Some(payload) => {
            let message = payload.message.to_string();
            let data = payload
                .data
                .as_ref()
                .map(|d| d.get().trim_matches('"').to_string())
                .unwrap_or_default();
            classify_error_payload(&message, &data)
        }
        None => ChainError::Transport(err.to_string()),
    }
}

/// Fold a JSON-RPC error `message` and revert `data` hex into [`ChainError`].
fn classify_error_payload(message: &str, data: &str) -> ChainError {
    let lower = message.to_ascii_lowercase();

    if lower.contains("nonce too low")
        || lower.contains("invalid transaction nonce")
        || lower.contains("nonce expired")
    {
        return ChainError::NonceDesync(message.to_string());
    }

    if lower.contains("rpc method is not whitelisted") {
        // The restricted sequencer accepts eth_sendRawTransaction but
        // rejects the status reads issued afterwards. When the rejected
        // method is such a read, the transaction itself went out.
        let submission_accepted = !message.contains("eth_sendRawTransaction")
            && ["eth_blockNumber", "eth_getTransactionReceipt", "eth_getTransactionCount"]
                .iter()
                .any(|m| message.contains(m));
        return ChainError::MethodNotWhitelisted {
            submission_accepted,
            message: message.to_string(),
        };
    }

    if lower.contains("revert") || !data.is_empty() {
        let reason = decode_revert_string(data).unwrap_or_else(|| message.to_string());
        return ChainError::Revert {
            reason,
            data: data.to_string(),
        };
    }

    ChainError::Rpc(message.to_string())
}

/// Decode an `Error(string)` revert payload. Returns `None` for custom
/// errors and malformed payloads; callers fall back to the raw hex.
fn decode_revert_string(data: &str) -> Option<String> {
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 68 || bytes[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let len = usize::try_from(U256::from_be_slice(&bytes[36..68])).ok()?;
    let end = 68usize.checked_add(len)?;
    if end > bytes.len() {
        return None;
    }
    String::from_utf8(bytes[68..end].to_vec()).ok()
}
