//! Settlement-contract call shapes.
//!
//! The settlement contract is an opaque callable endpoint: we encode an
//! attempt, speculatively execute it, and read back a profit. The
//! [`SettlementCodec`] seam keeps the ABI knowledge in one place; the
//! evaluator only sees calldata in and profit out.

use alloy::primitives::aliases::U24;
use alloy::primitives::{Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use thiserror::Error;

use crate::quotes::SwapQuote;
use crate::types::{Candidate, Route};

sol! {
    /// On-chain settlement contract. Both entry points revert when the
    /// trade would not clear `minProfit`.
    interface IFlashArbitrageur {
        function arbitrage(
            address borrowPool,
            address tokenIn,
            address tokenOut,
            uint256 amountIn,
            uint256 minProfit,
            uint8 secondArbitrageFunc
        ) external returns (uint256 profit);

        function arbitrageAggregate(
            address tokenIn,
            address tokenOut,
            uint256 amountIn,
            uint256 minProfit,
            bytes aggregatorData,
            uint24 uniswapV3Fee
        ) external returns (uint256 profit);
    }

    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("aggregator route requires a swap quote")]
    MissingQuote,
    #[error("uniswap v3 fee {0} exceeds uint24")]
    FeeRange(u32),
    #[error("undecodable settlement return: {0}")]
    Return(String),
}

/// Encodes candidates into settlement calldata and decodes the returned
/// profit. Implementations are stateless.
pub trait SettlementCodec: Send + Sync {
    fn encode(
        &self,
        candidate: &Candidate,
        amount_in: U256,
        quote: Option<&SwapQuote>,
    ) -> Result<Bytes, CodecError>;

    fn decode_profit(&self, ret: &[u8]) -> Result<U256, CodecError>;
}

/// Codec for [`IFlashArbitrageur`].
pub struct FlashSettlement;

impl SettlementCodec for FlashSettlement {
    fn encode(
        &self,
        candidate: &Candidate,
        amount_in: U256,
        quote: Option<&SwapQuote>,
    ) -> Result<Bytes, CodecError> {
        match candidate.route {
            Route::Flash {
                borrow_pool,
                second_leg,
            } => Ok(IFlashArbitrageur::arbitrageCall {
                borrowPool: borrow_pool,
                tokenIn: candidate.token_in,
                tokenOut: candidate.token_out,
                amountIn: amount_in,
                minProfit: candidate.min_profit,
                secondArbitrageFunc: second_leg,
            }
            .abi_encode()
            .into()),
            Route::Aggregator { v3_fee } => {
                let quote = quote.ok_or(CodecError::MissingQuote)?;
                let fee = U24::try_from(v3_fee).map_err(|_| CodecError::FeeRange(v3_fee))?;
                Ok(IFlashArbitrageur::arbitrageAggregateCall {
                    tokenIn: candidate.token_in,
                    tokenOut: candidate.token_out,
                    amountIn: amount_in,
                    minProfit: candidate.min_profit,
                    aggregatorData: quote.data.clone(),
                    uniswapV3Fee: fee,
                }
                .abi_encode()
                .into())
            }
        }
    }

    fn decode_profit(&self, ret: &[u8]) -> Result<U256, CodecError> {
        // Both entry points return a single uint256.
        IFlashArbitrageur::arbitrageCall::abi_decode_returns(ret)
            .map_err(|e| CodecError::Return(e.to_string()))
    }
}
