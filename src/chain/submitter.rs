//! Oracle report submission
//!
//! Builds, signs and broadcasts the report transaction. The hash is derived
//! from the signed bytes before broadcast, so a broadcast that dies on the
//! wire still leaves the caller something to look up.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use std::time::Duration;

use crate::chain::abi::encode_report_call;
use crate::error::{AmbiguousSubmissionError, ReportError, SubmissionError, TransientRpcError};
use crate::types::{ReportValue, RunContext, TransactionHandle};

/// Messages nodes use for nonce clashes (geth, erigon, nethermind, besu)
const NONCE_CONFLICT_MARKERS: &[&str] = &[
    "nonce too low",
    "nonce too high",
    "replacement transaction underpriced",
    "nonce has already been used",
];

/// The node already holds these exact signed bytes
const ALREADY_KNOWN_MARKERS: &[&str] = &[
    "already known",
    "alreadyknown",
    "already imported",
    "known transaction:",
];

const INSUFFICIENT_FUNDS_MARKERS: &[&str] = &["insufficient funds", "insufficient balance"];

/// Submits a report value to the oracle contract.
///
/// Not idempotent: every successful call sends one state-changing
/// transaction. Implementations bound their own network calls by
/// `ctx.submit_timeout` so that a broadcast cut short can still be reported
/// with its hash.
#[async_trait]
pub trait OracleSubmitter: Send + Sync {
    async fn submit(
        &self,
        ctx: &RunContext,
        value: &ReportValue,
    ) -> Result<TransactionHandle, ReportError>;
}

/// Local-key submitter over an ethers HTTP provider
#[derive(Debug, Clone)]
pub struct EthersSubmitter {
    provider: Provider<Http>,
    wallet: LocalWallet,
    report_function: String,
}

impl EthersSubmitter {
    pub fn new(
        provider: Provider<Http>,
        private_key: &str,
        chain_id: u64,
        report_function: &str,
    ) -> Result<Self> {
        let wallet: LocalWallet = private_key
            .parse()
            .context("Invalid private key for report signing")?;

        Ok(Self {
            provider,
            wallet: wallet.with_chain_id(chain_id),
            report_function: report_function.to_string(),
        })
    }

    /// Address of the signing key
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Pending nonce, network gas price and reporter balance, all within
    /// `budget`. Nothing has been sent yet, so every failure is retryable.
    async fn read_chain_state(
        &self,
        reporter: Address,
        budget: Duration,
    ) -> Result<(U256, U256, U256), TransientRpcError> {
        let reads = async {
            let nonce = self
                .provider
                .get_transaction_count(reporter, Some(BlockNumber::Pending.into()))
                .await
                .map_err(|e| TransientRpcError::new("eth_getTransactionCount", e))?;
            let gas_price = self
                .provider
                .get_gas_price()
                .await
                .map_err(|e| TransientRpcError::new("eth_gasPrice", e))?;
            let balance = self
                .provider
                .get_balance(reporter, None)
                .await
                .map_err(|e| TransientRpcError::new("eth_getBalance", e))?;
            Ok::<_, TransientRpcError>((nonce, gas_price, balance))
        };

        match tokio::time::timeout(budget, reads).await {
            Ok(result) => result,
            Err(_) => Err(TransientRpcError::new(
                "pre-broadcast reads",
                format!("timed out after {:?}", budget),
            )),
        }
    }
}

#[async_trait]
impl OracleSubmitter for EthersSubmitter {
    async fn submit(
        &self,
        ctx: &RunContext,
        value: &ReportValue,
    ) -> Result<TransactionHandle, ReportError> {
        if self.wallet.address() != ctx.reporter {
            return Err(SubmissionError::Signing(format!(
                "signer {:#x} is not the configured reporter {:#x}",
                self.wallet.address(),
                ctx.reporter
            ))
            .into());
        }

        let (nonce, network_gas_price, balance) =
            self.read_chain_state(ctx.reporter, ctx.submit_timeout).await?;

        let gas_price = scale_gas_price(network_gas_price, ctx.gas_price_multiplier);
        let required = gas_price.saturating_mul(U256::from(ctx.gas_limit));
        if balance < required {
            return Err(SubmissionError::InsufficientBalance {
                required,
                available: balance,
            }
            .into());
        }

        let data = encode_report_call(&self.report_function, ctx.request_id, value.as_u256());
        let tx: TypedTransaction = TransactionRequest::new()
            .from(ctx.reporter)
            .to(ctx.oracle)
            .data(data)
            .gas(ctx.gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.wallet.chain_id())
            .into();

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| SubmissionError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let tx_hash = H256::from(keccak256(&raw));

        tracing::info!(
            tx_hash = %format!("{:#x}", tx_hash),
            nonce = %nonce,
            gas_price = %gas_price,
            value = %value.value(),
            "Broadcasting report transaction"
        );

        // From here on the bytes may have reached the node.
        let broadcast =
            tokio::time::timeout(ctx.submit_timeout, self.provider.send_raw_transaction(raw)).await;

        let accepted_hash = match broadcast {
            Ok(Ok(pending)) => pending.tx_hash(),
            Ok(Err(err)) if is_already_known(&err) => {
                tracing::info!(
                    tx_hash = %format!("{:#x}", tx_hash),
                    "Node already holds the report transaction"
                );
                tx_hash
            }
            Ok(Err(err)) => return Err(classify_broadcast_error(err, tx_hash, required, balance)),
            Err(_) => {
                return Err(AmbiguousSubmissionError {
                    tx_hash: Some(tx_hash),
                    reason: format!("broadcast timed out after {:?}", ctx.submit_timeout),
                }
                .into())
            }
        };

        if accepted_hash != tx_hash {
            tracing::warn!(
                local = %format!("{:#x}", tx_hash),
                node = %format!("{:#x}", accepted_hash),
                "Node reported a different transaction hash"
            );
        }

        Ok(TransactionHandle {
            tx_hash: accepted_hash,
            submitted_at: Utc::now(),
            contract: ctx.oracle,
            reporter: ctx.reporter,
            nonce,
            request_id: ctx.request_id,
        })
    }
}

/// `base * multiplier`, with the multiplier applied in thousandths
pub fn scale_gas_price(base: U256, multiplier: f64) -> U256 {
    let millis = (multiplier * 1000.0).round().max(0.0) as u64;
    base.saturating_mul(U256::from(millis)) / U256::from(1000u64)
}

/// Map a broadcast failure to a terminal or ambiguous error.
///
/// A JSON-RPC error response means the node saw and refused the
/// transaction. Anything else (connection reset, timeout, garbled response)
/// leaves the outcome unknown.
pub fn classify_broadcast_error(
    err: ProviderError,
    tx_hash: H256,
    required: U256,
    available: U256,
) -> ReportError {
    match err.as_error_response() {
        Some(response) => classify_rejection(&response.message, required, available).into(),
        None => AmbiguousSubmissionError {
            tx_hash: Some(tx_hash),
            reason: err.to_string(),
        }
        .into(),
    }
}

/// True when the node answered that it already has this transaction
pub fn is_already_known(err: &ProviderError) -> bool {
    err.as_error_response().map_or(false, |response| {
        let lower = response.message.to_lowercase();
        ALREADY_KNOWN_MARKERS.iter().any(|m| lower.contains(m))
    })
}

/// Classify a node's rejection message
pub fn classify_rejection(message: &str, required: U256, available: U256) -> SubmissionError {
    let lower = message.to_lowercase();
    if NONCE_CONFLICT_MARKERS.iter().any(|m| lower.contains(m)) {
        SubmissionError::NonceConflict(message.to_string())
    } else if INSUFFICIENT_FUNDS_MARKERS.iter().any(|m| lower.contains(m)) {
        SubmissionError::InsufficientBalance {
            required,
            available,
        }
    } else {
        SubmissionError::Rejected(message.to_string())
    }
}
