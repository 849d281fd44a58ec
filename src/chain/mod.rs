//! Chain module - EVM RPC access, report submission and confirmation tracking

mod abi;
mod confirmation;
mod submitter;

pub use abi::{encode_report_call, validate_report_function, DEFAULT_REPORT_FUNCTION};
pub use confirmation::{ConfirmationState, ConfirmationWaiter};
pub use submitter::{
    classify_broadcast_error, classify_rejection, scale_gas_price, EthersSubmitter,
    OracleSubmitter,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::H256;
use reqwest::Url;
use std::time::Duration;

use crate::error::TransientRpcError;

/// Read-only chain queries used while waiting for confirmations
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain height
    async fn block_number(&self) -> Result<u64, TransientRpcError>;

    /// Block the transaction was included in, `None` while it is not mined
    async fn inclusion_block(&self, tx_hash: H256) -> Result<Option<u64>, TransientRpcError>;
}

/// JSON-RPC chain client backed by an ethers HTTP provider
#[derive(Debug, Clone)]
pub struct EthersChain {
    provider: Provider<Http>,
}

impl EthersChain {
    /// Connect to `rpc_url`; every request is bounded by `request_timeout`
    pub fn new(rpc_url: &str, request_timeout: Duration) -> Result<Self> {
        let url: Url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC url '{}'", rpc_url))?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create RPC HTTP client")?;

        Ok(Self {
            provider: Provider::new(Http::new_with_client(url, client)),
        })
    }

    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }

    pub async fn chain_id(&self) -> Result<u64, TransientRpcError> {
        self.provider
            .get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(|e| TransientRpcError::new("eth_chainId", e))
    }
}

#[async_trait]
impl ChainClient for EthersChain {
    async fn block_number(&self) -> Result<u64, TransientRpcError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| TransientRpcError::new("eth_blockNumber", e))
    }

    async fn inclusion_block(&self, tx_hash: H256) -> Result<Option<u64>, TransientRpcError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| TransientRpcError::new("eth_getTransactionReceipt", e))?;

        // Inclusion only; receipt status is not checked.
        Ok(receipt.and_then(|r| r.block_number).map(|n| n.as_u64()))
    }
}
