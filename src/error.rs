//! Error kinds for the report pipeline
//!
//! One type per failure class. Stage attribution is done by the pipeline,
//! not by the error itself, so a [`TransientRpcError`] can come from either
//! the submit or the confirm stage.

use ethers::types::{H256, U256};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::types::ConfirmationResult;

/// Failure to obtain a quote
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("price source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed price payload: {0}")]
    Malformed(String),
    #[error("no price for {asset}/{currency} in payload")]
    MissingField { asset: String, currency: String },
    #[error("price fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// A quote that cannot be turned into a report value
#[derive(Debug, Error, PartialEq)]
pub enum InvalidQuoteError {
    #[error("price must be positive, got {0}")]
    NonPositive(Decimal),
    #[error("scaled value for price {0} is out of range")]
    Overflow(Decimal),
}

/// Terminal, non-ambiguous failure to submit the report transaction
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("insufficient balance: need {required} wei, have {available} wei")]
    InsufficientBalance { required: U256, available: U256 },
    #[error("nonce conflict: {0}")]
    NonceConflict(String),
    #[error("broadcast rejected: {0}")]
    Rejected(String),
}

/// The transaction may or may not have reached the network.
///
/// Rerunning blindly risks a duplicate report. When the hash is known the
/// caller should look it up before doing anything else.
#[derive(Debug, Error)]
#[error("submission outcome unknown (tx {}): {reason}", display_hash(.tx_hash))]
pub struct AmbiguousSubmissionError {
    pub tx_hash: Option<H256>,
    pub reason: String,
}

fn display_hash(hash: &Option<H256>) -> String {
    match hash {
        Some(h) => format!("{:#x}", h),
        None => "unknown".to_string(),
    }
}

/// Confirmation could not be observed within the wait budget.
///
/// This does not mean the transaction failed.
#[derive(Debug, Error)]
#[error("{}", describe_timeout(.result))]
pub struct ConfirmationTimeoutError {
    pub result: ConfirmationResult,
}

fn describe_timeout(result: &ConfirmationResult) -> String {
    format!(
        "tx {:#x} not confirmed after {:?} (status={}, depth={})",
        result.handle.tx_hash, result.elapsed, result.status, result.depth
    )
}

/// Retryable RPC fault (connection reset, timeout, 5xx from the node)
#[derive(Debug, Error)]
#[error("rpc {operation} failed: {reason}")]
pub struct TransientRpcError {
    pub operation: &'static str,
    pub reason: String,
}

impl TransientRpcError {
    pub fn new(operation: &'static str, reason: impl ToString) -> Self {
        Self {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Any failure that ends a report run
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    InvalidQuote(#[from] InvalidQuoteError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    AmbiguousSubmission(#[from] AmbiguousSubmissionError),
    #[error(transparent)]
    ConfirmationTimeout(#[from] ConfirmationTimeoutError),
    #[error(transparent)]
    TransientRpc(#[from] TransientRpcError),
}

impl ReportError {
    /// Short machine-friendly kind, used in logs and the run ledger
    pub fn kind(&self) -> &'static str {
        match self {
            ReportError::Fetch(_) => "fetch_error",
            ReportError::InvalidQuote(_) => "invalid_quote",
            ReportError::Submission(_) => "submission_error",
            ReportError::AmbiguousSubmission(_) => "ambiguous_submission",
            ReportError::ConfirmationTimeout(_) => "confirmation_timeout",
            ReportError::TransientRpc(_) => "transient_rpc",
        }
    }
}
