//! Core types used throughout the reporter
//!
//! Defines the artifacts that flow through one report run: the raw quote,
//! the scaled report value, the broadcast transaction handle and the
//! confirmation outcome, plus the read-only run context.

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Raw price observation from a quote source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Source-side asset identifier (e.g. "ethereum")
    pub asset: String,
    /// Quote currency (e.g. "usd")
    pub currency: String,
    /// Exact decimal as sent by the source
    pub price: Decimal,
    /// Source timestamp when available, otherwise receive time
    pub observed_at: DateTime<Utc>,
    /// Name of the source that produced the quote
    pub source: String,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}={} ({} @ {})",
            self.asset,
            self.currency,
            self.price,
            self.source,
            self.observed_at.to_rfc3339()
        )
    }
}

/// Fixed-point integer ready for on-chain submission.
///
/// There is no public constructor: the only way to get one is
/// [`crate::oracle::transform`], so every value that reaches a submitter has
/// gone through the truncation rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportValue {
    value: u128,
    scale_factor: u64,
    adjustment_bps: u32,
    quote: Quote,
}

impl ReportValue {
    pub(crate) fn new(value: u128, scale_factor: u64, adjustment_bps: u32, quote: Quote) -> Self {
        Self {
            value,
            scale_factor,
            adjustment_bps,
            quote,
        }
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    /// Value as an ABI `uint256`
    pub fn as_u256(&self) -> U256 {
        U256::from(self.value)
    }

    pub fn scale_factor(&self) -> u64 {
        self.scale_factor
    }

    pub fn adjustment_bps(&self) -> u32 {
        self.adjustment_bps
    }

    /// The quote this value was derived from
    pub fn quote(&self) -> &Quote {
        &self.quote
    }
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (scale={} adj={}bps from {})",
            self.value, self.scale_factor, self.adjustment_bps, self.quote.price
        )
    }
}

/// Identifier of a broadcast report transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHandle {
    pub tx_hash: H256,
    pub submitted_at: DateTime<Utc>,
    /// Oracle contract the transaction targets
    pub contract: Address,
    pub reporter: Address,
    pub nonce: U256,
    pub request_id: U256,
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} (nonce={} request_id={})",
            self.tx_hash, self.nonce, self.request_id
        )
    }
}

/// Terminal status of a confirmation wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Included and buried under enough blocks
    Confirmed,
    /// Included, but not deep enough before the wait budget ran out
    TimedOut,
    /// Never observed in a block before the wait budget ran out
    NotFound,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::TimedOut => "timed_out",
            ConfirmationStatus::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of waiting for a transaction.
///
/// `Confirmed` means "included and sufficiently buried". It says nothing
/// about whether the call reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub handle: TransactionHandle,
    pub status: ConfirmationStatus,
    /// Blocks mined on top of the inclusion block at the last observation
    pub depth: u64,
    pub inclusion_block: Option<u64>,
    pub elapsed: Duration,
}

impl ConfirmationResult {
    pub fn is_confirmed(&self) -> bool {
        self.status == ConfirmationStatus::Confirmed
    }
}

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Transform,
    Submit,
    Confirm,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Submit => "submit",
            Stage::Confirm => "confirm",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only configuration for one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub reporter: Address,
    pub oracle: Address,
    pub request_id: U256,
    /// Source-side asset identifier to quote
    pub asset: String,
    pub currency: String,
    /// Upward bias applied to the market price, in basis points
    pub adjustment_bps: u32,
    pub scale_factor: u64,
    pub gas_limit: u64,
    pub gas_price_multiplier: f64,
    /// Blocks required on top of the inclusion block
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub fetch_timeout: Duration,
    pub submit_timeout: Duration,
}
