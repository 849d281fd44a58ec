//! Confirmation waiter
//!
//! Polls the chain at a fixed interval until the transaction is buried
//! under enough blocks or the wait budget runs out.
//!
//! Confirmed means "included and sufficiently deep", not "executed
//! successfully". A reverted report call confirms just the same.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::chain::ChainClient;
use crate::error::{ConfirmationTimeoutError, ReportError, TransientRpcError};
use crate::types::{ConfirmationResult, ConfirmationStatus, TransactionHandle};

/// Waiter state. `Confirmed` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    TimedOut,
}

impl ConfirmationState {
    /// Next state after an observation. Terminal states never change.
    pub fn next(
        self,
        depth: Option<u64>,
        required: u64,
        elapsed: Duration,
        max_wait: Duration,
    ) -> Self {
        match self {
            ConfirmationState::Pending if depth.map_or(false, |d| d >= required) => {
                ConfirmationState::Confirmed
            }
            ConfirmationState::Pending if elapsed >= max_wait => ConfirmationState::TimedOut,
            state => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationState::Pending)
    }
}

/// Polls a [`ChainClient`] for a transaction's inclusion depth
#[derive(Clone)]
pub struct ConfirmationWaiter {
    chain: Arc<dyn ChainClient>,
}

impl ConfirmationWaiter {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Wait until `handle` has at least `confirmations` blocks on top of it.
    ///
    /// Returns [`ReportError::ConfirmationTimeout`] once `max_wait` has
    /// elapsed without reaching the threshold, and
    /// [`ReportError::TransientRpc`] if a status query fails. Dropping the
    /// future cancels the in-flight query.
    pub async fn wait(
        &self,
        handle: &TransactionHandle,
        confirmations: u64,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<ConfirmationResult, ReportError> {
        let started = Instant::now();
        let mut state = ConfirmationState::Pending;
        let mut inclusion_block = None;
        let mut depth = None;
        let mut polls = 0u64;

        loop {
            polls += 1;
            let remaining = max_wait.saturating_sub(started.elapsed());

            // A query that outlives the budget counts as "no observation".
            if let Ok(observation) =
                tokio::time::timeout(remaining, self.observe(handle)).await
            {
                match observation? {
                    Some((included_at, head)) => {
                        inclusion_block = Some(included_at);
                        depth = Some(head.saturating_sub(included_at));
                    }
                    // Receipt gone again: the including block was reorged out
                    None => {
                        inclusion_block = None;
                        depth = None;
                    }
                }
            }

            let elapsed = started.elapsed();
            state = state.next(depth, confirmations, elapsed, max_wait);

            tracing::debug!(
                tx_hash = %format!("{:#x}", handle.tx_hash),
                poll = polls,
                depth = ?depth,
                required = confirmations,
                state = ?state,
                "Confirmation poll"
            );

            match state {
                ConfirmationState::Confirmed => {
                    let result = ConfirmationResult {
                        handle: handle.clone(),
                        status: ConfirmationStatus::Confirmed,
                        depth: depth.unwrap_or_default(),
                        inclusion_block,
                        elapsed,
                    };
                    tracing::info!(
                        tx_hash = %format!("{:#x}", handle.tx_hash),
                        depth = result.depth,
                        block = ?inclusion_block,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "✅ Transaction confirmed"
                    );
                    return Ok(result);
                }
                ConfirmationState::TimedOut => {
                    let status = if inclusion_block.is_some() {
                        ConfirmationStatus::TimedOut
                    } else {
                        ConfirmationStatus::NotFound
                    };
                    let result = ConfirmationResult {
                        handle: handle.clone(),
                        status,
                        depth: depth.unwrap_or_default(),
                        inclusion_block,
                        elapsed,
                    };
                    tracing::warn!(
                        tx_hash = %format!("{:#x}", handle.tx_hash),
                        status = %status,
                        depth = result.depth,
                        polls,
                        "Confirmation wait budget exhausted"
                    );
                    return Err(ConfirmationTimeoutError { result }.into());
                }
                ConfirmationState::Pending => {
                    let remaining = max_wait.saturating_sub(started.elapsed());
                    tokio::time::sleep(poll_interval.min(remaining)).await;
                }
            }
        }
    }

    /// `(inclusion block, chain height)` once mined
    async fn observe(
        &self,
        handle: &TransactionHandle,
    ) -> Result<Option<(u64, u64)>, TransientRpcError> {
        let Some(included_at) = self.chain.inclusion_block(handle.tx_hash).await? else {
            return Ok(None);
        };
        let head = self.chain.block_number().await?;
        Ok(Some((included_at, head)))
    }
}
