//! Run summary

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::error::ReportError;
use crate::types::{ConfirmationResult, Quote, ReportValue, Stage, TransactionHandle};

/// Everything one run produced, plus the error that stopped it
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Last stage entered. On failure, the stage that failed.
    pub stage: Stage,
    pub quote: Option<Quote>,
    pub report_value: Option<ReportValue>,
    pub transaction: Option<TransactionHandle>,
    /// Present on success and on a confirmation timeout
    pub confirmation: Option<ConfirmationResult>,
    pub error: Option<ReportError>,
}

impl RunReport {
    pub(crate) fn begin() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            stage: Stage::Fetch,
            quote: None,
            report_value: None,
            transaction: None,
            confirmation: None,
            error: None,
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// The report was submitted and buried deep enough
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .confirmation
                .as_ref()
                .map_or(false, ConfirmationResult::is_confirmed)
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.error.as_ref().map(|_| self.stage)
    }

    /// True when rerunning cannot produce a duplicate on-chain report:
    /// no transaction was broadcast and no broadcast is in doubt.
    pub fn is_safe_to_rerun(&self) -> bool {
        self.transaction.is_none()
            && !matches!(self.error, Some(ReportError::AmbiguousSubmission(_)))
    }

    /// Failed after something may have reached the chain. An operator has
    /// to check the reporter's latest transaction before the next run.
    pub fn needs_resolution(&self) -> bool {
        self.error.is_some() && !self.is_safe_to_rerun()
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![format!("run={}", self.run_id)];

        match &self.error {
            None => parts.push("outcome=success".to_string()),
            Some(err) => parts.push(format!("outcome=failed@{} ({})", self.stage, err.kind())),
        }
        if let Some(quote) = &self.quote {
            parts.push(format!("price={}", quote.price));
        }
        if let Some(value) = &self.report_value {
            parts.push(format!("value={}", value.value()));
        }
        if let Some(tx) = &self.transaction {
            parts.push(format!("tx={:#x}", tx.tx_hash));
        }
        if let Some(c) = &self.confirmation {
            parts.push(format!("confirmation={} depth={}", c.status, c.depth));
        }
        parts.join(" ")
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        if let Some(err) = &self.error {
            write!(f, ": {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AmbiguousSubmissionError, FetchError, SubmissionError};
    use ethers::types::{Address, H256, U256};

    fn handle() -> TransactionHandle {
        TransactionHandle {
            tx_hash: H256::from_low_u64_be(0xabc),
            submitted_at: Utc::now(),
            contract: Address::zero(),
            reporter: Address::zero(),
            nonce: U256::zero(),
            request_id: U256::one(),
        }
    }

    #[test]
    fn fetch_failure_is_safe_to_rerun() {
        let mut report = RunReport::begin();
        report.error = Some(FetchError::Malformed("x".into()).into());

        assert!(!report.is_success());
        assert_eq!(report.failed_stage(), Some(Stage::Fetch));
        assert!(report.is_safe_to_rerun());
    }

    #[test]
    fn rejected_submission_is_safe_but_ambiguous_is_not() {
        let mut report = RunReport::begin();
        report.stage = Stage::Submit;
        report.error = Some(SubmissionError::NonceConflict("nonce too low".into()).into());
        assert!(report.is_safe_to_rerun());

        report.error = Some(
            AmbiguousSubmissionError {
                tx_hash: None,
                reason: "timeout".into(),
            }
            .into(),
        );
        assert!(!report.is_safe_to_rerun());
        assert!(report.needs_resolution());
        assert_eq!(report.failed_stage(), Some(Stage::Submit));
    }

    #[test]
    fn only_failed_unsafe_runs_need_resolution() {
        let mut report = RunReport::begin();
        report.error = Some(FetchError::Malformed("x".into()).into());
        assert!(!report.needs_resolution());

        // A confirmed run holds a transaction but is not in doubt
        let mut confirmed = RunReport::begin();
        confirmed.stage = Stage::Confirm;
        confirmed.transaction = Some(handle());
        assert!(!confirmed.is_safe_to_rerun());
        assert!(!confirmed.needs_resolution());

        confirmed.error =
            Some(crate::error::TransientRpcError::new("eth_blockNumber", "reset").into());
        assert!(confirmed.needs_resolution());
    }

    #[test]
    fn broadcast_transaction_is_never_safe_to_rerun() {
        let mut report = RunReport::begin();
        report.stage = Stage::Confirm;
        report.transaction = Some(handle());
        report.error = Some(crate::error::TransientRpcError::new("eth_blockNumber", "reset").into());

        assert!(!report.is_safe_to_rerun());
        assert!(report.summary().contains("outcome=failed@confirm (transient_rpc)"));
        assert!(report.summary().contains("tx=0x"));
    }
}
