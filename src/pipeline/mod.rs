//! Report pipeline
//!
//! One run is Fetch → Transform → Submit → Confirm, strictly in order, each
//! step consuming the previous step's output. The first failure ends the
//! run; nothing is compensated since a broadcast transaction cannot be
//! taken back. The returned [`RunReport`] keeps every artifact produced up
//! to that point.

mod report;

pub use report::RunReport;

use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::chain::{ChainClient, ConfirmationWaiter, OracleSubmitter};
use crate::error::{AmbiguousSubmissionError, FetchError, ReportError};
use crate::oracle::{transform, PriceFetcher};
use crate::types::{RunContext, Stage};

const SUBMIT_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on a whole submit call.
///
/// Submitters spend up to `submit_timeout` on the pre-broadcast reads and
/// up to `submit_timeout` on the broadcast, and classify their own timeouts.
/// This only catches a submitter that ignores its budget.
pub fn submit_backstop(ctx: &RunContext) -> Duration {
    ctx.submit_timeout
        .saturating_mul(2)
        .saturating_add(SUBMIT_GRACE)
}

/// Sequences the four report steps for a single run.
///
/// Holds no mutable state; concurrent `run_once` calls are independent.
/// Serializing runs for the same reporter and request id is the caller's
/// job.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    fetcher: Arc<dyn PriceFetcher>,
    submitter: Arc<dyn OracleSubmitter>,
    waiter: ConfirmationWaiter,
}

impl PipelineOrchestrator {
    pub fn new(
        fetcher: Arc<dyn PriceFetcher>,
        submitter: Arc<dyn OracleSubmitter>,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            fetcher,
            submitter,
            waiter: ConfirmationWaiter::new(chain),
        }
    }

    /// Execute one run with `ctx` and report how far it got
    pub async fn run_once(&self, ctx: &RunContext) -> RunReport {
        let mut report = RunReport::begin();
        let span = tracing::info_span!(
            "report_run",
            run_id = %report.run_id,
            request_id = %ctx.request_id
        );

        async {
            tracing::info!(
                asset = %ctx.asset,
                currency = %ctx.currency,
                source = self.fetcher.name(),
                "🚀 Starting report run"
            );

            if let Err(err) = self.drive(ctx, &mut report).await {
                report.error = Some(err);
            }

            match &report.error {
                None => tracing::info!(summary = %report.summary(), "✅ Report run complete"),
                Some(err) => tracing::error!(
                    stage = %report.stage,
                    kind = err.kind(),
                    error = %err,
                    safe_to_rerun = report.is_safe_to_rerun(),
                    "❌ Report run failed"
                ),
            }
        }
        .instrument(span)
        .await;

        report.finish();
        report
    }

    async fn drive(&self, ctx: &RunContext, report: &mut RunReport) -> Result<(), ReportError> {
        report.stage = Stage::Fetch;
        let quote = match tokio::time::timeout(
            ctx.fetch_timeout,
            self.fetcher.fetch(&ctx.asset, &ctx.currency),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(ctx.fetch_timeout).into()),
        };
        tracing::info!(stage = %Stage::Fetch, quote = %quote, "Quote fetched");
        report.quote = Some(quote.clone());

        report.stage = Stage::Transform;
        let value = transform(&quote, ctx.adjustment_bps, ctx.scale_factor)?;
        tracing::info!(stage = %Stage::Transform, value = %value, "Report value computed");
        report.report_value = Some(value.clone());

        report.stage = Stage::Submit;
        let backstop = submit_backstop(ctx);
        let handle = match tokio::time::timeout(backstop, self.submitter.submit(ctx, &value)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(AmbiguousSubmissionError {
                    tx_hash: None,
                    reason: format!("submitter did not return within {:?}", backstop),
                }
                .into())
            }
        };
        tracing::info!(stage = %Stage::Submit, tx = %handle, "Report submitted");
        report.transaction = Some(handle.clone());

        report.stage = Stage::Confirm;
        match self
            .waiter
            .wait(
                &handle,
                ctx.confirmations,
                ctx.poll_interval,
                ctx.poll_timeout,
            )
            .await
        {
            Ok(result) => {
                report.confirmation = Some(result);
                Ok(())
            }
            Err(ReportError::ConfirmationTimeout(timeout)) => {
                report.confirmation = Some(timeout.result.clone());
                Err(timeout.into())
            }
            Err(err) => Err(err),
        }
    }
}
