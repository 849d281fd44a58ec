//! End-to-end pipeline scenarios against test doubles

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, H256, U256};
use mockall::mock;
use mockall::predicate::eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oracle_reporter::chain::{ChainClient, OracleSubmitter};
use oracle_reporter::error::{
    FetchError, InvalidQuoteError, ReportError, SubmissionError, TransientRpcError,
};
use oracle_reporter::oracle::sources::parse_simple_price;
use oracle_reporter::oracle::PriceFetcher;
use oracle_reporter::persistence::RunRecord;
use oracle_reporter::pipeline::{submit_backstop, PipelineOrchestrator};
use oracle_reporter::types::{
    ConfirmationStatus, Quote, ReportValue, RunContext, Stage, TransactionHandle,
};

mock! {
    Fetcher {}

    #[async_trait]
    impl PriceFetcher for Fetcher {
        fn name(&self) -> &'static str;
        async fn fetch(&self, asset: &str, currency: &str) -> Result<Quote, FetchError>;
    }
}

mock! {
    Submitter {}

    #[async_trait]
    impl OracleSubmitter for Submitter {
        async fn submit(
            &self,
            ctx: &RunContext,
            value: &ReportValue,
        ) -> Result<TransactionHandle, ReportError>;
    }
}

mock! {
    Chain {}

    #[async_trait]
    impl ChainClient for Chain {
        async fn block_number(&self) -> Result<u64, TransientRpcError>;
        async fn inclusion_block(&self, tx_hash: H256) -> Result<Option<u64>, TransientRpcError>;
    }
}

/// Serves a fixed CoinGecko body through the real parser
struct StaticBodyFetcher(&'static str);

#[async_trait]
impl PriceFetcher for StaticBodyFetcher {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, asset: &str, currency: &str) -> Result<Quote, FetchError> {
        parse_simple_price(self.0, asset, currency, Utc::now())
    }
}

/// Never answers within the submit timeout
struct StalledSubmitter;

#[async_trait]
impl OracleSubmitter for StalledSubmitter {
    async fn submit(
        &self,
        _ctx: &RunContext,
        _value: &ReportValue,
    ) -> Result<TransactionHandle, ReportError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(SubmissionError::Rejected("unreachable".into()).into())
    }
}

fn ctx() -> RunContext {
    RunContext {
        reporter: Address::repeat_byte(0x11),
        oracle: Address::repeat_byte(0x22),
        request_id: U256::one(),
        asset: "ethereum".to_string(),
        currency: "usd".to_string(),
        adjustment_bps: 20,
        scale_factor: 1_000_000,
        gas_limit: 250_000,
        gas_price_multiplier: 10.0,
        confirmations: 1,
        poll_interval: Duration::from_secs(20),
        poll_timeout: Duration::from_secs(600),
        fetch_timeout: Duration::from_secs(10),
        submit_timeout: Duration::from_secs(30),
    }
}

fn quote(price: Decimal) -> Quote {
    Quote {
        asset: "ethereum".to_string(),
        currency: "usd".to_string(),
        price,
        observed_at: Utc::now(),
        source: "mock".to_string(),
    }
}

fn handle(ctx: &RunContext) -> TransactionHandle {
    TransactionHandle {
        tx_hash: H256::from_low_u64_be(0xabc),
        submitted_at: Utc::now(),
        contract: ctx.oracle,
        reporter: ctx.reporter,
        nonce: U256::from(7u64),
        request_id: ctx.request_id,
    }
}

fn fetcher_returning(price: Decimal) -> MockFetcher {
    let mut fetcher = MockFetcher::new();
    fetcher.expect_name().return_const("mock");
    fetcher
        .expect_fetch()
        .with(eq("ethereum"), eq("usd"))
        .times(1)
        .returning(move |_, _| Ok(quote(price)));
    fetcher
}

fn untouched_submitter() -> MockSubmitter {
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(0);
    submitter
}

fn untouched_chain() -> MockChain {
    let mut chain = MockChain::new();
    chain.expect_block_number().times(0);
    chain.expect_inclusion_block().times(0);
    chain
}

#[tokio::test(start_paused = true)]
async fn reports_and_confirms_end_to_end() {
    let ctx = ctx();
    let expected_handle = handle(&ctx);

    let mut submitter = MockSubmitter::new();
    let submitted = expected_handle.clone();
    submitter
        .expect_submit()
        .withf(|_, value| value.value() == 3_006_000_000)
        .times(1)
        .returning(move |_, _| Ok(submitted.clone()));

    let mut chain = MockChain::new();
    chain
        .expect_inclusion_block()
        .with(eq(H256::from_low_u64_be(0xabc)))
        .times(2)
        .returning(|_| Ok(Some(100)));
    // Depth 0 on the first poll, 1 on the second
    let head = AtomicU64::new(100);
    chain
        .expect_block_number()
        .times(2)
        .returning(move || Ok(head.fetch_add(1, Ordering::SeqCst)));

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(fetcher_returning(dec!(3000.00))),
        Arc::new(submitter),
        Arc::new(chain),
    );
    let report = orchestrator.run_once(&ctx).await;

    assert!(report.is_success(), "{}", report);
    assert!(report.error.is_none());
    assert_eq!(report.stage, Stage::Confirm);
    assert_eq!(report.report_value.as_ref().unwrap().value(), 3_006_000_000);
    assert_eq!(report.transaction.as_ref(), Some(&expected_handle));

    let confirmation = report.confirmation.as_ref().unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Confirmed);
    assert_eq!(confirmation.depth, 1);
    assert_eq!(confirmation.handle, expected_handle);

    let record = RunRecord::new(&report, &ctx);
    assert_eq!(record.outcome, "success");
    assert_eq!(record.report_value.as_deref(), Some("3006000000"));
    assert_eq!(record.confirmation_status.as_deref(), Some("confirmed"));
    assert!(!record.safe_to_rerun);
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_halts_the_run() {
    let mut fetcher = MockFetcher::new();
    fetcher.expect_name().return_const("mock");
    fetcher.expect_fetch().times(1).returning(|_, _| {
        Err(FetchError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    });

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(fetcher),
        Arc::new(untouched_submitter()),
        Arc::new(untouched_chain()),
    );
    let report = orchestrator.run_once(&ctx()).await;

    assert_eq!(report.failed_stage(), Some(Stage::Fetch));
    assert!(matches!(report.error, Some(ReportError::Fetch(_))));
    assert!(report.quote.is_none());
    assert!(report.report_value.is_none());
    assert!(report.transaction.is_none());
    assert!(report.is_safe_to_rerun());
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_a_fetch_error() {
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(StaticBodyFetcher(r#"{"ethereum":{"eur":2800.0}}"#)),
        Arc::new(untouched_submitter()),
        Arc::new(untouched_chain()),
    );
    let report = orchestrator.run_once(&ctx()).await;

    assert_eq!(report.failed_stage(), Some(Stage::Fetch));
    assert!(matches!(
        report.error,
        Some(ReportError::Fetch(FetchError::MissingField { .. }))
    ));
    assert!(report.transaction.is_none());
}

#[tokio::test(start_paused = true)]
async fn invalid_quote_stops_before_submission() {
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(fetcher_returning(dec!(-1))),
        Arc::new(untouched_submitter()),
        Arc::new(untouched_chain()),
    );
    let report = orchestrator.run_once(&ctx()).await;

    assert_eq!(report.failed_stage(), Some(Stage::Transform));
    assert!(matches!(
        report.error,
        Some(ReportError::InvalidQuote(InvalidQuoteError::NonPositive(_)))
    ));
    assert!(report.quote.is_some());
    assert!(report.report_value.is_none());
}

#[tokio::test(start_paused = true)]
async fn submission_error_keeps_quote_and_value() {
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(1).returning(|_, _| {
        Err(SubmissionError::NonceConflict("nonce too low".to_string()).into())
    });

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(fetcher_returning(dec!(3000.00))),
        Arc::new(submitter),
        Arc::new(untouched_chain()),
    );
    let report = orchestrator.run_once(&ctx()).await;

    assert_eq!(report.failed_stage(), Some(Stage::Submit));
    assert!(matches!(
        report.error,
        Some(ReportError::Submission(SubmissionError::NonceConflict(_)))
    ));
    assert!(report.quote.is_some());
    assert!(report.report_value.is_some());
    assert!(report.transaction.is_none());
    assert!(report.confirmation.is_none());
    assert!(report.is_safe_to_rerun());
}

#[tokio::test(start_paused = true)]
async fn stalled_submission_is_ambiguous() {
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(fetcher_returning(dec!(3000.00))),
        Arc::new(StalledSubmitter),
        Arc::new(untouched_chain()),
    );
    let started = tokio::time::Instant::now();
    let report = orchestrator.run_once(&ctx()).await;

    // The submitter owns its submit_timeout; the orchestrator only cuts it off later
    assert!(started.elapsed() >= submit_backstop(&ctx()));
    assert_eq!(report.failed_stage(), Some(Stage::Submit));
    match &report.error {
        Some(ReportError::AmbiguousSubmission(e)) => assert!(e.tx_hash.is_none()),
        other => panic!("expected ambiguous submission, got {other:?}"),
    }
    assert!(report.transaction.is_none());
    assert!(!report.is_safe_to_rerun());
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_keeps_the_trail() {
    let ctx = RunContext {
        poll_timeout: Duration::from_secs(60),
        ..ctx()
    };
    let submitted = handle(&ctx);

    let mut submitter = MockSubmitter::new();
    submitter
        .expect_submit()
        .times(1)
        .returning(move |_, _| Ok(submitted.clone()));

    let mut chain = MockChain::new();
    chain.expect_inclusion_block().returning(|_| Ok(None));
    chain.expect_block_number().times(0);

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(fetcher_returning(dec!(3000.00))),
        Arc::new(submitter),
        Arc::new(chain),
    );
    let report = orchestrator.run_once(&ctx).await;

    assert_eq!(report.failed_stage(), Some(Stage::Confirm));
    assert!(matches!(
        report.error,
        Some(ReportError::ConfirmationTimeout(_))
    ));
    assert!(report.transaction.is_some());
    let confirmation = report.confirmation.as_ref().unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::NotFound);
    assert!(confirmation.elapsed >= Duration::from_secs(60));
    assert!(!report.is_safe_to_rerun());

    let record = RunRecord::new(&report, &ctx);
    assert_eq!(record.outcome, "failed");
    assert_eq!(record.error_kind.as_deref(), Some("confirmation_timeout"));
    assert_eq!(record.confirmation_status.as_deref(), Some("not_found"));
}

#[tokio::test(start_paused = true)]
async fn rpc_failure_while_confirming_aborts() {
    let ctx = ctx();
    let submitted = handle(&ctx);

    let mut submitter = MockSubmitter::new();
    submitter
        .expect_submit()
        .times(1)
        .returning(move |_, _| Ok(submitted.clone()));

    let mut chain = MockChain::new();
    chain
        .expect_inclusion_block()
        .times(1)
        .returning(|_| Err(TransientRpcError::new("eth_getTransactionReceipt", "connection reset")));

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(fetcher_returning(dec!(3000.00))),
        Arc::new(submitter),
        Arc::new(chain),
    );
    let report = orchestrator.run_once(&ctx).await;

    assert_eq!(report.failed_stage(), Some(Stage::Confirm));
    assert!(matches!(report.error, Some(ReportError::TransientRpc(_))));
    assert!(report.confirmation.is_none());
}
