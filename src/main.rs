//! oracle-reporter - push a market price to an on-chain oracle
//!
//! `run` performs a single report, `daemon` repeats it on a fixed cadence.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use oracle_reporter::chain::{EthersChain, EthersSubmitter};
use oracle_reporter::config::AppConfig;
use oracle_reporter::oracle::CoinGeckoClient;
use oracle_reporter::persistence::{RunLedger, RunRecord};
use oracle_reporter::pipeline::{PipelineOrchestrator, RunReport};
use oracle_reporter::types::RunContext;

#[derive(Debug, Parser)]
#[command(name = "oracle-reporter", version, about = "Report market prices to an on-chain oracle")]
struct Cli {
    /// Extra YAML config layered over config/default.yaml and config/local.yaml
    #[arg(long, global = true, value_name = "PATH", env = "REPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "REPORTER_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a single report run
    Run,
    /// Report on a fixed cadence until interrupted
    Daemon {
        /// Overrides schedule.interval_secs
        #[arg(long, value_name = "SECONDS")]
        interval_secs: Option<u64>,
        /// Stop after a run whose transaction may still land on-chain
        /// (also schedule.halt_on_ambiguous)
        #[arg(long)]
        halt_on_ambiguous: bool,
    },
    /// Print the effective configuration (secrets omitted)
    ShowConfig,
    /// Print recent runs from the run ledger
    History {
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before clap, so .env can supply REPORTER_CONFIG and REPORTER_LOG_JSON
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::ShowConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Command::History { days } => print_history(&config, days),
        Command::Run => {
            let reporter = Reporter::connect(&config).await?;
            run_single(&reporter).await
        }
        Command::Daemon {
            interval_secs,
            halt_on_ambiguous,
        } => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.schedule.interval());
            if interval.is_zero() {
                bail!("--interval-secs must be greater than zero");
            }
            let halt = halt_on_ambiguous || config.schedule.halt_on_ambiguous;
            let reporter = Reporter::connect(&config).await?;
            run_daemon(&reporter, interval, halt).await
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wired pipeline plus the context and ledger it runs with
struct Reporter {
    orchestrator: PipelineOrchestrator,
    ctx: RunContext,
    ledger: Option<RunLedger>,
}

impl Reporter {
    async fn connect(config: &AppConfig) -> Result<Self> {
        config.validate_env()?;
        let ctx = config.run_context()?;

        let chain = EthersChain::new(&config.chain.rpc_url, config.chain.submit_timeout())?;
        let chain_id = match config.chain.chain_id {
            Some(id) => id,
            None => chain
                .chain_id()
                .await
                .context("Failed to query chain id from the node")?,
        };

        let submitter = EthersSubmitter::new(
            chain.provider().clone(),
            &config.private_key()?,
            chain_id,
            &config.chain.report_function,
        )?;
        if submitter.address() != ctx.reporter {
            bail!(
                "REPORTER_PRIVATE_KEY belongs to {:#x}, but reporter.address is {:#x}",
                submitter.address(),
                ctx.reporter
            );
        }

        let fetcher = CoinGeckoClient::new(
            &config.price.base_url,
            config.price.api_key.clone(),
            config.price.fetch_timeout(),
        )?;

        let ledger = if config.persistence.csv_enabled {
            Some(RunLedger::new(&config.persistence.data_dir)?)
        } else {
            None
        };

        info!(config = %config.digest(), chain_id, "🔌 Reporter ready");

        Ok(Self {
            orchestrator: PipelineOrchestrator::new(
                Arc::new(fetcher),
                Arc::new(submitter),
                Arc::new(chain),
            ),
            ctx,
            ledger,
        })
    }

    async fn run_once(&self) -> RunReport {
        let report = self.orchestrator.run_once(&self.ctx).await;
        self.record(&report).await;
        report
    }

    /// Ledger failures never change the run outcome
    async fn record(&self, report: &RunReport) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        match ledger.append(&RunRecord::new(report, &self.ctx)).await {
            Ok(path) => debug!(path = %path.display(), "Run recorded"),
            Err(e) => warn!(error = %e, "Failed to write run ledger"),
        }
    }
}

async fn run_single(reporter: &Reporter) -> Result<()> {
    let report = tokio::select! {
        report = reporter.run_once() => report,
        _ = tokio::signal::ctrl_c() => {
            bail!("Interrupted before the run finished; check the reporter's latest transaction before rerunning");
        }
    };

    if report.is_success() {
        println!("{}", report);
        Ok(())
    } else {
        bail!("Report run failed: {}", report)
    }
}

async fn run_daemon(
    reporter: &Reporter,
    interval: Duration,
    halt_on_ambiguous: bool,
) -> Result<()> {
    info!(
        interval_secs = interval.as_secs(),
        halt_on_ambiguous,
        "⏱️ Starting report daemon"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let (mut succeeded, mut failed) = (0u64, 0u64);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        // Runs never overlap: the next tick is only awaited after this one ends.
        let report = tokio::select! {
            report = reporter.run_once() => report,
            _ = &mut shutdown => {
                warn!("Shutdown during a run; in-flight run abandoned");
                break;
            }
        };

        if report.is_success() {
            succeeded += 1;
        } else {
            failed += 1;
            if report.needs_resolution() {
                warn!(
                    run_id = %report.run_id,
                    "Previous report may still land on-chain"
                );
                if halt_on_ambiguous {
                    info!(succeeded, failed, "🛑 Report daemon halted");
                    bail!(
                        "Run {} left an unresolved transaction; check the reporter's latest transaction before restarting",
                        report.run_id
                    );
                }
            }
        }
    }

    info!(succeeded, failed, "🛑 Report daemon stopped");
    Ok(())
}

fn print_history(config: &AppConfig, days: u32) -> Result<()> {
    let ledger = RunLedger::new(&config.persistence.data_dir)?;
    let records = ledger.load_recent(days)?;

    if records.is_empty() {
        println!("No runs recorded in the last {} day(s)", days);
        return Ok(());
    }

    for r in records {
        println!(
            "{} {} {:<7} stage={:<9} value={} tx={} confirmation={}{}",
            r.started_at,
            r.run_id,
            r.outcome,
            r.stage,
            r.report_value.as_deref().unwrap_or("-"),
            r.tx_hash.as_deref().unwrap_or("-"),
            r.confirmation_status.as_deref().unwrap_or("-"),
            r.error.map(|e| format!(" error={}", e)).unwrap_or_default(),
        );
    }
    Ok(())
}
