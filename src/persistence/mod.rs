//! CSV Persistence Module
//!
//! Append-only run ledger: one row per report run, one file per day.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::pipeline::RunReport;
use crate::types::RunContext;

/// Run record for CSV storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub stage: String,
    /// "success" or "failed"
    pub outcome: String,
    pub asset: String,
    pub currency: String,
    pub request_id: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub report_value: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub confirmation_status: Option<String>,
    #[serde(default)]
    pub depth: Option<u64>,
    #[serde(default)]
    pub inclusion_block: Option<u64>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    pub safe_to_rerun: bool,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(report: &RunReport, ctx: &RunContext) -> Self {
        let outcome = if report.error.is_none() {
            "success"
        } else {
            "failed"
        };

        // The ambiguous case may still know the hash even without a handle
        let tx_hash = report
            .transaction
            .as_ref()
            .map(|tx| tx.tx_hash)
            .or_else(|| match &report.error {
                Some(crate::error::ReportError::AmbiguousSubmission(e)) => e.tx_hash,
                _ => None,
            })
            .map(|h| format!("{:#x}", h));

        Self {
            run_id: report.run_id.to_string(),
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.to_rfc3339(),
            stage: report.stage.to_string(),
            outcome: outcome.to_string(),
            asset: ctx.asset.clone(),
            currency: ctx.currency.clone(),
            request_id: ctx.request_id.to_string(),
            price: report.quote.as_ref().map(|q| q.price),
            report_value: report.report_value.as_ref().map(|v| v.value().to_string()),
            tx_hash,
            nonce: report.transaction.as_ref().map(|tx| tx.nonce.to_string()),
            confirmation_status: report
                .confirmation
                .as_ref()
                .map(|c| c.status.to_string()),
            depth: report.confirmation.as_ref().map(|c| c.depth),
            inclusion_block: report.confirmation.as_ref().and_then(|c| c.inclusion_block),
            elapsed_ms: report
                .confirmation
                .as_ref()
                .map(|c| c.elapsed.as_millis() as u64),
            safe_to_rerun: report.is_safe_to_rerun(),
            error_kind: report.error.as_ref().map(|e| e.kind().to_string()),
            error: report.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Daily CSV files under `{data_dir}/runs`
pub struct RunLedger {
    runs_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RunLedger {
    /// Create a new ledger, creating the directory if needed
    pub fn new(data_dir: &str) -> Result<Self> {
        let runs_dir = PathBuf::from(data_dir).join("runs");
        fs::create_dir_all(&runs_dir).context("Failed to create runs directory")?;

        Ok(Self {
            runs_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn file_for(&self, date: DateTime<Utc>) -> PathBuf {
        self.runs_dir
            .join(format!("runs_{}.csv", date.format("%Y-%m-%d")))
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Append one run. The file is picked by the current date so a
    /// long-running daemon rolls over at midnight UTC.
    pub async fn append(&self, record: &RunRecord) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let path = self.file_for(Utc::now());

        let mut writer = Self::create_writer(&path)?;
        writer
            .serialize(record)
            .context("Failed to write run record")?;
        writer.flush().context("Failed to flush run writer")?;
        Ok(path)
    }

    /// Load runs from the last `days` daily files, oldest first
    pub fn load_recent(&self, days: u32) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();

        for i in (0..days).rev() {
            let date = Utc::now() - chrono::Duration::days(i as i64);
            let path = self.file_for(date);

            if path.exists() {
                let file = std::fs::File::open(&path).context("Failed to open runs file")?;
                let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

                for result in reader.deserialize() {
                    let record: RunRecord = result.context("Failed to deserialize run record")?;
                    records.push(record);
                }
            }
        }

        Ok(records)
    }
}
