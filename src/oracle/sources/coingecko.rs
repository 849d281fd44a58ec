//! CoinGecko simple price client
//!
//! `GET /simple/price?ids=<asset>&vs_currencies=<currency>&include_last_updated_at=true`
//! returns `{"ethereum": {"usd": 3000.12, "last_updated_at": 1700000000}}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FetchError;
use crate::oracle::sources::PriceFetcher;
use crate::types::Quote;

pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";
const COINGECKO_PRO_HOST: &str = "pro-api.coingecko.com";
const MAX_ERROR_BODY: usize = 256;

/// REST client for the CoinGecko simple price endpoint
#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout,
        })
    }

    /// Demo and pro plans authenticate with different headers
    fn api_key_header(&self) -> &'static str {
        if self.base_url.contains(COINGECKO_PRO_HOST) {
            "x-cg-pro-api-key"
        } else {
            "x-cg-demo-api-key"
        }
    }

    fn request_error(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl PriceFetcher for CoinGeckoClient {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch(&self, asset: &str, currency: &str) -> Result<Quote, FetchError> {
        let url = format!("{}/simple/price", self.base_url);

        let mut request = self.client.get(&url).query(&[
            ("ids", asset),
            ("vs_currencies", currency),
            ("include_last_updated_at", "true"),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header(self.api_key_header(), key);
        }

        tracing::debug!(source = %"coingecko", %asset, %currency, "Fetching price");

        let response = request
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        parse_simple_price(&body, asset, currency, Utc::now())
    }
}

/// Parse a `/simple/price` body into a quote.
///
/// `received_at` is used as the observation time when the payload has no
/// `last_updated_at`.
pub fn parse_simple_price(
    body: &str,
    asset: &str,
    currency: &str,
    received_at: DateTime<Utc>,
) -> Result<Quote, FetchError> {
    let payload: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    if !payload.is_object() {
        return Err(FetchError::Malformed(format!(
            "expected a JSON object, got {}",
            payload
        )));
    }

    let asset_key = asset.to_lowercase();
    let currency_key = currency.to_lowercase();
    let missing = || FetchError::MissingField {
        asset: asset_key.clone(),
        currency: currency_key.clone(),
    };

    let entry = payload.get(&asset_key).ok_or_else(missing)?;
    let price_value = entry.get(&currency_key).ok_or_else(missing)?;

    let price = match price_value {
        Value::Number(n) => parse_decimal(&n.to_string()).ok_or_else(|| {
            FetchError::Malformed(format!(
                "price for {}/{} is out of range: {}",
                asset_key, currency_key, n
            ))
        })?,
        other => {
            return Err(FetchError::Malformed(format!(
                "price for {}/{} is not a number: {}",
                asset_key, currency_key, other
            )))
        }
    };

    let observed_at = entry
        .get("last_updated_at")
        .and_then(Value::as_i64)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or(received_at);

    Ok(Quote {
        asset: asset_key,
        currency: currency_key,
        price,
        observed_at,
        source: "coingecko".to_string(),
    })
}

/// JSON numbers print either plain (`3000.12`) or in exponent form (`1e-7`)
fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}
