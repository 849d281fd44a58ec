//! Price source implementations

mod coingecko;

pub use coingecko::{parse_simple_price, CoinGeckoClient, COINGECKO_API_URL};

use async_trait::async_trait;

use crate::error::FetchError;
use crate::types::Quote;

/// Trait for quote sources.
///
/// One call is one outbound request. Implementations must not retry or
/// cache; each call reflects the market at call time.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Get the source name
    fn name(&self) -> &'static str;

    /// Fetch the current price of `asset` in `currency`
    async fn fetch(&self, asset: &str, currency: &str) -> Result<Quote, FetchError>;
}
