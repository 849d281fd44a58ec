//! Oracle module - price acquisition and transformation
//!
//! Fetches a reference quote from an off-chain source and turns it into
//! the fixed-point integer the on-chain oracle expects.

pub mod sources;
mod transform;

pub use sources::{CoinGeckoClient, PriceFetcher, COINGECKO_API_URL};
pub use transform::{transform, BPS_DENOMINATOR};
