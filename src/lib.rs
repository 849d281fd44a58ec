//! Oracle Reporter Library
//!
//! Fetches a market price, turns it into a fixed-point value and reports it
//! to an on-chain oracle contract, then waits for the transaction to be
//! buried under enough blocks.

pub mod chain;
pub mod config;
pub mod error;
pub mod oracle;
pub mod persistence;
pub mod pipeline;
pub mod types;

pub use error::ReportError;
pub use pipeline::{PipelineOrchestrator, RunReport};
