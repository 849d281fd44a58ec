//! Calldata for the oracle report function
//!
//! The report function takes `(uint256 requestId, uint256 value)`. Only the
//! function name is configurable.

use anyhow::{bail, Result};
use ethers::abi::{encode, Token};
use ethers::types::{Bytes, U256};
use ethers::utils::id;

/// Tellor-style report entry point
pub const DEFAULT_REPORT_FUNCTION: &str = "submitValue(uint256,uint256)";

const REPORT_ARGS: &str = "(uint256,uint256)";

/// Check that `signature` is `<name>(uint256,uint256)`
pub fn validate_report_function(signature: &str) -> Result<()> {
    let Some(name) = signature.strip_suffix(REPORT_ARGS) else {
        bail!(
            "Report function '{}' must take {} arguments",
            signature,
            REPORT_ARGS
        );
    };

    let valid_name = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        bail!("Report function '{}' has an invalid name", signature);
    }

    Ok(())
}

/// ABI-encode a report call: 4-byte selector followed by two words
pub fn encode_report_call(signature: &str, request_id: U256, value: U256) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(&[Token::Uint(request_id), Token::Uint(value)]));
    Bytes::from(data)
}
