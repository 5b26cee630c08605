//! Address normalization.
//!
//! Accounts and tokens are compared and persisted in their EIP-55 checksum
//! form so that the same account never shows up under two spellings.

use alloy_primitives::Address;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Parse a 20-byte hex address, with or without `0x`, in any letter case.
///
/// Mixed-case input is accepted without verifying its checksum; the
/// subgraph returns lowercase ids while chain logs are already checksummed.
pub fn parse_address(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidAddress(raw.to_string()));
    }

    Address::from_str(hex).map_err(|_| CoreError::InvalidAddress(raw.to_string()))
}

/// Normalize an address to its checksummed `0x`-prefixed representation.
///
/// # Example
///
/// ```
/// use circles_core::normalize_address;
///
/// let addr = normalize_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
/// assert_eq!(addr, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
/// ```
pub fn normalize_address(raw: &str) -> Result<String> {
    parse_address(raw).map(|address| address.to_checksum(None))
}
