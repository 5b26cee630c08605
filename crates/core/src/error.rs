//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed account or token address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Amount is not a non-negative integer in canonical decimal form.
    #[error("Invalid amount: {0} (expected a non-negative decimal integer without leading zeros)")]
    InvalidAmount(String),

    /// Edge endpoints are the same account.
    #[error("Self-loop edge for account {0}")]
    SelfLoop(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
