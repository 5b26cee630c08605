//! # Circles Core
//!
//! Shared types and utilities for the Circles trust-flow graph.
//!
//! This crate provides the building blocks used by the derivation engine and
//! the indexer service:
//!
//! - **Addresses**: checksum normalization on top of Alloy's `Address`
//! - **Amounts**: non-negative integers carried as decimal strings, compared
//!   without big-integer parsing
//! - **Edges**: the `(from, to, token, capacity)` routing primitive and its key
//! - **Constants**: defaults shared between crates

#![warn(missing_docs)]

pub mod address;
pub mod amount;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use address::{normalize_address, parse_address};
pub use amount::{min_decimal_string, reduce_capacity_precision, Amount};
pub use constants::*;
pub use error::{CoreError, Result};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, U256};
