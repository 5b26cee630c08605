//! Trust-flow graph derivation for Circles.
//!
//! This crate provides:
//! - Input records for a derivation pass (accounts, trust connections, balances)
//! - The derivation engine turning those records into capacitated edges
//! - Pass statistics for observability
//!
//! Derivation is pure: it runs over one in-memory snapshot and performs no I/O.

#![warn(missing_docs)]

pub mod builder;
pub mod input;

pub use builder::{derive_edges, DerivedGraph, GraphBuilder, GraphStatistics};
pub use input::{Account, TokenBalance, TrustConnection};
