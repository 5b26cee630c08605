//! Access to the Circles subgraph (the external graph indexer).
//!
//! The rest of the crate only sees the traits defined here; the
//! [`SubgraphClient`] is the production implementation.

use anyhow::Result;
use async_trait::async_trait;
use circles_core::Address;
use circles_graph::Account;

pub mod client;
pub mod endpoint;
pub mod types;

pub use client::SubgraphClient;
pub use endpoint::EndpointService;

/// Source of the full account set for a rebuild.
#[async_trait]
pub trait SafeSource: Send + Sync {
    /// Fetch every account with its connections and balances.
    ///
    /// Either the whole set is returned or the call fails.
    async fn fetch_accounts(&self) -> Result<Vec<Account>>;
}

/// Lookup of the accounts accepting a given owner's token.
#[async_trait]
pub trait TrustLookup: Send + Sync {
    /// Accounts that trust `owner`, excluding `owner` itself.
    async fn trusters_of(&self, owner: Address) -> Result<Vec<Address>>;
}

/// Health probe against a single endpoint.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> Result<()>;
}
