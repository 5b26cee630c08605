//! Chain listener for hub `Trust` and token `Transfer` events.
//!
//! This module provides:
//! - Event definitions and decoding into [`ChainEvent`]
//! - RPC provider wrapper for log polling
//! - Sync engine that forwards events over an mpsc channel

use alloy::primitives::B256;
use anyhow::Result;
use async_trait::async_trait;

pub mod events;
pub mod provider;
pub mod sync;

pub use events::ChainEvent;
pub use provider::RpcProvider;
pub use sync::SyncEngine;

/// Source of decoded chain events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Latest block number known to the node.
    async fn latest_block(&self) -> Result<u64>;

    /// Hash of a block, if known.
    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>>;

    /// Tracked events in `from_block..=to_block`, ordered by position.
    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>>;
}

#[async_trait]
impl EventSource for RpcProvider {
    async fn latest_block(&self) -> Result<u64> {
        self.get_block_number().await
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>> {
        self.get_block_hash(block_number).await
    }

    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainEvent>> {
        self.get_events(from_block, to_block).await
    }
}
