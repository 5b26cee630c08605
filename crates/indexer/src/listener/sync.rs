//! Block-range sync feeding the incremental updater.

use alloy::primitives::B256;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{ChainEvent, EventSource};
use crate::config::SyncConfig;
use crate::storage::Storage;

/// Polls confirmed blocks in batches and forwards their events.
///
/// Progress is persisted after each batch has been handed to the channel,
/// so a restart resumes at the next unsent block.
pub struct SyncEngine {
    source: Arc<dyn EventSource>,
    storage: Storage,
    config: SyncConfig,
    sender: mpsc::Sender<ChainEvent>,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(
        source: Arc<dyn EventSource>,
        storage: Storage,
        config: SyncConfig,
        sender: mpsc::Sender<ChainEvent>,
    ) -> Self {
        Self {
            source,
            storage,
            config,
            sender,
        }
    }

    /// Run the sync loop until an error occurs or the channel closes.
    pub async fn run(&self) -> Result<()> {
        info!("Sync engine starting...");
        self.apply_start_block().await?;

        loop {
            let synced = self.sync_step().await?;
            if synced < self.config.batch_size {
                tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
            }
        }
    }

    /// Move a fresh database to the configured start block.
    pub async fn apply_start_block(&self) -> Result<()> {
        let state = self.storage.get_sync_state().await?;
        if state.last_block_number == 0 && self.config.start_block > 1 {
            info!("Starting sync at block {}", self.config.start_block);
            self.storage
                .initialize_sync_state(state.chain_id, self.config.start_block - 1, B256::ZERO)
                .await?;
        }
        Ok(())
    }

    /// Process at most one batch of confirmed blocks.
    ///
    /// Returns how many blocks were covered; zero when caught up.
    pub async fn sync_step(&self) -> Result<u64> {
        let state = self.storage.get_sync_state().await?;
        let head = self.source.latest_block().await?;
        let confirmed = head.saturating_sub(self.config.confirmations);

        let from = state.last_block_number + 1;
        if confirmed < from {
            debug!(
                "Caught up: last={}, head={}, confirmations={}",
                state.last_block_number, head, self.config.confirmations
            );
            return Ok(0);
        }

        let to = confirmed.min(state.last_block_number + self.config.batch_size);
        let behind = confirmed - state.last_block_number;
        if behind > self.config.batch_size {
            info!("Historical sync: blocks {} to {} ({} behind)", from, to, behind);
        } else {
            debug!("Live sync: blocks {} to {}", from, to);
        }

        let events = self
            .source
            .events(from, to)
            .await
            .with_context(|| format!("Failed to fetch events for blocks {} to {}", from, to))?;

        if !events.is_empty() {
            info!("Blocks {} to {}: {} events", from, to, events.len());
        }

        for event in events {
            self.sender
                .send(event)
                .await
                .map_err(|_| anyhow!("Event channel closed"))?;
        }

        let hash = self.source.block_hash(to).await?.unwrap_or(B256::ZERO);
        self.storage.record_progress(to, hash).await?;

        Ok(to - from + 1)
    }
}
