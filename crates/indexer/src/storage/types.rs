//! Database types for the indexer storage layer.

use alloy::primitives::B256;
use circles_core::{Address, Edge};
use serde::{Deserialize, Serialize};

/// Position of a chain event, used to order incremental writes to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    /// Block number
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,
}

impl EventPosition {
    /// Create a new event position.
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// An edge as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEdge {
    /// The edge itself.
    pub edge: Edge,

    /// Position of the event behind the last incremental write, if any.
    ///
    /// `None` means the row was last written by a full rebuild.
    pub position: Option<EventPosition>,

    /// Unix timestamp of the last write.
    pub updated_at: i64,
}

/// Optional filters for edge queries. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeFilter {
    /// Match the sending account.
    pub from: Option<Address>,

    /// Match the receiving account.
    pub to: Option<Address>,

    /// Match the token owner.
    pub token: Option<Address>,
}

impl EdgeFilter {
    /// Filter on the sending account.
    pub fn from(address: Address) -> Self {
        Self {
            from: Some(address),
            ..Self::default()
        }
    }

    /// Filter on the receiving account.
    pub fn to(address: Address) -> Self {
        Self {
            to: Some(address),
            ..Self::default()
        }
    }

    /// Filter on the token owner.
    pub fn token(address: Address) -> Self {
        Self {
            token: Some(address),
            ..Self::default()
        }
    }
}

/// Outcome of a single-edge write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeWrite {
    /// Row inserted or its capacity replaced.
    Written,

    /// Row removed (zero capacity or explicit delete).
    Deleted,

    /// Nothing to do: delete of an absent row, or an identical upsert.
    Unchanged,

    /// Rejected because the stored row came from a newer event.
    Stale,
}

/// Reconciliation summary of a bulk replace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkReplaceSummary {
    /// Edges with new keys.
    pub added: u64,

    /// Edges whose capacity changed.
    pub updated: u64,

    /// Stored edges absent from the new set.
    pub removed: u64,

    /// Edges in the store after the replace.
    pub total: u64,
}

/// Sync state record (singleton).
///
/// Tracks the listener's progress through the blockchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Last fully processed block number
    pub last_block_number: u64,

    /// Hash of the last processed block
    pub last_block_hash: B256,

    /// Unix timestamp of last update
    pub updated_at: i64,

    /// Chain ID (for safety)
    pub chain_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_position_ordering() {
        let p1 = EventPosition::new(100, 2);
        let p2 = EventPosition::new(100, 3);
        let p3 = EventPosition::new(101, 0);

        assert!(p1 < p2);
        assert!(p2 < p3);
    }

    #[test]
    fn test_edge_filter_constructors() {
        let a = Address::repeat_byte(0x0a);
        assert_eq!(EdgeFilter::from(a).from, Some(a));
        assert_eq!(EdgeFilter::to(a).to, Some(a));
        assert_eq!(EdgeFilter::token(a).token, Some(a));
        assert_eq!(EdgeFilter::default().from, None);
    }
}
