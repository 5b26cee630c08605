//! Full rebuild of the edge store from the subgraph.
//!
//! A rebuild fetches every safe, derives the complete edge set and
//! reconciles the store against it in one transaction. It is the
//! authoritative path: whatever the incremental updater missed or raced on
//! is corrected here.

use anyhow::{Context, Result};
use circles_graph::{derive_edges, GraphStatistics};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

use crate::storage::{BulkReplaceSummary, Storage};
use crate::subgraph::SafeSource;

/// Outcome of one completed rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Raw input counts from the derivation pass.
    pub statistics: GraphStatistics,
    /// Number of unique edges derived.
    pub derived: usize,
    /// Store reconciliation counts.
    pub summary: BulkReplaceSummary,
    /// Wall-clock duration of the rebuild.
    pub duration_ms: u64,
    /// Unix timestamp of completion.
    pub built_at: i64,
}

#[derive(Debug, Default)]
struct Coalescer {
    in_flight: bool,
    pending: bool,
}

/// Runs rebuilds one at a time, periodically and on demand.
#[derive(Clone)]
pub struct RebuildService {
    storage: Storage,
    source: Arc<dyn SafeSource>,
    interval: Duration,
    coalescer: Arc<Mutex<Coalescer>>,
    trigger: Arc<Notify>,
    last_report: Arc<RwLock<Option<RebuildReport>>>,
}

impl RebuildService {
    /// Create a rebuild service.
    ///
    /// # Arguments
    ///
    /// * `storage` - Edge store to reconcile
    /// * `source` - Source of the full account set
    /// * `interval` - Time between scheduled rebuilds
    pub fn new(storage: Storage, source: Arc<dyn SafeSource>, interval: Duration) -> Self {
        Self {
            storage,
            source,
            interval,
            coalescer: Arc::new(Mutex::new(Coalescer::default())),
            trigger: Arc::new(Notify::new()),
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    /// Run forever: rebuild on startup, on every interval and on `trigger()`.
    pub async fn run(&self) -> Result<()> {
        info!("Rebuild service starting with interval: {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.trigger.notified() => {}
            }

            if let Err(e) = self.request_rebuild().await {
                warn!("Rebuild failed: {:#}", e);
            }
        }
    }

    /// Ask the running service for a rebuild soon.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Rebuild now, or defer if a rebuild is already running.
    ///
    /// A request arriving while another rebuild is in flight returns
    /// `Ok(None)` and causes that rebuild to run once more when it finishes;
    /// further requests in the meantime are absorbed. The caller that
    /// started the rebuild receives the report of the final run.
    pub async fn request_rebuild(&self) -> Result<Option<RebuildReport>> {
        {
            let mut coalescer = self.coalescer.lock().unwrap_or_else(|e| e.into_inner());
            if coalescer.in_flight {
                coalescer.pending = true;
                info!("Rebuild already running, deferring request");
                return Ok(None);
            }
            coalescer.in_flight = true;
        }

        loop {
            let result = self.rebuild().await;

            let rerun = {
                let mut coalescer = self.coalescer.lock().unwrap_or_else(|e| e.into_inner());
                if coalescer.pending {
                    coalescer.pending = false;
                    true
                } else {
                    coalescer.in_flight = false;
                    false
                }
            };

            if !rerun {
                return result.map(Some);
            }
            info!("Running deferred rebuild");
        }
    }

    /// Report of the last successful rebuild.
    pub async fn last_report(&self) -> Option<RebuildReport> {
        self.last_report.read().await.clone()
    }

    /// Fetch, derive and reconcile. Nothing is written if any step fails.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let started = Instant::now();
        info!("Rebuilding edge graph from subgraph...");

        let accounts = self
            .source
            .fetch_accounts()
            .await
            .context("Failed to fetch accounts for rebuild")?;

        let graph = derive_edges(&accounts);
        info!(
            "Derived {} edges from {} safes, {} connections, {} tokens",
            graph.edges.len(),
            graph.statistics.safes,
            graph.statistics.connections,
            graph.statistics.tokens
        );

        let summary = self
            .storage
            .bulk_replace(&graph.edges)
            .await
            .context("Failed to store rebuilt edges")?;

        let report = RebuildReport {
            statistics: graph.statistics,
            derived: graph.edges.len(),
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
            built_at: chrono::Utc::now().timestamp(),
        };

        info!(
            "Rebuild complete in {}ms: {} added, {} updated, {} removed, {} total",
            report.duration_ms, summary.added, summary.updated, summary.removed, summary.total
        );

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }
}
