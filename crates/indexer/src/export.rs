//! Edge snapshot export for the external solver.

use anyhow::{Context, Result};
use circles_core::Edge;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::storage::Storage;

static EXPORT_SEQ: AtomicU64 = AtomicU64::new(0);

/// One edge in the solver input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverEdge {
    pub from: String,
    pub to: String,
    pub token: String,
    pub capacity: String,
}

impl From<&Edge> for SolverEdge {
    fn from(edge: &Edge) -> Self {
        Self {
            from: edge.from.to_checksum(None),
            to: edge.to.to_checksum(None),
            token: edge.token.to_checksum(None),
            capacity: edge.capacity.to_string(),
        }
    }
}

/// Result of writing one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub edges: usize,
    pub bytes: usize,
}

/// Write every stored edge to `path` as a JSON array.
///
/// The edges come from a single query. The file is written under a
/// temporary name in the same directory and renamed into place, so readers
/// see either the previous or the new snapshot.
pub async fn export_snapshot(storage: &Storage, path: &Path) -> Result<ExportReport> {
    let edges = storage
        .all_edges()
        .await
        .context("Failed to read edges for export")?;

    let records: Vec<SolverEdge> = edges.iter().map(SolverEdge::from).collect();
    let json = serde_json::to_vec(&records).context("Failed to serialize edges")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let temp_path = temp_path_for(path);
    tokio::fs::write(&temp_path, &json)
        .await
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e).with_context(|| format!("Failed to move snapshot to {}", path.display()));
    }

    Ok(ExportReport {
        path: path.to_path_buf(),
        edges: records.len(),
        bytes: json.len(),
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "edges.json".to_string());
    let seq = EXPORT_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}

/// Re-exports the snapshot after the edge store changes.
///
/// Waits for the store's dirty signal, then for the debounce window so a
/// burst of writes produces a single export.
pub struct ExportScheduler {
    storage: Storage,
    path: PathBuf,
    debounce: Duration,
}

impl ExportScheduler {
    pub fn new(storage: Storage, path: PathBuf, debounce: Duration) -> Self {
        Self {
            storage,
            path,
            debounce,
        }
    }

    /// Export once on startup, then after every burst of writes.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Export scheduler writing {} (debounce {:?})",
            self.path.display(),
            self.debounce
        );

        let dirty = self.storage.dirty_notify();
        self.export().await;

        loop {
            dirty.notified().await;
            tokio::time::sleep(self.debounce).await;
            self.export().await;
        }
    }

    async fn export(&self) {
        let started = Instant::now();
        match export_snapshot(&self.storage, &self.path).await {
            Ok(report) => debug!(
                "Exported {} edges ({} bytes) in {:?}",
                report.edges,
                report.bytes,
                started.elapsed()
            ),
            Err(e) => warn!("Snapshot export failed: {:#}", e),
        }
    }
}
