//! Edge storage operations.
//!
//! The `edges` table holds current state only: a row exists while its
//! capacity is positive. Writing a zero capacity removes the row.

use super::{BulkReplaceSummary, EdgeFilter, EdgeWrite, EventPosition, Storage, StoredEdge};
use anyhow::{Context, Result};
use circles_core::{parse_address, Amount, Edge, EdgeKey};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

type KeyStrings = (String, String, String);

fn key_strings(key: &EdgeKey) -> KeyStrings {
    (
        key.from.to_checksum(None),
        key.to.to_checksum(None),
        key.token.to_checksum(None),
    )
}

impl Storage {
    /// Insert or overwrite an edge; a zero capacity deletes it instead.
    ///
    /// Used by full rebuilds and manual writes. The stored event position is
    /// cleared so that any later event may overwrite the row.
    pub async fn upsert_edge(&self, edge: &Edge) -> Result<EdgeWrite> {
        if edge.is_empty() {
            return self.delete_edge(&edge.key()).await;
        }
        anyhow::ensure!(edge.from != edge.to, "Refusing to store self-loop edge {}", edge.key());

        let (from, to, token) = key_strings(&edge.key());
        let result = sqlx::query(
            r#"
            INSERT INTO edges (from_address, to_address, token, capacity, block_number, log_index, updated_at)
            VALUES (?, ?, ?, ?, NULL, NULL, ?)
            ON CONFLICT(from_address, to_address, token)
            DO UPDATE SET
                capacity = excluded.capacity,
                block_number = NULL,
                log_index = NULL,
                updated_at = excluded.updated_at
            WHERE edges.capacity <> excluded.capacity
               OR edges.block_number IS NOT NULL
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(token)
        .bind(edge.capacity.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to upsert edge")?;

        if result.rows_affected() > 0 {
            self.mark_dirty();
            Ok(EdgeWrite::Written)
        } else {
            Ok(EdgeWrite::Unchanged)
        }
    }

    /// Insert or overwrite an edge on behalf of a chain event.
    ///
    /// The write only applies if the stored row has no position or a
    /// position not newer than `position`. A zero capacity deletes under the
    /// same condition.
    pub async fn upsert_edge_at(&self, edge: &Edge, position: EventPosition) -> Result<EdgeWrite> {
        if edge.is_empty() {
            return self.delete_edge_at(&edge.key(), position).await;
        }
        anyhow::ensure!(edge.from != edge.to, "Refusing to store self-loop edge {}", edge.key());

        let (from, to, token) = key_strings(&edge.key());
        let result = sqlx::query(
            r#"
            INSERT INTO edges (from_address, to_address, token, capacity, block_number, log_index, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(from_address, to_address, token)
            DO UPDATE SET
                capacity = excluded.capacity,
                block_number = excluded.block_number,
                log_index = excluded.log_index,
                updated_at = excluded.updated_at
            WHERE edges.block_number IS NULL
               OR (excluded.block_number > edges.block_number)
               OR (excluded.block_number = edges.block_number AND excluded.log_index >= edges.log_index)
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(token)
        .bind(edge.capacity.as_str())
        .bind(position.block_number as i64)
        .bind(position.log_index as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to upsert edge at event position")?;

        if result.rows_affected() > 0 {
            self.mark_dirty();
            Ok(EdgeWrite::Written)
        } else {
            debug!("Stale write for {} at {:?} ignored", edge.key(), position);
            Ok(EdgeWrite::Stale)
        }
    }

    /// Remove an edge. Deleting an absent key is not an error.
    pub async fn delete_edge(&self, key: &EdgeKey) -> Result<EdgeWrite> {
        let (from, to, token) = key_strings(key);
        let result = sqlx::query(
            "DELETE FROM edges WHERE from_address = ? AND to_address = ? AND token = ?",
        )
        .bind(from)
        .bind(to)
        .bind(token)
        .execute(&self.pool)
        .await
        .context("Failed to delete edge")?;

        if result.rows_affected() > 0 {
            self.mark_dirty();
            Ok(EdgeWrite::Deleted)
        } else {
            Ok(EdgeWrite::Unchanged)
        }
    }

    /// Remove an edge unless the stored row came from a newer event.
    pub async fn delete_edge_at(&self, key: &EdgeKey, position: EventPosition) -> Result<EdgeWrite> {
        let (from, to, token) = key_strings(key);
        let result = sqlx::query(
            r#"
            DELETE FROM edges
            WHERE from_address = ? AND to_address = ? AND token = ?
              AND (
                    block_number IS NULL
                 OR block_number < ?
                 OR (block_number = ? AND log_index <= ?)
              )
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(token)
        .bind(position.block_number as i64)
        .bind(position.block_number as i64)
        .bind(position.log_index as i64)
        .execute(&self.pool)
        .await
        .context("Failed to delete edge at event position")?;

        if result.rows_affected() > 0 {
            self.mark_dirty();
            Ok(EdgeWrite::Deleted)
        } else {
            Ok(EdgeWrite::Unchanged)
        }
    }

    /// Fetch one edge by key.
    pub async fn get_edge(&self, key: &EdgeKey) -> Result<Option<StoredEdge>> {
        let (from, to, token) = key_strings(key);
        let row = sqlx::query(
            r#"
            SELECT from_address, to_address, token, capacity, block_number, log_index, updated_at
            FROM edges
            WHERE from_address = ? AND to_address = ? AND token = ?
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stored_edge).transpose()
    }

    /// Query edges matching `filter`, ordered by `from` (then `to`, `token`).
    ///
    /// Addresses are stored checksummed, so ordering ignores case to follow
    /// the numeric address order.
    pub async fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT from_address, to_address, token, capacity, block_number, log_index, updated_at FROM edges WHERE 1 = 1",
        );
        if let Some(from) = filter.from {
            builder.push(" AND from_address = ").push_bind(from.to_checksum(None));
        }
        if let Some(to) = filter.to {
            builder.push(" AND to_address = ").push_bind(to.to_checksum(None));
        }
        if let Some(token) = filter.token {
            builder.push(" AND token = ").push_bind(token.to_checksum(None));
        }
        builder.push(" ORDER BY from_address COLLATE NOCASE, to_address COLLATE NOCASE, token COLLATE NOCASE");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query edges")?;

        rows.into_iter()
            .map(|row| Self::row_to_stored_edge(row).map(|stored| stored.edge))
            .collect()
    }

    /// All edges in one consistent read, ordered by `from`.
    pub async fn all_edges(&self) -> Result<Vec<Edge>> {
        self.query_edges(&EdgeFilter::default()).await
    }

    /// Count stored edges.
    pub async fn count_edges(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Reconcile the store against a freshly derived edge set.
    ///
    /// Inserts new keys, updates changed capacities, and removes stored keys
    /// absent from `edges`, all in one transaction: a failure leaves the
    /// store untouched. Zero-capacity and self-loop entries in `edges` are
    /// treated as absent; for duplicate keys the first entry wins.
    ///
    /// The write lock is held from before the first read (`BEGIN IMMEDIATE`);
    /// concurrent event writes wait on the busy timeout until it commits.
    pub async fn bulk_replace(&self, edges: &[Edge]) -> Result<BulkReplaceSummary> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for bulk replace")?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .context("Failed to begin bulk replace")?;

        let summary = match Self::reconcile(&mut *conn, edges).await {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!("Failed to roll back bulk replace: {}", rollback);
                    conn.detach();
                }
                return Err(e);
            }
        };

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            if sqlx::query("ROLLBACK").execute(&mut *conn).await.is_err() {
                conn.detach();
            }
            return Err(e).context("Failed to commit bulk replace");
        }

        if summary.added + summary.updated + summary.removed > 0 {
            self.mark_dirty();
        }

        Ok(summary)
    }

    /// Reconciliation body of [`Storage::bulk_replace`], run inside its
    /// transaction.
    async fn reconcile(conn: &mut SqliteConnection, edges: &[Edge]) -> Result<BulkReplaceSummary> {
        let rows = sqlx::query("SELECT from_address, to_address, token, capacity FROM edges")
            .fetch_all(&mut *conn)
            .await
            .context("Failed to load current edges")?;

        let mut existing: HashMap<KeyStrings, String> = rows
            .into_iter()
            .map(|row| {
                (
                    (
                        row.get::<String, _>("from_address"),
                        row.get::<String, _>("to_address"),
                        row.get::<String, _>("token"),
                    ),
                    row.get::<String, _>("capacity"),
                )
            })
            .collect();

        let now = chrono::Utc::now().timestamp();
        let mut summary = BulkReplaceSummary::default();
        let mut seen: HashSet<KeyStrings> = HashSet::new();

        for edge in edges {
            if edge.is_empty() || edge.from == edge.to {
                continue;
            }
            let key = key_strings(&edge.key());
            if !seen.insert(key.clone()) {
                continue;
            }

            let changed = match existing.remove(&key) {
                None => {
                    summary.added += 1;
                    true
                }
                Some(capacity) if capacity != edge.capacity.as_str() => {
                    summary.updated += 1;
                    true
                }
                Some(_) => false,
            };
            if !changed {
                continue;
            }

            let (from, to, token) = key;
            sqlx::query(
                r#"
                INSERT INTO edges (from_address, to_address, token, capacity, block_number, log_index, updated_at)
                VALUES (?, ?, ?, ?, NULL, NULL, ?)
                ON CONFLICT(from_address, to_address, token)
                DO UPDATE SET
                    capacity = excluded.capacity,
                    block_number = NULL,
                    log_index = NULL,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(from)
            .bind(to)
            .bind(token)
            .bind(edge.capacity.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await
            .context("Failed to write edge during bulk replace")?;
        }

        for (from, to, token) in existing.into_keys() {
            sqlx::query(
                "DELETE FROM edges WHERE from_address = ? AND to_address = ? AND token = ?",
            )
            .bind(from)
            .bind(to)
            .bind(token)
            .execute(&mut *conn)
            .await
            .context("Failed to remove stale edge during bulk replace")?;
            summary.removed += 1;
        }

        // Rows kept as they were still drop their event position.
        sqlx::query("UPDATE edges SET block_number = NULL, log_index = NULL WHERE block_number IS NOT NULL")
            .execute(&mut *conn)
            .await
            .context("Failed to clear event positions during bulk replace")?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&mut *conn)
            .await?;
        summary.total = total as u64;

        Ok(summary)
    }

    fn row_to_stored_edge(row: sqlx::sqlite::SqliteRow) -> Result<StoredEdge> {
        let from: String = row.get("from_address");
        let to: String = row.get("to_address");
        let token: String = row.get("token");
        let capacity: String = row.get("capacity");
        let block_number: Option<i64> = row.try_get("block_number").ok().flatten();
        let log_index: Option<i64> = row.try_get("log_index").ok().flatten();
        let updated_at: i64 = row.try_get("updated_at").unwrap_or(0);

        let edge = Edge {
            from: parse_address(&from)?,
            to: parse_address(&to)?,
            token: parse_address(&token)?,
            capacity: Amount::new(capacity)?,
        };

        let position = match (block_number, log_index) {
            (Some(block_number), Some(log_index)) => Some(EventPosition::new(
                block_number as u64,
                log_index as u64,
            )),
            _ => None,
        };

        Ok(StoredEdge {
            edge,
            position,
            updated_at,
        })
    }
}
