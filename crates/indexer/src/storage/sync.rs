//! Listener progress persistence.
//!
//! A single row tracks the last block whose events were handed to the
//! incremental updater, so a restarted listener resumes after it.

use super::{Storage, SyncState};
use alloy::primitives::B256;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Get the current sync state.
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            "SELECT last_block_number, last_block_hash, updated_at, chain_id FROM sync_state WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch sync state")?;

        let hash_bytes: Vec<u8> = row.get("last_block_hash");
        anyhow::ensure!(
            hash_bytes.len() == 32,
            "Corrupt sync state: block hash has {} bytes",
            hash_bytes.len()
        );

        Ok(SyncState {
            last_block_number: row.get::<i64, _>("last_block_number") as u64,
            last_block_hash: B256::from_slice(&hash_bytes),
            updated_at: row.get("updated_at"),
            chain_id: row.get::<i64, _>("chain_id") as u64,
        })
    }

    /// Point the listener at `start_block` on `chain_id`.
    ///
    /// Overwrites any previous progress.
    pub async fn initialize_sync_state(
        &self,
        chain_id: u64,
        start_block: u64,
        block_hash: B256,
    ) -> Result<()> {
        self.write_sync_state(start_block, block_hash, chain_id)
            .await
            .context("Failed to initialize sync state")
    }

    /// Record that every block up to `block_number` has been processed.
    ///
    /// Progress never moves backwards: a lower block number is ignored.
    /// Returns whether the row changed.
    pub async fn record_progress(&self, block_number: u64, block_hash: B256) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = ?,
                last_block_hash = ?,
                updated_at = ?
            WHERE id = 1 AND last_block_number < ?
            "#,
        )
        .bind(block_number as i64)
        .bind(block_hash.as_slice())
        .bind(chrono::Utc::now().timestamp())
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .context("Failed to record sync progress")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail if the stored chain id is set and differs from `chain_id`.
    ///
    /// A fresh database (chain id 0) adopts `chain_id`.
    pub async fn ensure_chain_id(&self, chain_id: u64) -> Result<()> {
        let state = self.get_sync_state().await?;
        if state.chain_id == 0 {
            sqlx::query("UPDATE sync_state SET chain_id = ?, updated_at = ? WHERE id = 1")
                .bind(chain_id as i64)
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await
                .context("Failed to store chain id")?;
            return Ok(());
        }

        anyhow::ensure!(
            state.chain_id == chain_id,
            "Database was indexed on chain {} but the RPC reports chain {}",
            state.chain_id,
            chain_id
        );
        Ok(())
    }

    async fn write_sync_state(&self, block_number: u64, block_hash: B256, chain_id: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = ?,
                last_block_hash = ?,
                updated_at = ?,
                chain_id = ?
            WHERE id = 1
            "#,
        )
        .bind(block_number as i64)
        .bind(block_hash.as_slice())
        .bind(chrono::Utc::now().timestamp())
        .bind(chain_id as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn setup_storage() -> (Storage, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp_db)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (storage, _temp_db) = setup_storage().await;

        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_block_number, 0);
        assert_eq!(state.chain_id, 0);
        assert_eq!(state.last_block_hash, B256::ZERO);
    }

    #[tokio::test]
    async fn test_initialize_and_progress() {
        let (storage, _temp_db) = setup_storage().await;

        storage
            .initialize_sync_state(100, 1000, B256::repeat_byte(0x01))
            .await
            .unwrap();

        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_block_number, 1000);
        assert_eq!(state.chain_id, 100);
        assert_eq!(state.last_block_hash, B256::repeat_byte(0x01));

        assert!(storage
            .record_progress(1005, B256::repeat_byte(0x05))
            .await
            .unwrap());
        assert!(!storage
            .record_progress(1003, B256::repeat_byte(0x03))
            .await
            .unwrap());

        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_block_number, 1005);
        assert_eq!(state.last_block_hash, B256::repeat_byte(0x05));
    }

    #[tokio::test]
    async fn test_chain_id_guard() {
        let (storage, _temp_db) = setup_storage().await;

        storage.ensure_chain_id(100).await.unwrap();
        assert_eq!(storage.get_sync_state().await.unwrap().chain_id, 100);

        storage.ensure_chain_id(100).await.unwrap();
        assert!(storage.ensure_chain_id(1).await.is_err());
    }
}
