//! Durable home for the scan loop's `last_scanned_height`.
//!
//! Only the scan loop writes it, and only after a fully successful tick.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;

use super::error::StoreError;

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, chain_id: &str) -> Result<Option<u64>, StoreError>;

    async fn save(&self, chain_id: &str, height: u64) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: DashMap<String, u64>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, chain_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.cursors.get(chain_id).map(|h| *h))
    }

    async fn save(&self, chain_id: &str, height: u64) -> Result<(), StoreError> {
        self.cursors.insert(chain_id.to_string(), height);
        Ok(())
    }
}

pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(&self, chain_id: &str) -> Result<Option<u64>, StoreError> {
        let height: Option<i64> = sqlx::query_scalar(
            "SELECT last_scanned_height FROM scan_cursor WHERE chain_id = $1",
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(height.map(|h| h.max(0) as u64))
    }

    async fn save(&self, chain_id: &str, height: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO scan_cursor (chain_id, last_scanned_height)
               VALUES ($1, $2)
               ON CONFLICT (chain_id) DO UPDATE
               SET last_scanned_height = EXCLUDED.last_scanned_height,
                   updated_at = NOW()"#,
        )
        .bind(chain_id)
        .bind(height as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
