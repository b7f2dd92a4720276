//! Local key-value storage.
//!
//! The guest settings record lives here under [`LAYER_SETTINGS_KEY`]. The
//! store only knows strings; encoding and decoding of settings happens in the
//! preference layer.
//!
//! [`LAYER_SETTINGS_KEY`]: crate::model::LAYER_SETTINGS_KEY

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::StoreResult;

/// Persistent string key-value store on the device.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. A missing key is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a value. Deleting a missing key succeeds.
    async fn remove(&self, key: &str) -> StoreResult<()>;
}

/// SQLite-backed [`KeyValueStore`].
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Open the store and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:floodmap.db?mode=rwc" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        // Every pooled connection to an in-memory database is its own database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM kv_store WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            DELETE FROM kv_store WHERE key = ?
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_store() -> SqliteKeyValueStore {
        SqliteKeyValueStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = setup_test_store().await;

        let value = store.get("layer-settings").await.unwrap();

        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = setup_test_store().await;

        store.set("layer-settings", "{}").await.unwrap();

        let value = store.get("layer-settings").await.unwrap();
        assert_eq!(value.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = setup_test_store().await;

        store.set("k", "first").await.unwrap();
        store.set("k", "second").await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = setup_test_store().await;

        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());

        // Removing again is fine
        store.remove("k").await.unwrap();
    }
}
