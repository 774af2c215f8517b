//! `SQLite`-backed persistence store.
//!
//! Records live in a single `kv_store` table created by the embedded
//! migrations in `migrations/`.

use crate::error::{Result, StoreError};
use crate::store::PersistenceStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// Persistence store on an `SQLx` `SQLite` pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_str().ok_or_else(|| {
            StoreError::Open("invalid database path: not valid UTF-8".to_string())
        })?;

        let connect_options = SqliteConnectOptions::from_str(path_str)
            .map_err(|e| StoreError::Open(format!("invalid connection string: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Open(format!("failed to open {path_str}: {e}")))?;

        tracing::info!("Locator database opened at {}", path_str);
        Self::from_pool(pool).await
    }

    /// Open a private in-memory database and run migrations.
    pub async fn in_memory() -> Result<Self> {
        // Every in-memory connection is a separate database, so keep one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Open(format!("failed to open in-memory database: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and run migrations.
    pub async fn from_pool(pool: Pool<Sqlite>) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Apply pending migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        tracing::info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(format!("migration execution failed: {e}")))?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Number of applied migrations.
    pub async fn schema_version(&self) -> Result<i64> {
        let version =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations")
                .fetch_optional(&self.pool)
                .await?
                .unwrap_or(0);
        Ok(version)
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Locator database closed");
    }
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r"
            SELECT value
            FROM kv_store
            WHERE key = ?
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM kv_store
            WHERE key = ?
            ",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            r"
            SELECT key
            FROM kv_store
            WHERE substr(key, 1, length(?1)) = ?1
            ORDER BY key
            ",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = SqliteStore::in_memory().await.expect("open store");
        assert_eq!(store.schema_version().await.expect("version"), 1);

        store.put("locator:a.com", "{}".to_string()).await.expect("put");
        store
            .put("locator:a.com", "{\"v\":2}".to_string())
            .await
            .expect("upsert");
        assert_eq!(
            store.get("locator:a.com").await.expect("get"),
            Some("{\"v\":2}".to_string())
        );

        store.remove("locator:a.com").await.expect("remove");
        assert_eq!(store.get("locator:a.com").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_prefix_keys() {
        let store = SqliteStore::in_memory().await.expect("open store");
        for key in ["cache:b", "locator:x", "cache:a", "cache%wild"] {
            store.put(key, String::new()).await.expect("put");
        }

        let keys = store.keys("cache:").await.expect("keys");
        assert_eq!(keys, vec!["cache:a".to_string(), "cache:b".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("locators.db");

        let store = SqliteStore::open(&path).await.expect("open store");
        store.put("k", "v".to_string()).await.expect("put");
        store.close().await;

        let reopened = SqliteStore::open(&path).await.expect("reopen store");
        assert_eq!(reopened.get("k").await.expect("get"), Some("v".to_string()));

        // Migrations are idempotent
        reopened.run_migrations().await.expect("rerun migrations");
        assert_eq!(reopened.schema_version().await.expect("version"), 1);
    }
}
