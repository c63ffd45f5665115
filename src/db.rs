use std::sync::Arc;

use anyhow::Context;
use rusqlite::OptionalExtension;
use serenity::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

/// Opaque byte store, one value per key. Single-key reads and writes are atomic.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Clone)]
pub struct BotDb(Arc<Mutex<rusqlite::Connection>>);

impl BotDb {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path))?;
        Ok(Self(Arc::new(Mutex::new(conn))))
    }

    async fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.0.lock().await
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        const INIT_SQL: &str = include_str!("./init.sql");
        let conn = self.conn().await;
        conn.execute_batch(INIT_SQL)
            .context("Failed to migrate database")?;

        Ok(())
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::StorageUnavailable(Box::new(err))
}

#[async_trait]
impl KvStore for BotDb {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn().await;
        let mut stmt = conn
            .prepare_cached("SELECT value FROM documents WHERE key = ?")
            .map_err(unavailable)?;
        stmt.query_row((key,), |row| row.get(0))
            .optional()
            .map_err(unavailable)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let conn = self.conn().await;
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO documents (key, value) VALUES (?, ?)
                ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            )
            .map_err(unavailable)?;
        stmt.execute((key, &value)).map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn().await;
        let mut stmt = conn
            .prepare_cached("DELETE FROM documents WHERE key = ?")
            .map_err(unavailable)?;
        let changes = stmt.execute((key,)).map_err(unavailable)?;
        Ok(changes > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn().await;
        let mut stmt = conn
            .prepare_cached("SELECT key FROM documents ORDER BY key")
            .map_err(unavailable)?;
        let mut rows = stmt.query(()).map_err(unavailable)?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next().map_err(unavailable)? {
            keys.push(row.get(0).map_err(unavailable)?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> BotDb {
        let db = BotDb::open(":memory:").unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn get_of_missing_key_is_none() {
        let db = memory_db().await;
        assert_eq!(db.get("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_previous_value() {
        let db = memory_db().await;
        db.put("1", b"first".to_vec()).await.unwrap();
        db.put("1", b"second".to_vec()).await.unwrap();

        assert_eq!(db.get("1").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(db.keys().await.unwrap(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let db = memory_db().await;
        db.put("1", b"doc".to_vec()).await.unwrap();

        assert!(db.delete("1").await.unwrap());
        assert!(!db.delete("1").await.unwrap());
        assert_eq!(db.get("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn migrate_is_repeatable() {
        let db = memory_db().await;
        db.put("2", b"b".to_vec()).await.unwrap();
        db.put("1", b"a".to_vec()).await.unwrap();
        db.migrate().await.unwrap();

        assert_eq!(db.keys().await.unwrap(), vec!["1".to_string(), "2".to_string()]);
    }
}
