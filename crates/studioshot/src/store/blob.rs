//! Key to binary-object persistence.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

use crate::db::{Database, DatabaseError, Table};

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to create blob directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write blob '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete blob '{key}': {source}")]
    Delete {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid blob key: {0:?}")]
    InvalidKey(String),
}

/// Durable key to bytes storage.
///
/// A missing key is `Ok(None)` from [`BlobStore::get`] and a no-op for
/// [`BlobStore::delete`]. Implementations are only constructed once their
/// backing storage is live.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobStoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError>;

    /// Stored length of a blob without reading it. `Ok(None)` when missing.
    async fn size(&self, key: &str) -> Result<Option<u64>, BlobStoreError>;

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError>;
}

/// Blob store backed by the `blobs` table of the application database.
#[derive(Clone)]
pub struct SqliteBlobStore {
    db: Database,
}

impl SqliteBlobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobStoreError> {
        if key.is_empty() {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        let now = Utc::now().to_rfc3339();
        self.db.query(Table::Blobs, |conn| {
            conn.execute(
                "INSERT INTO blobs (key, data, size, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET data = excluded.data, size = excluded.size,
                 updated_at = excluded.updated_at",
                params![key, data, data.len() as i64, now],
            )
        })?;
        log::debug!("Stored blob '{}' ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        let data = self.db.query(Table::Blobs, |conn| {
            conn.query_row("SELECT data FROM blobs WHERE key = ?1", params![key], |r| {
                r.get::<_, Vec<u8>>(0)
            })
            .optional()
        })?;
        Ok(data)
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, BlobStoreError> {
        let size = self.db.query(Table::Blobs, |conn| {
            conn.query_row("SELECT size FROM blobs WHERE key = ?1", params![key], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
        })?;
        Ok(size.map(|s| s.max(0) as u64))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        self.db.query(Table::Blobs, |conn| {
            conn.execute("DELETE FROM blobs WHERE key = ?1", params![key])
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteBlobStore {
        SqliteBlobStore::new(Database::open_in_memory().expect("open in-memory DB"))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = store();
        store.put("job-1", b"png bytes").await.unwrap();

        let data = store.get("job-1").await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"png bytes"[..]));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = store();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = store();
        store.put("job-1_processed", b"first").await.unwrap();
        store.put("job-1_processed", b"second").await.unwrap();

        let data = store.get("job-1_processed").await.unwrap().unwrap();
        assert_eq!(data, b"second");
    }

    #[tokio::test]
    async fn test_delete_and_delete_missing() {
        let store = store();
        store.put("job-1", b"x").await.unwrap();

        store.delete("job-1").await.unwrap();
        store.delete("job-1").await.unwrap();
        store.delete("never-existed").await.unwrap();

        assert!(store.get("job-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_payload_is_stored() {
        let store = store();
        store.put("empty", &[]).await.unwrap();

        let data = store.get("empty").await.unwrap();
        assert_eq!(data, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_size_without_reading() {
        let store = store();
        store.put("job-1", b"12345").await.unwrap();
        store.put("empty", &[]).await.unwrap();

        assert_eq!(store.size("job-1").await.unwrap(), Some(5));
        assert_eq!(store.size("empty").await.unwrap(), Some(0));
        assert_eq!(store.size("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = store();
        let result = store.put("", b"x").await;
        assert!(matches!(result, Err(BlobStoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_blobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = crate::db::database_path(dir.path());

        {
            let store = SqliteBlobStore::new(Database::open(&path).unwrap());
            store.put("job-1", b"durable").await.unwrap();
        }

        let store = SqliteBlobStore::new(Database::open(&path).unwrap());
        let data = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(data, b"durable");
    }
}
