//! Single-document snapshot of every job's non-binary fields.
//!
//! The snapshot is last-write-wins under one fixed key. It only says which
//! blobs to look up on restart; blob content never goes in here.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Database, DatabaseError, Table};
use crate::lifecycle::{JobId, JobStatus};

/// Fixed application key the snapshot is stored under.
pub const SNAPSHOT_KEY: &str = "studio-shot-images";

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to (de)serialize snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u64, expected: u32 },

    #[error("Malformed snapshot: {0}")]
    Malformed(String),
}

/// Persisted form of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub original_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// The whole persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub jobs: Vec<JobRecord>,
}

impl Snapshot {
    pub fn new(jobs: Vec<JobRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            jobs,
        }
    }

    /// Parses a stored document. A bare array of records (the format used
    /// before the version field existed) is accepted as version 1.
    pub fn parse(text: &str) -> Result<Self, MetadataError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        match value {
            serde_json::Value::Array(_) => {
                let jobs: Vec<JobRecord> = serde_json::from_value(value)?;
                Ok(Self::new(jobs))
            }
            serde_json::Value::Object(ref map) => {
                let version = map
                    .get("version")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| MetadataError::Malformed("missing version".to_string()))?;
                if version != u64::from(SNAPSHOT_VERSION) {
                    return Err(MetadataError::UnsupportedVersion {
                        found: version,
                        expected: SNAPSHOT_VERSION,
                    });
                }
                Ok(serde_json::from_value(value)?)
            }
            other => Err(MetadataError::Malformed(format!(
                "expected object or array, got {}",
                other
            ))),
        }
    }
}

/// Durable storage for the snapshot document.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Returns `Ok(None)` when nothing was ever saved.
    async fn load(&self) -> Result<Option<Snapshot>, MetadataError>;

    async fn save(&self, snapshot: &Snapshot) -> Result<(), MetadataError>;
}

/// Snapshot stored in the `kv_store` table of the application database.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Database,
}

impl SqliteMetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn load(&self) -> Result<Option<Snapshot>, MetadataError> {
        let text = self.db.query(Table::KvStore, |conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![SNAPSHOT_KEY],
                |r| r.get::<_, String>(0),
            )
            .optional()
        })?;

        text.map(|t| Snapshot::parse(&t)).transpose()
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), MetadataError> {
        let text = serde_json::to_string(snapshot)?;
        let now = Utc::now().to_rfc3339();
        self.db.query(Table::KvStore, |conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_at = excluded.updated_at",
                params![SNAPSHOT_KEY, text, now],
            )
        })?;
        Ok(())
    }
}
