//! Shared fixtures for the integration tests.
//!
//! `TestHarness` owns a temporary data directory with an on-disk database.
//! `start` plays the part of a process start: every call rehydrates a fresh
//! manager from the same stores, so calling it twice is a restart.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use studioshot::db::Database;
use studioshot::store::{BlobStoreError, MetadataError, Snapshot};
use studioshot::{
    rehydrate, BlobStore, IntakeFile, JobEventBroadcaster, JobId, JobManager, MetadataStore,
    RehydrateDeps, RehydrationReport, SqliteBlobStore, SqliteMetadataStore, StudioConfig,
    TransformClient, TransformError,
};

/// What the fake enhancement service answers.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Echoes the input prefixed with `studio:`.
    Image,
    Fail(String),
    NoOutput(String),
}

pub struct FakeTransform {
    reply: Mutex<Reply>,
    calls: AtomicUsize,
    completed: AtomicUsize,
    /// When set, each call waits for one permit before answering.
    gate: Option<Arc<Semaphore>>,
}

impl FakeTransform {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn gated(reply: Reply, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that got past the gate and answered.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransformClient for FakeTransform {
    async fn transform(&self, image: &[u8], _mime_type: &str) -> Result<Vec<u8>, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let reply = self.reply.lock().unwrap().clone();
        self.completed.fetch_add(1, Ordering::SeqCst);
        match reply {
            Reply::Image => {
                let mut out = b"studio:".to_vec();
                out.extend_from_slice(image);
                Ok(out)
            }
            Reply::Fail(message) => Err(TransformError::Remote {
                status: 500,
                message,
            }),
            Reply::NoOutput(detail) => Err(TransformError::NoOutput {
                detail: Some(detail),
            }),
        }
    }
}

/// Blob store that refuses writes of one particular payload.
pub struct FlakyBlobStore {
    inner: Arc<dyn BlobStore>,
    poison: Vec<u8>,
}

impl FlakyBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>, poison: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            poison: poison.to_vec(),
        })
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobStoreError> {
        if data == self.poison.as_slice() {
            return Err(BlobStoreError::Write {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        self.inner.get(key).await
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, BlobStoreError> {
        self.inner.size(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        self.inner.delete(key).await
    }
}

/// Blob store that counts payload reads and can hold deletes until the test
/// hands out permits.
pub struct WatchedBlobStore {
    inner: Arc<dyn BlobStore>,
    gets: AtomicUsize,
    delete_gate: Option<Arc<Semaphore>>,
    waiting_deletes: AtomicUsize,
}

impl WatchedBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gets: AtomicUsize::new(0),
            delete_gate: None,
            waiting_deletes: AtomicUsize::new(0),
        })
    }

    pub fn with_delete_gate(inner: Arc<dyn BlobStore>, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gets: AtomicUsize::new(0),
            delete_gate: Some(gate),
            waiting_deletes: AtomicUsize::new(0),
        })
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Deletes that have started waiting on the gate.
    pub fn waiting_deletes(&self) -> usize {
        self.waiting_deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for WatchedBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobStoreError> {
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, BlobStoreError> {
        self.inner.size(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        if let Some(gate) = &self.delete_gate {
            self.waiting_deletes.fetch_add(1, Ordering::SeqCst);
            gate.acquire().await.unwrap().forget();
        }
        self.inner.delete(key).await
    }
}

/// Metadata store whose writes always fail.
pub struct BrokenMetadataStore;

#[async_trait]
impl MetadataStore for BrokenMetadataStore {
    async fn load(&self) -> Result<Option<Snapshot>, MetadataError> {
        Ok(None)
    }

    async fn save(&self, _snapshot: &Snapshot) -> Result<(), MetadataError> {
        Err(MetadataError::Malformed("read-only".to_string()))
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: StudioConfig,
    pub db: Database,
    pub blobs: Arc<SqliteBlobStore>,
    pub metadata: Arc<SqliteMetadataStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = StudioConfig::with_data_directory(temp_dir.path());
        let db = Database::open(&config.database_path()).expect("Failed to open database");
        let blobs = Arc::new(SqliteBlobStore::new(db.clone()));
        let metadata = Arc::new(SqliteMetadataStore::new(db.clone()));

        Self {
            temp_dir,
            config,
            db,
            blobs,
            metadata,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub async fn start(
        &self,
        transform: Arc<dyn TransformClient>,
        credits: u32,
    ) -> (JobManager, RehydrationReport) {
        self.start_with_blobs(self.blobs.clone(), transform, credits)
            .await
    }

    pub async fn start_with_blobs(
        &self,
        blobs: Arc<dyn BlobStore>,
        transform: Arc<dyn TransformClient>,
        credits: u32,
    ) -> (JobManager, RehydrationReport) {
        rehydrate(RehydrateDeps {
            blobs,
            metadata: self.metadata.clone(),
            transform,
            initial_credits: credits,
            events: JobEventBroadcaster::default(),
        })
        .await
        .expect("Rehydration failed")
    }

    pub async fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).await.expect("Blob read failed")
    }

    pub async fn snapshot(&self) -> Option<Snapshot> {
        self.metadata.load().await.expect("Snapshot read failed")
    }
}

pub fn png(name: &str, data: &[u8]) -> IntakeFile {
    IntakeFile::new(name, data.to_vec())
}

/// Intakes the files and returns their ids in order.
pub async fn intake(manager: &JobManager, files: Vec<IntakeFile>) -> Vec<JobId> {
    let report = manager.intake(files).await;
    assert!(report.failed.is_empty(), "Intake failed: {:?}", report.failed);
    report.created
}
