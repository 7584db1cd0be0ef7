//! Wires a configuration into a ready session.

use std::sync::Arc;

use crate::config::{BlobBackend, StudioConfig};
use crate::db::Database;
use crate::error::Result;
use crate::events::JobEventBroadcaster;
use crate::lifecycle::{rehydrate, JobManager, RehydrateDeps, RehydrationReport};
use crate::store::{BlobStore, FsBlobStore, SqliteBlobStore, SqliteMetadataStore};
use crate::transform::{HttpTransformClient, TransformClient};

/// Opens the stores, builds the HTTP transform client and rehydrates.
pub async fn open_session(config: &StudioConfig) -> Result<(JobManager, RehydrationReport)> {
    let transform = Arc::new(HttpTransformClient::from_config(config)?);
    open_session_with(config, transform).await
}

/// Same as [`open_session`] with a caller-provided transform client.
pub async fn open_session_with(
    config: &StudioConfig,
    transform: Arc<dyn TransformClient>,
) -> Result<(JobManager, RehydrationReport)> {
    let db = Database::open(&config.database_path())?;

    let blobs: Arc<dyn BlobStore> = match config.blob_backend {
        BlobBackend::Sqlite => Arc::new(SqliteBlobStore::new(db.clone())),
        BlobBackend::Filesystem => Arc::new(FsBlobStore::open(config.blob_directory())?),
    };
    let metadata = Arc::new(SqliteMetadataStore::new(db));

    log::info!(
        "Opening session in {} ({:?} blobs)",
        config.data_directory.display(),
        config.blob_backend
    );

    let session = rehydrate(RehydrateDeps {
        blobs,
        metadata,
        transform,
        initial_credits: config.initial_credits,
        events: JobEventBroadcaster::default(),
    })
    .await?;

    Ok(session)
}
