//! Startup rehydration.
//!
//! Rebuilds the job collection from the metadata snapshot and the blob
//! store, then hands back the manager. Runs once per process start; the
//! manager does not exist before it finishes.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info_span, Instrument};

use super::display::{DisplayHandle, DisplayHandles};
use super::job::{processed_file_name, BlobRef, Job, JobId, JobStatus};
use super::manager::{guess_mime_type, JobManager};
use crate::events::JobEventBroadcaster;
use crate::store::{BlobStore, JobRecord, MetadataError, MetadataStore};
use crate::transform::TransformClient;

/// Live collaborators the manager is built from. Stores must already be open.
pub struct RehydrateDeps {
    pub blobs: Arc<dyn BlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub transform: Arc<dyn TransformClient>,
    pub initial_credits: u32,
    pub events: JobEventBroadcaster,
}

/// What rehydration had to repair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RehydrationReport {
    pub restored: usize,
    /// Original blob gone; the job was unrecoverable.
    pub dropped: Vec<JobId>,
    /// Recorded `Done` but the processed blob was gone.
    pub demoted: Vec<JobId>,
    /// Recorded `Processing`; nothing in flight survives a restart.
    pub reset: Vec<JobId>,
}

enum Restored {
    Job {
        job: Job,
        demoted: bool,
        reset: bool,
    },
    Dropped(JobId),
}

async fn blob_size(blobs: &dyn BlobStore, key: &str) -> Option<u64> {
    match blobs.size(key).await {
        Ok(size) => size,
        Err(e) => {
            log::error!("Failed to look up blob '{}' during rehydration: {}", key, e);
            None
        }
    }
}

async fn restore_record(
    blobs: &dyn BlobStore,
    handles: &DisplayHandles,
    record: JobRecord,
) -> Restored {
    let id = record.id;

    let Some(original_size) = blob_size(blobs, &id.original_key()).await else {
        log::warn!(
            "Data loss: original of job {} ('{}') is missing, dropping job",
            id,
            record.original_file_name
        );
        return Restored::Dropped(id);
    };

    let mime_type = record
        .mime_type
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| guess_mime_type(&record.original_file_name));

    let original = BlobRef {
        key: id.original_key(),
        file_name: record.original_file_name,
        mime_type,
        size: original_size,
    };

    let mut status = record.status;
    let mut demoted = false;
    let reset = status == JobStatus::Processing;
    let mut processed: Option<(BlobRef, DisplayHandle)> = None;

    if status == JobStatus::Done {
        match blob_size(blobs, &id.processed_key()).await {
            Some(size) => {
                let blob = BlobRef {
                    key: id.processed_key(),
                    file_name: record
                        .processed_file_name
                        .unwrap_or_else(|| processed_file_name(&original.file_name)),
                    mime_type: original.mime_type.clone(),
                    size,
                };
                let handle = handles.acquire(&blob.key);
                processed = Some((blob, handle));
            }
            None => {
                log::warn!(
                    "Processed image of job {} is missing, demoting to pending",
                    id
                );
                status = JobStatus::Pending;
                demoted = true;
            }
        }
    }

    if reset {
        log::info!("Job {} was processing at shutdown, resetting to pending", id);
    }

    let original_handle = handles.acquire(&original.key);
    let job = Job::restore(
        id,
        status,
        record.error,
        original,
        original_handle,
        processed,
    );

    Restored::Job {
        job,
        demoted,
        reset,
    }
}

/// Rebuilds the session from durable state.
///
/// A snapshot that cannot be parsed is logged and treated as absent. A
/// snapshot written by a newer schema version, or a store that cannot be
/// read at all, is returned as an error so it is never overwritten.
pub async fn rehydrate(
    deps: RehydrateDeps,
) -> Result<(JobManager, RehydrationReport), MetadataError> {
    rehydrate_inner(deps)
        .instrument(info_span!("rehydrate"))
        .await
}

async fn rehydrate_inner(
    deps: RehydrateDeps,
) -> Result<(JobManager, RehydrationReport), MetadataError> {
    let records = match deps.metadata.load().await {
        Ok(Some(snapshot)) => snapshot.jobs,
        Ok(None) => Vec::new(),
        Err(e @ (MetadataError::Json(_) | MetadataError::Malformed(_))) => {
            log::error!("Job metadata is corrupt, starting empty: {}", e);
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let handles = DisplayHandles::new();
    let restored = join_all(
        records
            .into_iter()
            .map(|record| restore_record(deps.blobs.as_ref(), &handles, record)),
    )
    .await;

    let mut report = RehydrationReport::default();
    let mut jobs = Vec::with_capacity(restored.len());
    for item in restored {
        match item {
            Restored::Job {
                job,
                demoted,
                reset,
            } => {
                if demoted {
                    report.demoted.push(job.id().clone());
                }
                if reset {
                    report.reset.push(job.id().clone());
                }
                jobs.push(job);
            }
            Restored::Dropped(id) => report.dropped.push(id),
        }
    }
    report.restored = jobs.len();

    for id in &report.dropped {
        if let Err(e) = deps.blobs.delete(&id.processed_key()).await {
            log::warn!("Failed to clean up result of dropped job {}: {}", id, e);
        }
    }

    log::info!(
        "Rehydrated {} jobs ({} dropped, {} demoted, {} reset)",
        report.restored,
        report.dropped.len(),
        report.demoted.len(),
        report.reset.len()
    );

    let manager = JobManager::new(
        jobs,
        handles,
        deps.initial_credits,
        deps.blobs,
        deps.metadata,
        deps.transform,
        deps.events,
    );
    manager.persist().await;

    Ok((manager, report))
}
