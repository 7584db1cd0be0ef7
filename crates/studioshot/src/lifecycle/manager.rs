//! Job lifecycle manager.
//!
//! Owns the in-memory job collection and the credit balance for one session.
//! Every mutation takes the collection lock, applies its change and drops the
//! lock before the next await, so concurrent operations interleave only at
//! store and transform calls. The `Processing` status doubles as the per-job
//! mutual exclusion flag.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{info_span, Instrument};

use super::credits::CreditBalance;
use super::display::DisplayHandles;
use super::error::JobError;
use super::job::{processed_file_name, BlobRef, Job, JobId, JobStatus};
use crate::events::{JobEvent, JobEventBroadcaster, JobEventKind};
use crate::export::{self, ExportEntry, ExportError};
use crate::store::{BlobStore, MetadataStore, Snapshot};
use crate::transform::TransformClient;

const EMPTY_ORIGINAL_MESSAGE: &str = "Original file is missing or empty. Please upload it again.";

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// A file handed in for enhancement.
#[derive(Debug, Clone)]
pub struct IntakeFile {
    pub file_name: String,
    /// Guessed from the file name when absent.
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl IntakeFile {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            data,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    fn resolved_mime_type(&self) -> String {
        self.mime_type
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| guess_mime_type(&self.file_name))
    }
}

pub(crate) fn guess_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeFailure {
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Default, Clone)]
pub struct IntakeReport {
    pub created: Vec<JobId>,
    pub failed: Vec<IntakeFailure>,
}

/// How a dispatched transformation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Done,
    Failed { message: String, no_output: bool },
}

impl ProcessOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            ProcessOutcome::Done => JobStatus::Done,
            ProcessOutcome::Failed { .. } => JobStatus::Error,
        }
    }
}

/// Result of a "process all" batch.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub succeeded: Vec<JobId>,
    pub failed: Vec<JobId>,
    /// Failures where the service answered without an image. Also listed in
    /// `failed`; hosts show these as one batch-level notice.
    pub no_output: Vec<JobId>,
    /// Jobs whose own precondition check refused them, e.g. because another
    /// caller claimed them first.
    pub rejected: Vec<(JobId, JobError)>,
}

impl BatchReport {
    pub fn dispatched(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.rejected.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionSummary {
    pub selected: usize,
    pub selected_done: usize,
    pub all_selected: bool,
}

pub struct JobManager {
    jobs: RwLock<Vec<Job>>,
    credits: CreditBalance,
    handles: DisplayHandles,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    transform: Arc<dyn TransformClient>,
    events: JobEventBroadcaster,
    /// Serializes snapshot writes so an older snapshot never lands last.
    persist_lock: AsyncMutex<()>,
}

impl JobManager {
    /// Only rehydration builds a manager, so no job action can run before it.
    pub(crate) fn new(
        jobs: Vec<Job>,
        handles: DisplayHandles,
        initial_credits: u32,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        transform: Arc<dyn TransformClient>,
        events: JobEventBroadcaster,
    ) -> Self {
        Self {
            jobs: RwLock::new(jobs),
            credits: CreditBalance::new(initial_credits),
            handles,
            blobs,
            metadata,
            transform,
            events,
            persist_lock: AsyncMutex::new(()),
        }
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, Vec<Job>> {
        match self.jobs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job collection lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, Vec<Job>> {
        match self.jobs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job collection lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Mirrors the current collection into metadata persistence. A failed
    /// write is logged; the in-memory state stays authoritative.
    pub(crate) async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let jobs = self.read_jobs();
            Snapshot::new(jobs.iter().map(Job::to_record).collect())
        };
        if let Err(e) = self.metadata.save(&snapshot).await {
            log::error!("Failed to persist job metadata: {}", e);
        }
    }

    fn publish(&self, job: &Job, kind: JobEventKind) {
        self.events.send(
            JobEvent::new(job.id(), kind, job.status()).with_error(job.error().map(str::to_string)),
        );
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn jobs(&self) -> Vec<Job> {
        self.read_jobs().clone()
    }

    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.read_jobs().iter().find(|j| j.id() == id).cloned()
    }

    pub fn credits(&self) -> u32 {
        self.credits.balance()
    }

    pub fn available_credits(&self) -> u32 {
        self.credits.available()
    }

    pub fn pending_or_error_count(&self) -> usize {
        self.read_jobs()
            .iter()
            .filter(|j| j.status().is_eligible())
            .count()
    }

    pub fn is_processing(&self) -> bool {
        self.read_jobs()
            .iter()
            .any(|j| j.status() == JobStatus::Processing)
    }

    pub fn selection_summary(&self) -> SelectionSummary {
        let jobs = self.read_jobs();
        let selected = jobs.iter().filter(|j| j.is_selected()).count();
        let selected_done = jobs
            .iter()
            .filter(|j| j.is_selected() && j.status() == JobStatus::Done)
            .count();
        SelectionSummary {
            selected,
            selected_done,
            all_selected: !jobs.is_empty() && selected == jobs.len(),
        }
    }

    pub fn display_handles(&self) -> &DisplayHandles {
        &self.handles
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    // ─── Operations ─────────────────────────────────────────────────────────

    /// Stores each file's bytes, then appends a `Pending` job for it. A file
    /// whose blob write fails gets no job and does not affect its siblings.
    pub async fn intake(&self, files: Vec<IntakeFile>) -> IntakeReport {
        let mut report = IntakeReport::default();
        let mut created = Vec::new();

        for file in files {
            let id = JobId::generate();
            if let Err(e) = self.blobs.put(&id.original_key(), &file.data).await {
                log::error!("Failed to store upload '{}': {}", file.file_name, e);
                report.failed.push(IntakeFailure {
                    file_name: file.file_name,
                    error: e.to_string(),
                });
                continue;
            }

            let original = BlobRef {
                key: id.original_key(),
                mime_type: file.resolved_mime_type(),
                size: file.data.len() as u64,
                file_name: file.file_name,
            };
            let handle = self.handles.acquire(&original.key);
            log::info!(
                "Accepted '{}' as job {} ({} bytes)",
                original.file_name,
                id,
                original.size
            );
            created.push(Job::new(id, original, handle));
        }

        if created.is_empty() {
            return report;
        }

        {
            let mut jobs = self.write_jobs();
            for job in &created {
                report.created.push(job.id().clone());
                self.publish(job, JobEventKind::Added);
            }
            jobs.extend(created);
        }
        self.persist().await;

        report
    }

    /// Runs one transformation attempt for a job.
    ///
    /// Precondition failures return `Err` with nothing changed, except a
    /// missing or empty original, which moves the job to `Error` and returns
    /// `JobError::EmptyOriginal`. Transform failures are not `Err`: they end
    /// in `ProcessOutcome::Failed` with the job in `Error`.
    pub async fn process(&self, id: &JobId) -> Result<ProcessOutcome, JobError> {
        self.process_inner(id)
            .instrument(info_span!("job.process", job_id = %id))
            .await
    }

    async fn process_inner(&self, id: &JobId) -> Result<ProcessOutcome, JobError> {
        let reservation = self.credits.try_reserve().ok_or(JobError::NoCredits)?;

        let original = {
            let mut jobs = self.write_jobs();
            let job = jobs
                .iter_mut()
                .find(|j| j.id() == id)
                .ok_or_else(|| JobError::NotFound(id.clone()))?;
            job.begin_processing()?;
            job.original().clone()
        };

        let bytes = if original.size == 0 {
            None
        } else {
            match self.blobs.get(&original.key).await {
                Ok(Some(bytes)) if !bytes.is_empty() => Some(bytes),
                Ok(_) => None,
                Err(e) => {
                    log::error!("Failed to read original of job {}: {}", id, e);
                    None
                }
            }
        };

        let Some(bytes) = bytes else {
            log::warn!("Job {} has no usable original, marking as failed", id);
            self.finish_failed(id, EMPTY_ORIGINAL_MESSAGE.to_string())
                .await;
            return Err(JobError::EmptyOriginal(id.clone()));
        };

        // The claim is only published once the original is known to be good.
        if let Some(job) = self.job(id) {
            self.publish(&job, JobEventKind::StatusChanged);
        }
        self.persist().await;

        let output = match self.transform.transform(&bytes, &original.mime_type).await {
            Ok(output) => output,
            Err(e) => {
                let no_output = e.is_no_output();
                let message = e.to_string();
                log::warn!("Transform of job {} failed: {}", id, message);
                self.finish_failed(id, message.clone()).await;
                return Ok(ProcessOutcome::Failed { message, no_output });
            }
        };

        let processed = BlobRef {
            key: id.processed_key(),
            file_name: processed_file_name(&original.file_name),
            mime_type: original.mime_type.clone(),
            size: output.len() as u64,
        };

        if let Err(e) = self.blobs.put(&processed.key, &output).await {
            let message = format!("Failed to store processed image: {}", e);
            log::error!("Job {}: {}", id, message);
            self.finish_failed(id, message.clone()).await;
            return Ok(ProcessOutcome::Failed {
                message,
                no_output: false,
            });
        }

        let completed = {
            let mut jobs = self.write_jobs();
            match jobs.iter_mut().find(|j| j.id() == id) {
                Some(job) => {
                    let handle = self.handles.acquire(&processed.key);
                    match job.complete(processed.clone(), handle.clone()) {
                        Ok(replaced) => {
                            if let Some(old) = replaced {
                                self.handles.release(&old);
                            }
                            self.publish(job, JobEventKind::StatusChanged);
                            true
                        }
                        Err(e) => {
                            self.handles.release(&handle);
                            log::error!("Job {} could not complete: {}", id, e);
                            false
                        }
                    }
                }
                None => false,
            }
        };

        if !completed {
            // Deleted while in flight: discard the orphaned result, spend nothing.
            log::warn!("Job {} vanished during processing, discarding result", id);
            if let Err(e) = self.blobs.delete(&processed.key).await {
                log::warn!("Failed to discard result of job {}: {}", id, e);
            }
            return Err(JobError::NotFound(id.clone()));
        }

        let remaining = reservation.commit();
        log::info!("Job {} done, {} credits left", id, remaining);
        self.persist().await;

        Ok(ProcessOutcome::Done)
    }

    async fn finish_failed(&self, id: &JobId, message: String) {
        {
            let mut jobs = self.write_jobs();
            if let Some(job) = jobs.iter_mut().find(|j| j.id() == id) {
                match job.fail(message) {
                    Ok(()) => self.publish(job, JobEventKind::StatusChanged),
                    Err(e) => log::error!("Job {} could not be marked failed: {}", id, e),
                }
            }
        }
        self.persist().await;
    }

    /// Processes every `Pending` and `Error` job concurrently. Refused as a
    /// whole, with nothing changed, when there are not enough credits.
    pub async fn process_all(&self) -> Result<BatchReport, JobError> {
        let eligible: Vec<JobId> = self
            .read_jobs()
            .iter()
            .filter(|j| j.status().is_eligible())
            .map(|j| j.id().clone())
            .collect();

        let available = self.credits.available();
        if eligible.len() > available as usize {
            log::warn!(
                "Refusing batch of {} jobs with {} credits available",
                eligible.len(),
                available
            );
            return Err(JobError::InsufficientCredits {
                required: eligible.len(),
                available,
            });
        }

        let results = join_all(eligible.iter().map(|id| self.process(id))).await;

        let mut report = BatchReport::default();
        for (id, result) in eligible.into_iter().zip(results) {
            match result {
                Ok(ProcessOutcome::Done) => report.succeeded.push(id),
                Ok(ProcessOutcome::Failed { no_output, .. }) => {
                    if no_output {
                        report.no_output.push(id.clone());
                    }
                    report.failed.push(id);
                }
                Err(JobError::EmptyOriginal(_)) => report.failed.push(id),
                Err(e) => report.rejected.push((id, e)),
            }
        }

        log::info!(
            "Batch finished: {} done, {} failed, {} rejected",
            report.succeeded.len(),
            report.failed.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Deletes every selected job. The jobs leave the collection and their
    /// handles are released under one write lock; only then are both blobs
    /// deleted, so an attempt still in flight finds its job gone and discards
    /// its own result. Returns how many were removed.
    pub async fn delete_selected(&self) -> usize {
        let gone: Vec<Job> = {
            let mut jobs = self.write_jobs();
            let (gone, kept): (Vec<Job>, Vec<Job>) = std::mem::take(&mut *jobs)
                .into_iter()
                .partition(|j| j.is_selected());
            *jobs = kept;
            for job in &gone {
                for handle in job.handles() {
                    self.handles.release(&handle);
                }
                self.publish(job, JobEventKind::Removed);
            }
            gone
        };

        if gone.is_empty() {
            return 0;
        }
        self.persist().await;

        for job in &gone {
            let id = job.id();
            for key in [id.original_key(), id.processed_key()] {
                if let Err(e) = self.blobs.delete(&key).await {
                    log::error!("Failed to delete blob '{}' of job {}: {}", key, id, e);
                }
            }
        }

        log::info!("Deleted {} jobs", gone.len());
        gone.len()
    }

    /// Flips one job's selection and returns the new value.
    pub fn toggle_select(&self, id: &JobId) -> Result<bool, JobError> {
        let mut jobs = self.write_jobs();
        let job = jobs
            .iter_mut()
            .find(|j| j.id() == id)
            .ok_or_else(|| JobError::NotFound(id.clone()))?;
        let selected = !job.is_selected();
        job.set_selected(selected);
        Ok(selected)
    }

    pub fn select_all(&self, selected: bool) {
        for job in self.write_jobs().iter_mut() {
            job.set_selected(selected);
        }
    }

    pub fn top_up_credits(&self, amount: u32) -> u32 {
        let balance = self.credits.top_up(amount);
        log::info!("Topped up {} credits, balance is {}", amount, balance);
        balance
    }

    /// Writes the processed images of all selected `Done` jobs into one zip
    /// under `directory`. `Ok(None)` when nothing qualifies.
    pub async fn export_selected(&self, directory: &Path) -> Result<Option<PathBuf>, ExportError> {
        let entries = self.export_entries();
        export::export_archive(self.blobs.as_ref(), &entries, directory, Utc::now()).await
    }

    /// Same as [`JobManager::export_selected`] but returns the archive bytes.
    pub async fn export_selected_bytes(&self) -> Result<Option<Vec<u8>>, ExportError> {
        let entries = self.export_entries();
        export::build_archive(self.blobs.as_ref(), &entries).await
    }

    fn export_entries(&self) -> Vec<ExportEntry> {
        self.read_jobs()
            .iter()
            .filter(|j| j.is_selected() && j.status() == JobStatus::Done)
            .filter_map(|j| {
                j.processed().map(|p| ExportEntry {
                    job_id: j.id().clone(),
                    file_name: p.file_name.clone(),
                    key: p.key.clone(),
                })
            })
            .collect()
    }

    /// Releases every outstanding display handle. Returns how many were live.
    pub fn shutdown(&self) -> usize {
        let released = self.handles.release_all();
        log::info!("Released {} display handles on shutdown", released);
        released
    }
}
