//! The job model.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::display::DisplayHandle;
use super::error::JobError;
use crate::store::JobRecord;

/// Blob key suffix of a job's processed image.
pub const PROCESSED_KEY_SUFFIX: &str = "_processed";

/// File name prefix of a job's processed image.
pub const PROCESSED_FILE_PREFIX: &str = "studio_";

const MISSING_ERROR_MESSAGE: &str = "An unknown error occurred.";

/// Opaque job identifier, also the blob key of the job's original.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn original_key(&self) -> String {
        self.0.clone()
    }

    pub fn processed_key(&self) -> String {
        format!("{}{}", self.0, PROCESSED_KEY_SUFFIX)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    /// Allowed edges of the job state machine. `Pending -> Error` and
    /// `Error -> Error` only happen when the original turns out to be gone.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Error, Processing)
                | (Processing, Done)
                | (Processing, Error)
                | (Pending, Error)
                | (Error, Error)
        )
    }

    /// Jobs a "process all" batch picks up.
    pub fn is_eligible(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Error)
    }

    /// Status to restore after a restart. Nothing in flight survives one.
    pub fn restored(self) -> JobStatus {
        match self {
            JobStatus::Processing => JobStatus::Pending,
            other => other,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Reference to a payload owned by the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub key: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Name the processed image of an original is stored and exported under.
pub fn processed_file_name(original_file_name: &str) -> String {
    format!("{}{}", PROCESSED_FILE_PREFIX, original_file_name)
}

/// One image's lifecycle record.
///
/// Status and error only change through the transition methods, which keep
/// `error.is_some() == (status == Error)` and `processed.is_some()` for `Done`.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    original: BlobRef,
    processed: Option<BlobRef>,
    original_handle: DisplayHandle,
    processed_handle: Option<DisplayHandle>,
    error: Option<String>,
    selected: bool,
}

impl Job {
    pub(crate) fn new(id: JobId, original: BlobRef, original_handle: DisplayHandle) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            original,
            processed: None,
            original_handle,
            processed_handle: None,
            error: None,
            selected: false,
        }
    }

    /// Rebuilds a job from persisted state. `Processing` is downgraded and a
    /// `Done` without its processed blob is demoted by the caller beforehand.
    pub(crate) fn restore(
        id: JobId,
        status: JobStatus,
        error: Option<String>,
        original: BlobRef,
        original_handle: DisplayHandle,
        processed: Option<(BlobRef, DisplayHandle)>,
    ) -> Self {
        let status = status.restored();
        let error = match status {
            JobStatus::Error => Some(error.unwrap_or_else(|| MISSING_ERROR_MESSAGE.to_string())),
            _ => None,
        };
        let (processed, processed_handle) = match processed {
            Some((blob, handle)) => (Some(blob), Some(handle)),
            None => (None, None),
        };

        Self {
            id,
            status,
            original,
            processed,
            original_handle,
            processed_handle,
            error,
            selected: false,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn original(&self) -> &BlobRef {
        &self.original
    }

    pub fn processed(&self) -> Option<&BlobRef> {
        self.processed.as_ref()
    }

    pub fn original_handle(&self) -> &DisplayHandle {
        &self.original_handle
    }

    pub fn processed_handle(&self) -> Option<&DisplayHandle> {
        self.processed_handle.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Claims the job for a transformation attempt and clears the last error.
    pub(crate) fn begin_processing(&mut self) -> Result<(), JobError> {
        match self.status {
            JobStatus::Processing => return Err(JobError::AlreadyProcessing(self.id.clone())),
            JobStatus::Done => return Err(JobError::AlreadyDone(self.id.clone())),
            _ => {}
        }
        self.transition(JobStatus::Processing)?;
        self.error = None;
        Ok(())
    }

    /// Records a successful attempt. Returns the processed handle this one
    /// replaces, which the caller must release.
    pub(crate) fn complete(
        &mut self,
        processed: BlobRef,
        handle: DisplayHandle,
    ) -> Result<Option<DisplayHandle>, JobError> {
        self.transition(JobStatus::Done)?;
        self.processed = Some(processed);
        self.error = None;
        Ok(self.processed_handle.replace(handle))
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Error)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Handles to release when the job goes away.
    pub(crate) fn handles(&self) -> Vec<DisplayHandle> {
        let mut handles = vec![self.original_handle.clone()];
        if let Some(handle) = &self.processed_handle {
            handles.push(handle.clone());
        }
        handles
    }

    pub fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id.clone(),
            status: self.status,
            error: self.error.clone(),
            original_file_name: self.original.file_name.clone(),
            processed_file_name: self.processed.as_ref().map(|p| p.file_name.clone()),
            mime_type: Some(self.original.mime_type.clone()),
        }
    }
}
