use thiserror::Error;

use super::job::{JobId, JobStatus};

/// A rejected job operation. Apart from `EmptyOriginal`, returning one of
/// these means no job state and no credit changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("No credits left. Top up to continue.")]
    NoCredits,

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {0} is already being processed")]
    AlreadyProcessing(JobId),

    #[error("Job {0} is already done")]
    AlreadyDone(JobId),

    /// The job was moved to `Error` because its original is gone.
    #[error("Original file of job {0} is missing or empty")]
    EmptyOriginal(JobId),

    #[error("Batch needs {required} credits but only {available} are available")]
    InsufficientCredits { required: usize, available: u32 },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}
