//! Job lifecycle: the job model, the credit gate, display handles, the
//! manager that drives transitions and the startup rehydration protocol.

pub mod credits;
pub mod display;
pub mod error;
pub mod job;
pub mod manager;
pub mod rehydrate;

pub use credits::{CreditBalance, CreditReservation};
pub use display::{DisplayHandle, DisplayHandles};
pub use error::JobError;
pub use job::{BlobRef, Job, JobId, JobStatus};
pub use manager::{
    BatchReport, IntakeFailure, IntakeFile, IntakeReport, JobManager, ProcessOutcome,
    SelectionSummary,
};
pub use rehydrate::{rehydrate, RehydrateDeps, RehydrationReport};
