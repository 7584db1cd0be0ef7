pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod export;
pub mod lifecycle;
pub mod logging;
pub mod session;
pub mod store;
pub mod transform;

pub use config::{load_config, BlobBackend, StudioConfig};
pub use error::{Result, StudioError};
pub use events::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use lifecycle::{
    rehydrate, BatchReport, CreditBalance, DisplayHandle, DisplayHandles, IntakeFile,
    IntakeReport, Job, JobError, JobId, JobManager, JobStatus, RehydrateDeps, RehydrationReport,
};
pub use session::open_session;
pub use store::{BlobStore, FsBlobStore, MetadataStore, SqliteBlobStore, SqliteMetadataStore};
pub use transform::{HttpTransformClient, TransformClient, TransformError};
