use std::path::PathBuf;

use thiserror::Error;

pub use crate::db::DatabaseError;
pub use crate::export::ExportError;
pub use crate::lifecycle::JobError;
pub use crate::store::{BlobStoreError, MetadataError};
pub use crate::transform::TransformError;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config does not match schema: {errors}")]
    SchemaValidation { errors: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, StudioError>;
