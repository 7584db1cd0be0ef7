//! Bridge to the remote image enhancement service.
//!
//! The service is a black box: raw image bytes and a MIME type go in, new
//! image bytes come out. Nothing here retries; a retry is a user action on
//! the job.

use async_trait::async_trait;
use thiserror::Error;

pub mod http;

pub use http::HttpTransformClient;

#[derive(Error, Debug)]
pub enum TransformError {
    /// The request was rejected locally before any network call.
    #[error("Invalid transform request: {0}")]
    InvalidRequest(String),

    #[error("Service error: network failure: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Service error: {message} (status {status})")]
    Remote { status: u16, message: String },

    /// The service answered successfully but produced no image.
    #[error("Service error: no image returned{}", .detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
    NoOutput { detail: Option<String> },

    #[error("Service error: malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("Service error: invalid image encoding: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl TransformError {
    /// True for a successful call that produced no output.
    pub fn is_no_output(&self) -> bool {
        matches!(self, TransformError::NoOutput { .. })
    }
}

/// Turns an image into its studio-retouched version.
#[async_trait]
pub trait TransformClient: Send + Sync {
    async fn transform(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, TransformError>;
}
