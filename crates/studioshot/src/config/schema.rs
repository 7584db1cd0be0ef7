use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db;

/// Which blob store implementation backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// `blobs` table in the application database.
    #[default]
    Sqlite,
    /// One file per key under `<data_directory>/blobs`.
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioConfig {
    pub version: String,

    /// Holds the database and, for the filesystem backend, the blob files.
    #[serde(default = "default_data_directory_or_relative")]
    pub data_directory: PathBuf,

    pub transform_endpoint: String,

    /// Credits granted to a fresh session.
    #[serde(default = "default_initial_credits")]
    pub initial_credits: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Image generation is slow; this bounds a single transform call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub blob_backend: BlobBackend,
}

fn default_initial_credits() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

/// Returns the canonical data directory: `~/.studioshot`.
pub fn default_data_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".studioshot"))
}

fn default_data_directory_or_relative() -> PathBuf {
    default_data_directory().unwrap_or_else(|| PathBuf::from(".studioshot"))
}

impl StudioConfig {
    /// Config with defaults rooted at the given data directory.
    pub fn with_data_directory<P: AsRef<Path>>(data_directory: P) -> Self {
        Self {
            data_directory: data_directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        db::database_path(&self.data_directory)
    }

    pub fn blob_directory(&self) -> PathBuf {
        self.data_directory.join("blobs")
    }
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            data_directory: default_data_directory_or_relative(),
            transform_endpoint: "http://localhost:3000/api/transform".to_string(),
            initial_credits: default_initial_credits(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            blob_backend: BlobBackend::default(),
        }
    }
}
