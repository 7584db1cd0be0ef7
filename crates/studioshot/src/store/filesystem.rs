use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::blob::{BlobStore, BlobStoreError};

/// Prefix of in-flight write files. Encoded key names never start with `.`.
const TEMP_PREFIX: &str = ".tmp-";

/// Encodes an opaque key into a file name. ASCII alphanumerics, `-` and `_`
/// pass through, every other byte becomes `%XX`.
fn encode_key(key: &str) -> Result<String, BlobStoreError> {
    if key.is_empty() {
        return Err(BlobStoreError::InvalidKey(key.to_string()));
    }

    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{:02X}", byte);
        }
    }
    Ok(encoded)
}

/// Blob store keeping one file per key under a directory.
///
/// Writes go to a temp file first and are renamed into place, so a crash
/// mid-write never leaves a truncated blob under the real key.
pub struct FsBlobStore {
    directory: PathBuf,
}

impl FsBlobStore {
    /// Creates the directory if needed and removes temp files left behind by
    /// an interrupted write.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, BlobStoreError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).map_err(|e| BlobStoreError::CreateDirectory {
            path: directory.clone(),
            source: e,
        })?;

        let store = Self { directory };
        store.remove_stale_temp_files();
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        Ok(self.directory.join(encode_key(key)?))
    }

    fn remove_stale_temp_files(&self) {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "Could not scan blob directory {}: {}",
                    self.directory.display(),
                    e
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    log::warn!("Failed to remove stale blob temp file {:?}: {}", name, e);
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobStoreError> {
        let path = self.path_for(key)?;
        let temp_path = self
            .directory
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

        tokio::fs::write(&temp_path, data)
            .await
            .map_err(|e| BlobStoreError::Write {
                key: key.to_string(),
                source: e,
            })?;

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(BlobStoreError::Write {
                key: key.to_string(),
                source: e,
            });
        }

        log::debug!("Stored blob '{}' at {}", key, path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobStoreError::Read {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, BlobStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobStoreError::Read {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobStoreError::Delete {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}
