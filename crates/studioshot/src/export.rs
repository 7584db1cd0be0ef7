//! Bulk export of processed images as one zip archive.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::lifecycle::JobId;
use crate::store::{BlobStore, BlobStoreError};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),

    #[error("Failed to build archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to write archive '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive already exists: {0}")]
    FileExists(PathBuf),
}

/// One processed image to put into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub job_id: JobId,
    pub file_name: String,
    pub key: String,
}

pub fn archive_file_name(at: DateTime<Utc>) -> String {
    format!("Studio_Shots_{}.zip", at.format("%Y-%m-%dT%H-%M-%S"))
}

fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => (&file_name[..dot_pos], Some(&file_name[dot_pos..])),
        _ => (file_name, None),
    }
}

/// Returns `file_name`, or `base_N.ext` for the first N >= 2 not yet used.
fn unique_entry_name(used: &mut HashSet<String>, file_name: &str) -> String {
    if used.insert(file_name.to_string()) {
        return file_name.to_string();
    }

    let (base, ext) = split_extension(file_name);
    let mut counter = 2;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{}_{}{}", base, counter, ext),
            None => format!("{}_{}", base, counter),
        };
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// An archive built in memory.
struct Archive {
    bytes: Vec<u8>,
    written: usize,
}

/// Builds the archive in memory. Entries whose blob is gone are skipped;
/// `Ok(None)` when no entry made it in.
pub async fn build_archive(
    blobs: &dyn BlobStore,
    entries: &[ExportEntry],
) -> Result<Option<Vec<u8>>, ExportError> {
    Ok(write_archive(blobs, entries).await?.map(|a| a.bytes))
}

async fn write_archive(
    blobs: &dyn BlobStore,
    entries: &[ExportEntry],
) -> Result<Option<Archive>, ExportError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut used = HashSet::new();
    let mut written = 0usize;

    for entry in entries {
        let Some(data) = blobs.get(&entry.key).await? else {
            log::warn!(
                "Processed image of job {} is missing, leaving it out of the export",
                entry.job_id
            );
            continue;
        };

        let name = unique_entry_name(&mut used, &entry.file_name);
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(&data)
            .map_err(|e| ExportError::Zip(e.into()))?;
        written += 1;
    }

    if written == 0 {
        return Ok(None);
    }

    let cursor = writer.finish()?;
    Ok(Some(Archive {
        bytes: cursor.into_inner(),
        written,
    }))
}

/// Builds the archive and writes it as `Studio_Shots_<timestamp>.zip` under
/// `directory`, numbering the name if it is already taken.
pub async fn export_archive(
    blobs: &dyn BlobStore,
    entries: &[ExportEntry],
    directory: &Path,
    at: DateTime<Utc>,
) -> Result<Option<PathBuf>, ExportError> {
    if entries.is_empty() {
        return Ok(None);
    }

    let Some(archive) = write_archive(blobs, entries).await? else {
        return Ok(None);
    };

    std::fs::create_dir_all(directory).map_err(|e| ExportError::WriteFile {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let path = write_new_file(directory, &archive_file_name(at), &archive.bytes)?;
    log::info!(
        "Exported {} of {} images to {}",
        archive.written,
        entries.len(),
        path.display()
    );
    Ok(Some(path))
}

/// Creates the file with O_EXCL, trying `name_2.zip`, `name_3.zip`, ... when
/// the name is taken.
fn write_new_file(directory: &Path, file_name: &str, content: &[u8]) -> Result<PathBuf, ExportError> {
    let (base, ext) = split_extension(file_name);

    for counter in 1..=1000 {
        let try_name = if counter == 1 {
            file_name.to_string()
        } else {
            match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            }
        };
        let try_path = directory.join(&try_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&try_path)
        {
            Ok(file) => {
                fill_new_file(&try_path, file, content)?;
                return Ok(try_path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(ExportError::WriteFile {
                    path: try_path,
                    source: e,
                })
            }
        }
    }

    Err(ExportError::FileExists(directory.join(file_name)))
}

/// Writes `content` into a file just created at `path`. A partial file is
/// removed again when the write fails.
fn fill_new_file<W: Write>(path: &Path, mut file: W, content: &[u8]) -> Result<(), ExportError> {
    if let Err(e) = file.write_all(content).and_then(|()| file.flush()) {
        drop(file);
        if let Err(remove_err) = std::fs::remove_file(path) {
            log::warn!(
                "Failed to remove partial archive {}: {}",
                path.display(),
                remove_err
            );
        }
        return Err(ExportError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}
