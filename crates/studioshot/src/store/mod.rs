//! Durable local stores: binary blobs and the job metadata snapshot.

pub mod blob;
pub mod filesystem;
pub mod metadata;

pub use blob::{BlobStore, BlobStoreError, SqliteBlobStore};
pub use filesystem::FsBlobStore;
pub use metadata::{JobRecord, MetadataError, MetadataStore, Snapshot, SqliteMetadataStore};
