use std::path::PathBuf;

use thiserror::Error;

use super::Table;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open studio database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A statement against one of the store tables failed.
    #[error("Query on '{table}' failed: {source}")]
    Query {
        table: Table,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Migration v{version} ({description}) failed: {source}")]
    Migration {
        version: u32,
        description: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A thread panicked while holding the connection.
    #[error("Database connection is poisoned")]
    ConnectionPoisoned,
}
