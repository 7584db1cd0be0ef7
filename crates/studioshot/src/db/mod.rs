//! Application database.
//!
//! One SQLite file per data directory holds both durable stores: image
//! payloads in [`Table::Blobs`] and the job snapshot in [`Table::KvStore`].
//! Store code never touches the connection directly; it goes through
//! [`Database::query`], which names the table so failures say which store
//! broke.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod migrations;

pub use error::DatabaseError;

/// File name of the database inside the data directory.
pub const DATABASE_FILE_NAME: &str = "studioshot.db";

/// Tables owned by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// Key to image bytes, behind [`crate::store::SqliteBlobStore`].
    Blobs,
    /// Key to text document, behind [`crate::store::SqliteMetadataStore`].
    KvStore,
    /// Applied schema versions.
    Migrations,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Blobs => "blobs",
            Table::KvStore => "kv_store",
            Table::Migrations => "_migrations",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared handle on the studio database. Clones share one connection.
///
/// A `Database` value only exists once the file is open and migrated, so the
/// stores built on it never see a half-initialized schema.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the database file, creating its directory, and
    /// brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let open_error = |e| DatabaseError::Open {
            path: path.to_path_buf(),
            source: e,
        };
        let conn = Connection::open(path).map_err(open_error)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(open_error)?;
        migrations::run_all(&conn)?;

        log::info!("Studio database ready at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|e| DatabaseError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        migrations::run_all(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` against `table` while holding the connection. SQLite errors
    /// come back tagged with the table.
    pub fn query<F, T>(&self, table: Table, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| DatabaseError::ConnectionPoisoned)?;
        f(&conn).map_err(|source| DatabaseError::Query { table, source })
    }
}

/// Database file location inside a data directory.
pub fn database_path(data_directory: &Path) -> PathBuf {
    data_directory.join(DATABASE_FILE_NAME)
}
