//! Schema for the two store tables, versioned in `_migrations`.

use rusqlite::Connection;

use super::error::DatabaseError;
use super::Table;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_blobs_table",
        sql: "CREATE TABLE IF NOT EXISTS blobs (
            key TEXT PRIMARY KEY NOT NULL,
            data BLOB NOT NULL,
            size INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );",
    },
    Migration {
        version: 2,
        description: "create_kv_store_table",
        sql: "CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    },
];

/// Brings the schema up to date. Already applied versions are skipped, so
/// running this on every open is safe.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let bookkeeping = |source| DatabaseError::Query {
        table: Table::Migrations,
        source,
    };

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(bookkeeping)?;

    let current_version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |r| r.get(0),
        )
        .map_err(bookkeeping)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        log::info!(
            "Applying studio schema v{}: {}",
            migration.version,
            migration.description
        );

        let failed = |source| DatabaseError::Migration {
            version: migration.version,
            description: migration.description,
            source,
        };
        conn.execute_batch(migration.sql).map_err(failed)?;
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(failed)?;
    }

    Ok(())
}
