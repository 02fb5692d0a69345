//! Connection setup for the translations database.

use std::path::Path;

use rusqlite::Connection;

use super::DatabaseError;

/// Schema steps in order. Each script records its own version.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    include_str!("../../resources/migrations/001_translations.sql"),
)];

/// Open the translations database at `path`, creating parent directories
/// and bringing the schema up to date.
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DatabaseError::MigrationFailed {
            version: 0,
            reason: format!("cannot create {}: {e}", parent.display()),
        })?;
    }
    prepare(Connection::open(path)?)
}

/// In-memory database with the current schema.
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    prepare(Connection::open_in_memory()?)
}

fn prepare(conn: Connection) -> Result<Connection, DatabaseError> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Apply every migration newer than the stored schema version.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    // Before the first migration there is no schema_version table.
    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0);

    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        tracing::info!(version, "Applying translations schema migration");
        conn.execute_batch(sql)
            .map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
    }
    Ok(())
}
