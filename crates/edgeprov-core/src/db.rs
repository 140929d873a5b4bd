//! Shared database types and utilities.
//!
//! The device database is owned by an external provisioning pipeline; this
//! crate only ever opens it read-only, one connection per run.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;
use tracing::info;

/// Database errors surfaced by device record lookup.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database file not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("required table `{0}` is missing")]
    MissingTable(String),

    #[error("no device record to provision")]
    NoDevice,

    #[error("malformed device record: {0}")]
    Malformed(String),

    #[error("database access timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        Self::Query(e.to_string())
    }
}

/// Open a read-only connection to an existing `SQLite` database file.
///
/// Never creates the file. A path that does not point at a regular file is
/// reported as [`DatabaseError::NotFound`] before `SQLite` is involved.
pub async fn open_read_only(path: &Path) -> Result<SqliteConnection, DatabaseError> {
    if !path.is_file() {
        return Err(DatabaseError::NotFound(path.display().to_string()));
    }

    let conn = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .create_if_missing(false)
        .busy_timeout(Duration::from_secs(5))
        .connect()
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    info!(path = %path.display(), "Database opened read-only");

    Ok(conn)
}

/// Check whether a table with the given name exists.
pub async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool, DatabaseError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.is_some())
}
