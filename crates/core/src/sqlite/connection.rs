//! Database connection management with pragma configuration.
//!
//! This module handles opening a SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations.

use super::migrations::{self, Migration};
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Open a database at the specified path.
///
/// Creates the file if it doesn't exist, applies performance pragmas,
/// and runs any pending migrations from `schema`.
pub async fn open(path: impl AsRef<Path>, schema: &'static [Migration]) -> Result<Connection, Error> {
    let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
    prepare(conn, schema).await
}

/// Open an in-memory database for testing.
///
/// Creates a temporary in-memory SQLite database with the same
/// pragma configuration as file-based databases.
pub async fn open_in_memory(schema: &'static [Migration]) -> Result<Connection, Error> {
    let conn = Connection::open_in_memory()
        .await
        .map_err(|e| Error::Database(e.into()))?;
    prepare(conn, schema).await
}

async fn prepare(conn: Connection, schema: &'static [Migration]) -> Result<Connection, Error> {
    conn.call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        Ok(())
    })
    .await
    .map_err(Error::Database)?;

    migrations::run(&conn, schema).await?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let conn = open_in_memory(&[]).await.unwrap();
        let version = conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn test_open_file_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open(dir.path().join("wal.sqlite"), &[]).await.unwrap();
        let mode = conn
            .call(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
