//! Cache database handle.

use super::MIGRATIONS;
use crate::Error;
use crate::sqlite::connection;
use std::path::Path;
use tokio_rusqlite::Connection;

/// Cache database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread. Clones share the connection.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open the cache at the specified path, running pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = connection::open(path, MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory cache for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = connection::open_in_memory(MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Close the underlying connection. Other clones fail afterwards.
    pub async fn close(self) -> Result<(), Error> {
        self.conn.close().await.map_err(Error::from)
    }
}
