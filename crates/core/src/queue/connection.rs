//! Queue database handle.

use super::MIGRATIONS;
use crate::Error;
use crate::sqlite::connection;
use std::path::Path;
use tokio_rusqlite::Connection;

/// Queue database handle.
///
/// Independent of [`crate::CacheDb`]: it owns its own connection and file.
#[derive(Clone, Debug)]
pub struct QueueDb {
    pub(crate) conn: Connection,
}

impl QueueDb {
    /// Open the queue at the specified path, running pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = connection::open(path, MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory queue for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = connection::open_in_memory(MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Close the underlying connection. Other clones fail afterwards.
    pub async fn close(self) -> Result<(), Error> {
        self.conn.close().await.map_err(Error::from)
    }
}
