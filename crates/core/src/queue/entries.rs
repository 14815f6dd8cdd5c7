//! Queue entry operations.
//!
//! Every operation runs inside a single SQLite transaction on the queue's
//! background thread, so no caller ever observes a half-applied change.
//! Storage failures surface as [`Error::QueuePersistence`]; a mutation is
//! never dropped silently.

use std::fmt;

use super::connection::QueueDb;
use crate::Error;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row, types::Type};

/// Delivery status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Failed,
    /// Terminal. Never stored: completing an entry deletes it.
    Completed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Failed => "failed",
            QueueStatus::Completed => "completed",
        }
    }

    /// Parse the stored representation.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "pending" => Ok(QueueStatus::Pending),
            "failed" => Ok(QueueStatus::Failed),
            "completed" => Ok(QueueStatus::Completed),
            other => Err(Error::InvalidInput(format!("unknown queue status: {other}"))),
        }
    }

    /// Whether [`QueueDb::update`] may move an entry from `self` to `next`.
    ///
    /// Leaving `failed` requires [`QueueDb::requeue_failed`]; reaching
    /// `completed` requires [`QueueDb::complete`].
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Pending)
                | (QueueStatus::Pending, QueueStatus::Failed)
                | (QueueStatus::Failed, QueueStatus::Failed)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation to append to the queue. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A durable record of one mutation awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Partial update applied by [`QueueDb::update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueUpdate {
    pub status: Option<QueueStatus>,
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Aggregate queue counters.
///
/// `total` counts live entries (`pending + failed`); `completed` is the
/// historical number of delivered entries recorded in the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub failed: u64,
    pub completed: u64,
}

const ENTRY_COLUMNS: &str =
    "id, url, method, headers_json, body, created_at, status, retry_count, last_error, last_attempt";

/// Fixed-width UTC timestamps sort lexically in time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let headers_json: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    let status: String = row.get(6)?;
    let last_attempt: Option<String> = row.get(9)?;

    Ok(QueueEntry {
        id: row.get(0)?,
        url: row.get(1)?,
        method: row.get(2)?,
        headers: serde_json::from_str(&headers_json).map_err(|e| conversion_error(3, e))?,
        body: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
        status: QueueStatus::parse(&status).map_err(|e| conversion_error(6, e.to_string()))?,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        last_attempt: last_attempt.as_deref().map(|s| parse_timestamp(9, s)).transpose()?,
    })
}

fn select_entry(conn: &rusqlite::Connection, id: i64) -> Result<Option<QueueEntry>, Error> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_entry).optional()?)
}

/// Lifecycle errors pass through; anything else is a persistence failure.
fn persistence(err: Error) -> Error {
    match err {
        Error::NotFound(_) | Error::InvalidTransition { .. } | Error::QueuePersistence(_) => err,
        other => Error::QueuePersistence(other.to_string()),
    }
}

impl QueueDb {
    /// Append a mutation with `status = pending` and `retry_count = 0`.
    ///
    /// Returns the store-assigned id.
    pub async fn add(&self, entry: &NewQueueEntry) -> Result<i64, Error> {
        let headers_json = serde_json::to_string(&entry.headers).map_err(|e| persistence(e.into()))?;
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO queue_entries (url, method, headers_json, body, created_at, status, retry_count)
                    VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0)",
                    params![entry.url, entry.method, headers_json, entry.body, format_timestamp(&entry.created_at)],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(id)
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Get an entry by id.
    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>, Error> {
        self.conn
            .call(move |conn| select_entry(conn, id))
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Pending entries in capture order (`created_at`, then `id`).
    pub async fn list_pending(&self) -> Result<Vec<QueueEntry>, Error> {
        self.list_by_status(QueueStatus::Pending).await
    }

    /// Entries with the given status in capture order.
    pub async fn list_by_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<QueueEntry>, Error> {
                let sql =
                    format!("SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE status = ?1 ORDER BY created_at ASC, id ASC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![status.as_str()], row_to_entry)?;

                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row?);
                }
                Ok(entries)
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Apply a partial update and return the updated entry.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no entry has this id
    /// - `InvalidTransition` if the status change is not allowed
    /// - `QueuePersistence` if the transaction cannot commit
    pub async fn update(&self, id: i64, update: QueueUpdate) -> Result<QueueEntry, Error> {
        self.conn
            .call(move |conn| -> Result<QueueEntry, Error> {
                let tx = conn.transaction()?;
                let mut entry = select_entry(&tx, id)?.ok_or(Error::NotFound(id))?;

                let next = update.status.unwrap_or(entry.status);
                if !entry.status.can_transition_to(next) {
                    return Err(Error::InvalidTransition { from: entry.status.to_string(), to: next.to_string() });
                }

                entry.status = next;
                if let Some(retry_count) = update.retry_count {
                    entry.retry_count = retry_count;
                }
                if let Some(last_error) = update.last_error {
                    entry.last_error = Some(last_error);
                }
                if let Some(last_attempt) = update.last_attempt {
                    entry.last_attempt = Some(last_attempt);
                }

                tx.execute(
                    "UPDATE queue_entries SET status = ?1, retry_count = ?2, last_error = ?3, last_attempt = ?4
                    WHERE id = ?5",
                    params![
                        entry.status.as_str(),
                        entry.retry_count,
                        entry.last_error,
                        entry.last_attempt.as_ref().map(format_timestamp),
                        id,
                    ],
                )?;
                let updated = select_entry(&tx, id)?.ok_or(Error::NotFound(id))?;
                tx.commit()?;
                Ok(updated)
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Delete an entry without recording a delivery.
    pub async fn remove(&self, id: i64) -> Result<(), Error> {
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let deleted = conn.execute("DELETE FROM queue_entries WHERE id = ?1", params![id])?;
                if deleted == 0 {
                    return Err(Error::NotFound(id));
                }
                Ok(())
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Delete a delivered entry and count it in the ledger atomically.
    pub async fn complete(&self, id: i64) -> Result<(), Error> {
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                let deleted = tx.execute("DELETE FROM queue_entries WHERE id = ?1", params![id])?;
                if deleted == 0 {
                    return Err(Error::NotFound(id));
                }
                tx.execute("UPDATE queue_ledger SET count = count + 1 WHERE outcome = 'completed'", [])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Move every failed entry back to pending with a fresh retry budget.
    ///
    /// Returns the number of requeued entries.
    pub async fn requeue_failed(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "UPDATE queue_entries SET status = 'pending', retry_count = 0 WHERE status = 'failed'",
                    [],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Drop every queued entry. This is the explicit manual reset.
    ///
    /// Returns the number of removed entries.
    pub async fn clear(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM queue_entries", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }

    /// Count entries by status, plus the delivered ledger.
    pub async fn aggregate_stats(&self) -> Result<QueueStats, Error> {
        self.conn
            .call(|conn| -> Result<QueueStats, Error> {
                let tx = conn.transaction()?;
                let (pending, failed): (i64, i64) = tx.query_row(
                    "SELECT
                        COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
                    FROM queue_entries",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let completed: i64 = tx
                    .query_row("SELECT count FROM queue_ledger WHERE outcome = 'completed'", [], |row| row.get(0))
                    .optional()?
                    .unwrap_or(0);
                tx.commit()?;

                Ok(QueueStats {
                    total: (pending + failed) as u64,
                    pending: pending as u64,
                    failed: failed as u64,
                    completed: completed as u64,
                })
            })
            .await
            .map_err(|e| persistence(Error::from(e)))
    }
}
