//! Durable queue of captured mutations awaiting delivery.
//!
//! Entries are appended when a mutating request fails to reach the network
//! and drained by the sync coordinator. The store only holds entries that
//! still need attention: a delivered entry is deleted, and the delivery is
//! counted in a small ledger so stats can still report it.
//!
//! Status lifecycle:
//!
//! ```text
//! pending --retry--> pending
//! pending --deliver--> (deleted, ledger += 1)
//! pending --ceiling reached--> failed --requeue_failed--> pending
//! ```

pub mod connection;
pub mod entries;

pub use connection::QueueDb;
pub use entries::{NewQueueEntry, QueueEntry, QueueStats, QueueStatus, QueueUpdate};

use crate::sqlite::Migration;

/// Queue store schema.
pub(crate) const MIGRATIONS: &[Migration] = &[
    (1, include_str!("../../migrations/queue/001_queue_entries.sql")),
    (2, include_str!("../../migrations/queue/002_queue_ledger.sql")),
];
