//! Shared SQLite plumbing for the cache and queue stores.
//!
//! Each store owns its own tokio-rusqlite connection (and therefore its own
//! background thread), so the two never contend on one handle.

pub mod connection;
pub mod migrations;

pub use migrations::Migration;
