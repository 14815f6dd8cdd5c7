//! SQLite-backed response cache partitioned by generation.
//!
//! This module provides a persistent request/response cache using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Request keys derived from SHA-256 of method and URL
//! - One partition per cache generation (`cache_version`)
//! - Atomic purge of whole generations on activation
//! - Explicit full clear
//!
//! Entries never expire by time; only generation rollover or an explicit
//! clear removes them.

pub mod connection;
pub mod hash;
pub mod responses;

pub use crate::Error;

pub use connection::CacheDb;
pub use hash::compute_request_key;
pub use responses::CachedResponse;

use crate::sqlite::Migration;

/// Cache store schema.
pub(crate) const MIGRATIONS: &[Migration] = &[(1, include_str!("../../migrations/cache/001_cache_entries.sql"))];
