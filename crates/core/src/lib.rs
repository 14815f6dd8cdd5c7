//! Core types and shared functionality for capsync.
//!
//! This crate provides:
//! - Response cache partitioned by generation, backed by SQLite
//! - Durable queue of captured mutations awaiting delivery
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod queue;
pub(crate) mod sqlite;

pub use cache::{CacheDb, CachedResponse};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use queue::{NewQueueEntry, QueueDb, QueueEntry, QueueStats, QueueStatus, QueueUpdate};
