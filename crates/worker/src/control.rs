//! Typed request/reply protocol between the page and the worker.
//!
//! Messages are JSON objects tagged by `"type"`:
//!
//! ```json
//! {"type": "MANUAL_SYNC"}
//! {"type": "SYNC_RESULT", "success_count": 1, "failed_count": 0, "total": 1}
//! ```

use std::sync::Arc;

use capsync_core::{CacheDb, Error, QueueDb, QueueStats};
use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;
use crate::sync::{SyncCoordinator, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    ManualSync,
    GetQueueStats,
    ClearCache,
    GetVersion,
    SkipWaiting,
    /// Move every failed entry back to pending.
    RetryFailed,
    /// Drop every queued entry, pending or failed.
    ClearQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    SyncResult(SyncResult),
    QueueStats(QueueStats),
    CacheCleared { removed: u64 },
    Version { version: String },
    FailedRequeued { requeued: u64 },
    QueueCleared { removed: u64 },
    Error { message: String },
}

/// Parse a raw control message. Unknown or malformed messages are logged and dropped.
pub fn decode(raw: &str) -> Option<ControlRequest> {
    match serde_json::from_str(raw) {
        Ok(request) => Some(request),
        Err(e) => {
            tracing::warn!(raw, "ignoring control message: {e}");
            None
        }
    }
}

/// Executes control requests against the worker's components.
pub struct ControlChannel {
    coordinator: Arc<SyncCoordinator>,
    lifecycle: Arc<Lifecycle>,
    queue: QueueDb,
    cache: CacheDb,
}

impl ControlChannel {
    pub fn new(coordinator: Arc<SyncCoordinator>, lifecycle: Arc<Lifecycle>, queue: QueueDb, cache: CacheDb) -> Self {
        Self { coordinator, lifecycle, queue, cache }
    }

    /// Handle one request. `SKIP_WAITING` has no reply.
    pub async fn dispatch(&self, request: ControlRequest) -> Option<ControlReply> {
        tracing::debug!(?request, "control request");
        match self.execute(request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(?request, "control request failed: {e}");
                Some(ControlReply::Error { message: e.to_string() })
            }
        }
    }

    async fn execute(&self, request: ControlRequest) -> Result<Option<ControlReply>, Error> {
        let reply = match request {
            ControlRequest::ManualSync => ControlReply::SyncResult(self.coordinator.sync_now().await?),
            ControlRequest::GetQueueStats => ControlReply::QueueStats(self.queue.aggregate_stats().await?),
            ControlRequest::ClearCache => ControlReply::CacheCleared { removed: self.cache.clear_all().await? },
            ControlRequest::GetVersion => ControlReply::Version { version: self.lifecycle.version().to_string() },
            ControlRequest::SkipWaiting => {
                self.lifecycle.skip_waiting().await?;
                return Ok(None);
            }
            ControlRequest::RetryFailed => ControlReply::FailedRequeued { requeued: self.queue.requeue_failed().await? },
            ControlRequest::ClearQueue => ControlReply::QueueCleared { removed: self.queue.clear().await? },
        };
        Ok(Some(reply))
    }
}
