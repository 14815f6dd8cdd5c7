//! Queue draining.
//!
//! A sweep reads every pending entry in capture order and replays them one
//! at a time. Sweeps never overlap: background triggers that arrive while
//! any sweep runs coalesce into a single follow-up sweep. A manual sync
//! waits for the running sweep, covers every trigger raised before it
//! started and replies with the result of its own sweep.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use capsync_client::{Method, Network, Request, Url};
use capsync_core::{Error, QueueDb, QueueEntry, QueueStatus, QueueUpdate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clients::{Broadcast, ClientRegistry};
use crate::connectivity::Connectivity;

/// Outcome of one sweep. Broadcast once, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success_count: usize,
    pub failed_count: usize,
    pub total: usize,
}

/// Why a sweep was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A registered background reactivation tag fired.
    Reactivation(String),
    /// Connectivity went from offline to online.
    Online,
    /// The page asked for it.
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Reactivation(tag) => write!(f, "reactivation:{tag}"),
            SyncTrigger::Online => f.write_str("online"),
            SyncTrigger::Manual => f.write_str("manual"),
        }
    }
}

/// Named reactivation tags waiting for connectivity.
#[derive(Clone, Debug, Default)]
pub struct BackgroundSync {
    tags: Arc<StdMutex<BTreeSet<String>>>,
}

impl BackgroundSync {
    pub fn register(&self, tag: &str) {
        let inserted = self.tags.lock().unwrap_or_else(PoisonError::into_inner).insert(tag.to_string());
        if inserted {
            tracing::debug!(tag, "registered background sync");
        }
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner).contains(tag)
    }

    /// Drain every registered tag; each fires once.
    pub fn take_registered(&self) -> Vec<String> {
        std::mem::take(&mut *self.tags.lock().unwrap_or_else(PoisonError::into_inner))
            .into_iter()
            .collect()
    }
}

enum Delivery {
    Delivered,
    /// The server answered with a non-2xx status.
    Rejected(String),
    /// No response arrived.
    Unreachable(String),
    /// Replaying again cannot help: the stored entry no longer forms a
    /// request, or the server answered in a way that could not be read.
    Permanent(String),
}

/// Replays queued captures against the network.
pub struct SyncCoordinator {
    queue: QueueDb,
    network: Arc<dyn Network>,
    clients: ClientRegistry,
    connectivity: Connectivity,
    max_retries: u32,
    attempt_timeout: Duration,
    running: Mutex<()>,
    rerun: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        queue: QueueDb, network: Arc<dyn Network>, clients: ClientRegistry, connectivity: Connectivity,
        max_retries: u32, attempt_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            network,
            clients,
            connectivity,
            max_retries,
            attempt_timeout,
            running: Mutex::new(()),
            rerun: AtomicBool::new(false),
        }
    }

    /// Run a sweep for a background trigger.
    ///
    /// Returns `None` if the request was folded into a sweep already in
    /// progress; that sweep runs once more after it finishes.
    pub async fn trigger(&self, trigger: SyncTrigger) -> Option<SyncResult> {
        tracing::debug!(%trigger, "sync requested");
        self.rerun.store(true, Ordering::SeqCst);

        let mut last = None;
        loop {
            let Ok(_guard) = self.running.try_lock() else {
                tracing::debug!(%trigger, "sweep in progress, coalescing");
                return last;
            };
            if !self.rerun.swap(false, Ordering::SeqCst) {
                return last;
            }
            match self.sweep().await {
                Ok(result) => last = Some(result),
                Err(e) => tracing::error!(%trigger, "sweep aborted: {e}"),
            }
        }
    }

    /// Run a sweep now, waiting for any sweep in progress to finish first.
    ///
    /// Triggers raised during the sweep get their follow-up before this returns.
    pub async fn sync_now(&self) -> Result<SyncResult, Error> {
        let _guard = self.running.lock().await;
        self.rerun.store(false, Ordering::SeqCst);
        let result = self.sweep().await?;

        while self.rerun.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.sweep().await {
                tracing::error!("follow-up sweep aborted: {e}");
            }
        }
        Ok(result)
    }

    async fn sweep(&self) -> Result<SyncResult, Error> {
        let entries = self.queue.list_pending().await?;
        let mut result = SyncResult { total: entries.len(), ..Default::default() };
        tracing::info!(pending = result.total, "sweep started");

        for entry in &entries {
            match self.deliver(entry).await {
                Delivery::Delivered => {
                    result.success_count += 1;
                    if let Err(e) = self.queue.complete(entry.id).await {
                        tracing::error!(id = entry.id, "delivered entry could not be removed: {e}");
                    }
                }
                Delivery::Rejected(reason) | Delivery::Unreachable(reason) => {
                    result.failed_count += 1;
                    self.record_failure(entry, reason, false).await;
                }
                Delivery::Permanent(reason) => {
                    result.failed_count += 1;
                    self.record_failure(entry, reason, true).await;
                }
            }
        }

        tracing::info!(
            success = result.success_count,
            failed = result.failed_count,
            total = result.total,
            "sweep finished"
        );
        let reached = self.clients.broadcast(Broadcast::SyncComplete(result));
        tracing::debug!(sessions = reached, "sync result broadcast");

        Ok(result)
    }

    async fn deliver(&self, entry: &QueueEntry) -> Delivery {
        let request = match replay_request(entry) {
            Ok(request) => request,
            Err(e) => return Delivery::Permanent(e.to_string()),
        };

        match tokio::time::timeout(self.attempt_timeout, self.network.send(&request)).await {
            Ok(Ok(response)) => {
                self.connectivity.record(true);
                if response.is_success() {
                    tracing::debug!(id = entry.id, status = response.status.as_u16(), "entry delivered");
                    Delivery::Delivered
                } else {
                    Delivery::Rejected(format!("HTTP {}", response.status.as_u16()))
                }
            }
            Ok(Err(e)) if e.is_transient() => {
                self.connectivity.record(false);
                Delivery::Unreachable(e.to_string())
            }
            Ok(Err(e)) => Delivery::Permanent(e.to_string()),
            Err(_) => {
                self.connectivity.record(false);
                Delivery::Unreachable(
                    Error::Timeout(format!("no response within {}ms", self.attempt_timeout.as_millis())).to_string(),
                )
            }
        }
    }

    async fn record_failure(&self, entry: &QueueEntry, reason: String, permanent: bool) {
        let retry_count = entry.retry_count + 1;
        let status = if permanent || retry_count >= self.max_retries { QueueStatus::Failed } else { QueueStatus::Pending };
        let update = QueueUpdate {
            status: Some(status),
            retry_count: Some(retry_count),
            last_error: Some(reason.clone()),
            last_attempt: Some(Utc::now()),
        };

        match self.queue.update(entry.id, update).await {
            Ok(_) if status == QueueStatus::Failed => {
                tracing::warn!(id = entry.id, retry_count, "giving up on entry: {reason}");
            }
            Ok(_) => tracing::debug!(id = entry.id, retry_count, "delivery failed: {reason}"),
            Err(e) => tracing::error!(id = entry.id, "failed to record delivery failure: {e}"),
        }
    }
}

/// Rebuild the original request from a queue entry.
fn replay_request(entry: &QueueEntry) -> Result<Request, Error> {
    let method = Method::from_bytes(entry.method.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("stored method {:?}: {e}", entry.method)))?;
    let url = Url::parse(&entry.url).map_err(|e| Error::InvalidUrl(format!("{}: {e}", entry.url)))?;

    let mut request = Request::new(method, url);
    request.headers = entry.headers.clone();
    request.body = Some(entry.body.clone()).filter(|body| !body.is_empty());
    Ok(request)
}
