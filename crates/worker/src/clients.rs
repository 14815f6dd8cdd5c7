//! Open page sessions and the unsolicited broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::sync::SyncResult;

/// Messages pushed to every open page without being asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Broadcast {
    SyncComplete(SyncResult),
}

#[derive(Debug)]
struct Inner {
    sender: broadcast::Sender<Broadcast>,
    /// Session id -> generation controlling it, if any.
    sessions: Mutex<HashMap<u64, Option<String>>>,
    next_id: AtomicU64,
}

/// Registry of open page sessions.
#[derive(Clone, Debug)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { inner: Arc::new(Inner { sender, sessions: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }) }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Option<String>>> {
        self.inner.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session, optionally already controlled by `controller`.
    pub fn connect(&self, controller: Option<String>) -> ClientSession {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let receiver = self.inner.sender.subscribe();
        self.sessions().insert(id, controller);
        tracing::debug!(session = id, "page session opened");
        ClientSession { id, receiver, registry: self.clone() }
    }

    fn disconnect(&self, id: u64) {
        self.sessions().remove(&id);
        tracing::debug!(session = id, "page session closed");
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions().len()
    }

    pub fn controller_of(&self, id: u64) -> Option<String> {
        self.sessions().get(&id).cloned().flatten()
    }

    /// Whether any open session is controlled by a generation other than `generation`.
    pub fn controlled_by_other(&self, generation: &str) -> bool {
        self.sessions()
            .values()
            .any(|controller| controller.as_deref().is_some_and(|g| g != generation))
    }

    /// Take control of every open session. Returns how many were claimed.
    pub fn claim(&self, generation: &str) -> usize {
        let mut sessions = self.sessions();
        for controller in sessions.values_mut() {
            *controller = Some(generation.to_string());
        }
        sessions.len()
    }

    /// Push a message to every open session. Returns how many received it.
    pub fn broadcast(&self, message: Broadcast) -> usize {
        self.inner.sender.send(message).unwrap_or(0)
    }
}

/// One open page context.
#[derive(Debug)]
pub struct ClientSession {
    id: u64,
    receiver: broadcast::Receiver<Broadcast>,
    registry: ClientRegistry,
}

impl ClientSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next broadcast, skipping over any the session lagged past.
    pub async fn recv(&mut self) -> Option<Broadcast> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(session = self.id, skipped, "page session lagged behind broadcasts");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take a broadcast if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Broadcast> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.registry.disconnect(self.id);
    }
}
