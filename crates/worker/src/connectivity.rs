//! Online/offline tracking.
//!
//! Every network attempt reports whether a response arrived. The cell only
//! notifies subscribers on an actual change, so an offline -> online edge
//! is seen exactly once.

use std::sync::Arc;
use std::time::Duration;

use capsync_client::{Network, Request, Url};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared connectivity cell.
#[derive(Clone, Debug)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record an observation. Returns true if the state changed.
    pub fn record(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Probe `target` once and record the outcome. Any HTTP answer counts as online.
pub async fn probe(network: &dyn Network, target: &Url, connectivity: &Connectivity) -> bool {
    let online = network.send(&Request::get(target.clone())).await.is_ok();
    connectivity.record(online);
    online
}

/// Probe periodically until the shutdown signal flips.
pub fn spawn_probe(
    network: Arc<dyn Network>, target: Url, interval: Duration, connectivity: Connectivity,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    probe(network.as_ref(), &target, &connectivity).await;
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
