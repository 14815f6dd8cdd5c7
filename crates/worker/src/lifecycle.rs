//! Install, activation and session takeover for one cache generation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use capsync_client::fetch::resolve;
use capsync_client::{Network, Request, Url};
use capsync_core::{AppConfig, CacheDb, Error};
use tokio::sync::Mutex;

use crate::clients::ClientRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
        };
        f.write_str(name)
    }
}

/// Shell pre-caching outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    /// Assets that could not be fetched or stored.
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Generations deleted from the cache.
    pub purged: Vec<String>,
    /// Page sessions taken over.
    pub claimed: usize,
}

/// Drives one generation from parsed to activated.
pub struct Lifecycle {
    cache: CacheDb,
    network: Arc<dyn Network>,
    clients: ClientRegistry,
    version: String,
    origin: Url,
    shell_assets: Vec<String>,
    state: Mutex<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl Lifecycle {
    pub fn new(
        config: &AppConfig, cache: CacheDb, network: Arc<dyn Network>, clients: ClientRegistry,
    ) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("origin: {e}")))?;
        Ok(Self {
            cache,
            network,
            clients,
            version: config.cache_version.clone(),
            origin,
            shell_assets: config.shell_assets.clone(),
            state: Mutex::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    /// Install, then activate unless an older generation still controls a page.
    ///
    /// Returns `None` for the activation report while waiting for `SKIP_WAITING`.
    pub async fn start(&self) -> Result<(InstallReport, Option<ActivateReport>), Error> {
        let mut state = self.state.lock().await;
        let installed = self.install_locked(&mut state).await;

        let forced = self.skip_waiting.load(Ordering::SeqCst);
        if !forced && self.clients.controlled_by_other(&self.version) {
            tracing::info!(version = %self.version, "installed, waiting for older generation to release its pages");
            return Ok((installed, None));
        }

        let activated = self.activate_locked(&mut state).await?;
        Ok((installed, Some(activated)))
    }

    /// Pre-cache the shell assets into the current generation.
    pub async fn install(&self) -> InstallReport {
        let mut state = self.state.lock().await;
        self.install_locked(&mut state).await
    }

    /// Purge stale generations and claim every open page.
    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        let mut state = self.state.lock().await;
        self.activate_locked(&mut state).await
    }

    /// Activate as soon as installation has finished.
    ///
    /// Activates immediately if the generation is installed and waiting.
    pub async fn skip_waiting(&self) -> Result<Option<ActivateReport>, Error> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if *state != LifecycleState::Installed {
            tracing::debug!(state = %*state, "skip waiting noted");
            return Ok(None);
        }
        self.activate_locked(&mut state).await.map(Some)
    }

    async fn install_locked(&self, state: &mut LifecycleState) -> InstallReport {
        *state = LifecycleState::Installing;
        tracing::info!(version = %self.version, assets = self.shell_assets.len(), "installing");

        let mut report = InstallReport::default();
        for asset in &self.shell_assets {
            match self.precache(asset).await {
                Ok(()) => report.cached += 1,
                Err(e) => {
                    tracing::warn!(%asset, "shell asset not cached: {e}");
                    report.failed.push(asset.clone());
                }
            }
        }

        *state = LifecycleState::Installed;
        tracing::info!(cached = report.cached, failed = report.failed.len(), "installed");
        report
    }

    async fn precache(&self, asset: &str) -> Result<(), Error> {
        let url = resolve(&self.origin, asset).map_err(|e| Error::InvalidUrl(format!("{asset}: {e}")))?;
        let request = Request::get(url);
        let response = self.network.send(&request).await?;
        if !response.is_success() {
            return Err(Error::Network(format!("HTTP {}", response.status.as_u16())));
        }
        self.cache.put(&response.to_cached(&self.version, &request)?).await
    }

    async fn activate_locked(&self, state: &mut LifecycleState) -> Result<ActivateReport, Error> {
        if *state == LifecycleState::Activated {
            return Ok(ActivateReport::default());
        }
        *state = LifecycleState::Activating;

        let purged = match self.cache.purge_except(&self.version).await {
            Ok(purged) => purged,
            Err(e) => {
                *state = LifecycleState::Installed;
                return Err(e);
            }
        };
        let claimed = self.clients.claim(&self.version);

        *state = LifecycleState::Activated;
        tracing::info!(version = %self.version, ?purged, claimed, "activated");
        Ok(ActivateReport { purged, claimed })
    }
}
