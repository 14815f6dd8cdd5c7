//! The worker service object.
//!
//! [`Worker::start`] opens both stores, wires every component together and
//! spawns a single inbox loop. Each inbox event runs on its own task; the
//! stores serialize writers and the coordinator serializes sweeps, so the
//! loop itself holds no locks.

use std::sync::Arc;

use capsync_client::fetch::resolve;
use capsync_client::{Network, Request, Response};
use capsync_core::{AppConfig, CacheDb, Error, QueueDb};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::clients::{ClientRegistry, ClientSession};
use crate::connectivity::{self, Connectivity};
use crate::control::{self, ControlChannel, ControlReply, ControlRequest};
use crate::lifecycle::{ActivateReport, InstallReport, Lifecycle, LifecycleState};
use crate::strategy::StrategyEngine;
use crate::sync::{BackgroundSync, SyncCoordinator, SyncTrigger};

/// Work accepted by the inbox.
enum Event {
    Fetch { request: Request, reply: oneshot::Sender<Result<Response, Error>> },
    Control { request: ControlRequest, reply: oneshot::Sender<Option<ControlReply>> },
    Trigger(SyncTrigger),
}

/// Every component of a running worker.
pub struct Worker {
    config: AppConfig,
    cache: CacheDb,
    queue: QueueDb,
    engine: StrategyEngine,
    coordinator: Arc<SyncCoordinator>,
    control: ControlChannel,
    lifecycle: Arc<Lifecycle>,
    clients: ClientRegistry,
    connectivity: Connectivity,
    background: BackgroundSync,
}

impl Worker {
    /// Open the stores named in `config` and start the worker.
    pub async fn start(config: AppConfig, network: Arc<dyn Network>) -> Result<WorkerHandle, Error> {
        let cache = CacheDb::open(&config.cache_db_path).await?;
        let queue = QueueDb::open(&config.queue_db_path).await?;
        Self::start_with_stores(config, network, cache, queue).await
    }

    /// Start the worker on already opened stores.
    pub async fn start_with_stores(
        config: AppConfig, network: Arc<dyn Network>, cache: CacheDb, queue: QueueDb,
    ) -> Result<WorkerHandle, Error> {
        let clients = ClientRegistry::new(config.inbox_capacity);
        let connectivity = Connectivity::new(true);
        let background = BackgroundSync::default();

        let engine = StrategyEngine::new(
            &config,
            cache.clone(),
            queue.clone(),
            network.clone(),
            background.clone(),
            connectivity.clone(),
        )?;
        let probe = config
            .probe_interval()
            .map(|interval| {
                resolve(engine.router().origin(), &config.probe_path)
                    .map(|target| (target, interval))
                    .map_err(|e| Error::InvalidUrl(format!("probe_path {}: {e}", config.probe_path)))
            })
            .transpose()?;
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            network.clone(),
            clients.clone(),
            connectivity.clone(),
            config.max_retries,
            config.timeout(),
        ));
        let lifecycle = Arc::new(Lifecycle::new(&config, cache.clone(), network.clone(), clients.clone())?);
        let control = ControlChannel::new(coordinator.clone(), lifecycle.clone(), queue.clone(), cache.clone());

        let worker = Arc::new(Worker {
            config,
            cache,
            queue,
            engine,
            coordinator,
            control,
            lifecycle,
            clients,
            connectivity,
            background,
        });

        let (inbox, rx) = mpsc::channel(worker.config.inbox_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut tasks = vec![tokio::spawn(worker.clone().run(rx, shutdown_rx.clone()))];
        tasks.push(tokio::spawn(worker.clone().watch_connectivity(inbox.clone(), shutdown_rx.clone())));
        if let Some((target, interval)) = probe {
            tasks.push(connectivity::spawn_probe(network, target, interval, worker.connectivity.clone(), shutdown_rx));
        }

        let handle = WorkerHandle {
            worker,
            inbox,
            shutdown: Arc::new(shutdown),
            tasks: Arc::new(Mutex::new(tasks)),
        };
        if let Err(e) = handle.resume_pending().await {
            handle.shutdown().await?;
            return Err(e);
        }

        tracing::info!(version = %handle.worker.lifecycle.version(), "worker started");
        Ok(handle)
    }

    async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Event>, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => {
                        let worker = self.clone();
                        tasks.spawn(async move { worker.process(event).await });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("inbox task failed: {e}");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        inbox.close();
        while let Some(event) = inbox.recv().await {
            let worker = self.clone();
            tasks.spawn(async move { worker.process(event).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("inbox task failed: {e}");
            }
        }
        tracing::debug!("inbox drained");
    }

    async fn process(&self, event: Event) {
        match event {
            Event::Fetch { request, reply } => {
                let _ = reply.send(self.engine.handle(request).await);
            }
            Event::Control { request, reply } => {
                let _ = reply.send(self.control.dispatch(request).await);
            }
            Event::Trigger(trigger) => {
                self.coordinator.trigger(trigger).await;
            }
        }
    }

    /// Schedule sweeps on every offline -> online edge.
    async fn watch_connectivity(self: Arc<Self>, inbox: mpsc::Sender<Event>, mut shutdown: watch::Receiver<bool>) {
        let mut online = self.connectivity.subscribe();
        loop {
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online.borrow_and_update() {
                        continue;
                    }
                    let mut triggers = vec![SyncTrigger::Online];
                    triggers.extend(self.background.take_registered().into_iter().map(SyncTrigger::Reactivation));
                    for trigger in triggers {
                        if inbox.send(Event::Trigger(trigger)).await.is_err() {
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    worker: Arc<Worker>,
    inbox: mpsc::Sender<Event>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerHandle {
    /// Route a request from the page through the strategy engine.
    pub async fn fetch(&self, request: Request) -> Result<Response, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Fetch { request, reply }).await?;
        rx.await.map_err(|_| Error::WorkerStopped)?
    }

    pub async fn control(&self, request: ControlRequest) -> Result<Option<ControlReply>, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Control { request, reply }).await?;
        rx.await.map_err(|_| Error::WorkerStopped)
    }

    /// Decode and handle a raw JSON control message. Unknown messages yield no reply.
    pub async fn control_raw(&self, raw: &str) -> Result<Option<ControlReply>, Error> {
        match control::decode(raw) {
            Some(request) => self.control(request).await,
            None => Ok(None),
        }
    }

    pub async fn trigger(&self, trigger: SyncTrigger) -> Result<(), Error> {
        self.send(Event::Trigger(trigger)).await
    }

    /// Open a page session. Pages opened after activation start out controlled.
    pub async fn connect(&self) -> ClientSession {
        let controller = match self.worker.lifecycle.state().await {
            LifecycleState::Activated => Some(self.worker.lifecycle.version().to_string()),
            _ => None,
        };
        self.worker.clients.connect(controller)
    }

    pub async fn install_and_activate(&self) -> Result<(InstallReport, Option<ActivateReport>), Error> {
        self.worker.lifecycle.start().await
    }

    pub fn queue(&self) -> &QueueDb {
        &self.worker.queue
    }

    pub fn cache(&self) -> &CacheDb {
        &self.worker.cache
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.worker.connectivity
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.worker.clients
    }

    /// Stop accepting events, finish in-flight work and close both stores.
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.shutdown.send_replace(true) {
            return Ok(());
        }
        tracing::info!("worker shutting down");

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("worker task failed: {e}");
            }
        }

        self.worker.cache.clone().close().await?;
        self.worker.queue.clone().close().await?;
        tracing::info!("worker stopped");
        Ok(())
    }

    async fn send(&self, event: Event) -> Result<(), Error> {
        if *self.shutdown.borrow() {
            return Err(Error::WorkerStopped);
        }
        self.inbox.send(event).await.map_err(|_| Error::WorkerStopped)
    }

    /// Entries left over from a previous run get a reactivation of their own.
    async fn resume_pending(&self) -> Result<(), Error> {
        let pending = self.worker.queue.list_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        let tag = self.worker.config.sync_tag.clone();
        tracing::info!(pending = pending.len(), %tag, "resuming queued captures");
        self.trigger(SyncTrigger::Reactivation(tag)).await
    }
}
