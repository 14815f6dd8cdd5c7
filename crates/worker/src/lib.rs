//! Offline-first capture engine.
//!
//! Sits between the page and the network: routes each request to a caching
//! strategy, queues mutating captures that cannot reach the server, and
//! replays them when connectivity returns.
//!
//! Components:
//! - [`strategy`]: network-first, cache-first and capture-queueing policies
//! - [`sync`]: sequential sweeps over the queue, one at a time
//! - [`control`]: typed request/reply protocol for the page
//! - [`lifecycle`]: shell pre-caching, generation cleanup, session takeover
//! - [`service`]: the worker service object and its inbox
//! - [`clients`], [`connectivity`]: open page sessions and online tracking

pub mod clients;
pub mod connectivity;
pub mod control;
pub mod lifecycle;
pub mod service;
pub mod strategy;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use clients::{Broadcast, ClientRegistry, ClientSession};
pub use connectivity::Connectivity;
pub use control::{ControlChannel, ControlReply, ControlRequest};
pub use lifecycle::{ActivateReport, InstallReport, Lifecycle, LifecycleState};
pub use service::{Worker, WorkerHandle};
pub use strategy::StrategyEngine;
pub use sync::{BackgroundSync, SyncCoordinator, SyncResult, SyncTrigger};
