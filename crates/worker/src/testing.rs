//! Scripted network for strategy, sync and lifecycle tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use capsync_client::{Network, Request, Response, ResponseSource, StatusCode, Url};
use capsync_core::{AppConfig, Error};

/// Records every request and answers from a per-path script.
#[derive(Default)]
pub(crate) struct FakeNetwork {
    offline: AtomicBool,
    routes: Mutex<HashMap<String, (StatusCode, String)>>,
    /// Paths whose answer arrives but exceeds the body limit.
    oversized: Mutex<HashSet<String>>,
    sent: Mutex<Vec<Request>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeNetwork {
    pub(crate) fn online() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn offline() -> Arc<Self> {
        let network = Self::default();
        network.offline.store(true, Ordering::SeqCst);
        Arc::new(network)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub(crate) fn respond(&self, path: &str, status: StatusCode, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub(crate) fn oversize(&self, path: &str) {
        self.oversized.lock().unwrap().insert(path.to_string());
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_to(&self, path: &str) -> usize {
        self.sent().iter().filter(|r| r.url.path() == path).count()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Network for FakeNetwork {
    async fn send(&self, request: &Request) -> Result<Response, Error> {
        self.sent.lock().unwrap().push(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".into()));
        }

        if self.oversized.lock().unwrap().contains(request.url.path()) {
            return Err(Error::TooLarge(format!("answer from {} exceeds the body limit", request.url.path())));
        }

        let scripted = self.routes.lock().unwrap().get(request.url.path()).cloned();
        let (status, body) = scripted.unwrap_or_else(|| (StatusCode::OK, format!("live:{}", request.url.path())));
        Ok(Response {
            status,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: Bytes::from(body),
            source: ResponseSource::Network,
        })
    }
}

pub(crate) fn test_config() -> AppConfig {
    AppConfig { probe_interval_ms: 0, timeout_ms: 1_000, ..Default::default() }
}

pub(crate) fn url(path: &str) -> Url {
    Url::parse("http://localhost:8000").unwrap().join(path).unwrap()
}
