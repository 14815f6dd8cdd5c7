//! Per-route request handling.
//!
//! The engine never surfaces a raw network failure to the page. Reads fall
//! back to the cache and then to a structured offline response; captures
//! fall back to the durable queue and answer with a queued acknowledgment.

use std::sync::Arc;

use capsync_client::fetch::resolve;
use capsync_client::{Network, Request, Response, Route, Router, StatusCode, Url};
use capsync_core::{AppConfig, CacheDb, Error, NewQueueEntry, QueueDb};
use chrono::Utc;
use serde_json::json;

use crate::connectivity::Connectivity;
use crate::sync::BackgroundSync;

/// Applies the caching and queueing policy for each route.
#[derive(Clone)]
pub struct StrategyEngine {
    cache: CacheDb,
    queue: QueueDb,
    network: Arc<dyn Network>,
    router: Router,
    generation: String,
    shell_url: Url,
    sync_tag: String,
    background: BackgroundSync,
    connectivity: Connectivity,
}

impl StrategyEngine {
    pub fn new(
        config: &AppConfig, cache: CacheDb, queue: QueueDb, network: Arc<dyn Network>, background: BackgroundSync,
        connectivity: Connectivity,
    ) -> Result<Self, Error> {
        let router = Router::from_config(config)?;
        let shell_url = resolve(router.origin(), &config.shell_url)
            .map_err(|e| Error::InvalidUrl(format!("shell_url {}: {e}", config.shell_url)))?;

        Ok(Self {
            cache,
            queue,
            network,
            router,
            generation: config.cache_version.clone(),
            shell_url,
            sync_tag: config.sync_tag.clone(),
            background,
            connectivity,
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Route a request and apply its strategy.
    pub async fn handle(&self, request: Request) -> Result<Response, Error> {
        let route = self.router.classify(&request);
        tracing::debug!(method = %request.method, url = %request.url, ?route, "handling request");

        match route {
            Route::Passthrough => self.network.send(&request).await,
            Route::MutatingCapture => Ok(self.capture(request).await),
            Route::ApiRead => Ok(self.network_first(request, false).await),
            Route::StaticAsset => Ok(self.cache_first(request).await),
            Route::Other => Ok(self.network_first(request, true).await),
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        let result = self.network.send(request).await;
        match &result {
            Ok(_) => {
                self.connectivity.record(true);
            }
            Err(e) if e.is_transient() => {
                self.connectivity.record(false);
            }
            Err(_) => {}
        }
        result
    }

    async fn capture(&self, request: Request) -> Response {
        let err = match self.fetch(&request).await {
            Ok(response) => return response,
            Err(e) => e,
        };
        if !err.is_transient() {
            // The server may already hold this mutation; replaying it would duplicate it.
            tracing::warn!(
                method = %request.method,
                url = %request.url,
                "capture answer unusable, not queueing: {err}"
            );
            return Response::json(
                StatusCode::BAD_GATEWAY,
                &json!({
                    "queued": false,
                    "error": "upstream_error",
                    "message": err.to_string(),
                }),
            );
        }
        tracing::info!(method = %request.method, url = %request.url, "capture failed, queueing: {err}");

        let entry = NewQueueEntry {
            url: request.url.to_string(),
            method: request.method.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone().unwrap_or_default(),
            created_at: Utc::now(),
        };

        match self.queue.add(&entry).await {
            Ok(id) => {
                self.background.register(&self.sync_tag);
                Response::json(
                    StatusCode::ACCEPTED,
                    &json!({
                        "queued": true,
                        "id": id,
                        "message": "Saved offline. It will be sent when the connection returns.",
                    }),
                )
            }
            Err(e) => {
                tracing::error!(url = %request.url, "capture could not be queued: {e}");
                Response::json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({
                        "queued": false,
                        "error": "queue_failed",
                        "message": e.to_string(),
                    }),
                )
            }
        }
    }

    /// Network first, then the cache, then (for navigations) the shell.
    async fn network_first(&self, request: Request, shell_fallback: bool) -> Response {
        match self.fetch(&request).await {
            Ok(response) => {
                if request.is_read() && response.is_success() {
                    self.store(&request, &response).await;
                }
                return response;
            }
            Err(e) => tracing::debug!(url = %request.url, "network unavailable: {e}"),
        }

        if request.is_read()
            && let Some(cached) = self.cached(&request).await
        {
            return cached;
        }
        if shell_fallback && let Some(shell) = self.shell_for(&request).await {
            return shell;
        }
        offline()
    }

    /// Cached copy immediately with a background refresh, or fetch and cache.
    async fn cache_first(&self, request: Request) -> Response {
        if request.is_read()
            && let Some(cached) = self.cached(&request).await
        {
            self.spawn_revalidation(request);
            return cached;
        }

        match self.fetch(&request).await {
            Ok(response) => {
                if request.is_read() && response.is_success() {
                    self.store(&request, &response).await;
                }
                response
            }
            Err(e) => {
                tracing::debug!(url = %request.url, "static asset unavailable: {e}");
                self.shell_for(&request).await.unwrap_or_else(offline)
            }
        }
    }

    fn spawn_revalidation(&self, request: Request) {
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.fetch(&request).await {
                Ok(response) if response.is_success() => engine.store(&request, &response).await,
                Ok(response) => {
                    tracing::warn!(url = %request.url, status = response.status.as_u16(), "revalidation rejected")
                }
                Err(e) => tracing::warn!(url = %request.url, "revalidation failed: {e}"),
            }
        });
    }

    async fn cached(&self, request: &Request) -> Option<Response> {
        let entry = match self.cache.lookup(&self.generation, &request.cache_key()).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(url = %request.url, "cache lookup failed: {e}");
                return None;
            }
        };
        match Response::from_cached(entry) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(url = %request.url, "cached entry unreadable: {e}");
                None
            }
        }
    }

    async fn store(&self, request: &Request, response: &Response) {
        let result = match response.to_cached(&self.generation, request) {
            Ok(entry) => self.cache.put(&entry).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(url = %request.url, "cache write failed: {e}");
        }
    }

    async fn shell_for(&self, request: &Request) -> Option<Response> {
        if !request.is_navigation() {
            return None;
        }
        self.cached(&Request::get(self.shell_url.clone())).await
    }
}

/// Structured stand-in for a read that could not be served.
fn offline() -> Response {
    Response::json(
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({
            "error": "offline",
            "message": "You are offline and no cached copy is available.",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNetwork, test_config, url};
    use capsync_client::{Method, ResponseSource};
    use capsync_core::QueueStatus;
    use std::time::Duration;

    struct Fixture {
        cache: CacheDb,
        queue: QueueDb,
        network: Arc<FakeNetwork>,
        background: BackgroundSync,
        connectivity: Connectivity,
        engine: StrategyEngine,
    }

    async fn fixture(network: Arc<FakeNetwork>) -> Fixture {
        let cache = CacheDb::open_in_memory().await.unwrap();
        let queue = QueueDb::open_in_memory().await.unwrap();
        let background = BackgroundSync::default();
        let connectivity = Connectivity::new(true);
        let engine = StrategyEngine::new(
            &test_config(),
            cache.clone(),
            queue.clone(),
            network.clone(),
            background.clone(),
            connectivity.clone(),
        )
        .unwrap();
        Fixture { cache, queue, network, background, connectivity, engine }
    }

    async fn seed(f: &Fixture, path: &str, body: &str) {
        let request = Request::get(url(path));
        let response = Response {
            status: StatusCode::OK,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: body.to_string().into(),
            source: ResponseSource::Network,
        };
        f.cache.put(&response.to_cached("v1", &request).unwrap()).await.unwrap();
    }

    fn capture_request(path: &str) -> Request {
        Request::new(Method::POST, url(path))
            .with_header("content-type", "application/json")
            .with_body(r#"{"title":"call mom"}"#)
    }

    #[tokio::test]
    async fn test_offline_capture_is_queued() {
        let f = fixture(FakeNetwork::offline()).await;

        let response = f.engine.handle(capture_request("/api/tasks")).await.unwrap();

        assert_eq!(response.status, StatusCode::ACCEPTED);
        let body = response.body_json().unwrap();
        assert_eq!(body["queued"], true);
        let id = body["id"].as_i64().unwrap();

        let entry = f.queue.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.url, "http://localhost:8000/api/tasks");
        assert_eq!(entry.body, r#"{"title":"call mom"}"#);
        assert!(f.background.is_registered("sync-captures"));
        assert!(!f.connectivity.is_online());
    }

    #[tokio::test]
    async fn test_online_capture_returns_live_response() {
        let network = FakeNetwork::online();
        network.respond("/api/tasks", StatusCode::CREATED, r#"{"id":42}"#);
        let f = fixture(network).await;

        let response = f.engine.handle(capture_request("/api/tasks")).await.unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(f.queue.aggregate_stats().await.unwrap().total, 0);
        assert!(!f.background.is_registered("sync-captures"));
    }

    #[tokio::test]
    async fn test_server_rejection_of_capture_is_not_queued() {
        let network = FakeNetwork::online();
        network.respond("/api/notes", StatusCode::BAD_REQUEST, "bad");
        let f = fixture(network).await;

        let response = f.engine.handle(capture_request("/api/notes")).await.unwrap();

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(f.queue.aggregate_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_unreadable_capture_answer_is_not_queued() {
        let network = FakeNetwork::online();
        network.oversize("/api/notes");
        let f = fixture(network).await;

        let response = f.engine.handle(capture_request("/api/notes")).await.unwrap();

        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        let body = response.body_json().unwrap();
        assert_eq!(body["queued"], false);
        assert_eq!(body["error"], "upstream_error");
        assert_eq!(f.queue.aggregate_stats().await.unwrap().total, 0);
        assert!(!f.background.is_registered("sync-captures"));
        assert_eq!(f.network.sent_to("/api/notes"), 1);
    }

    #[tokio::test]
    async fn test_queue_failure_is_reported() {
        let f = fixture(FakeNetwork::offline()).await;
        f.queue.clone().close().await.unwrap();

        let response = f.engine.handle(capture_request("/api/ideas")).await.unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.body_json().unwrap();
        assert_eq!(body["queued"], false);
        assert_eq!(body["error"], "queue_failed");
        assert!(!f.background.is_registered("sync-captures"));
    }

    #[tokio::test]
    async fn test_api_read_writes_through_and_falls_back() {
        let f = fixture(FakeNetwork::online()).await;

        let live = f.engine.handle(Request::get(url("/api/notes"))).await.unwrap();
        assert_eq!(live.text(), "live:/api/notes");

        f.network.set_online(false);
        let cached = f.engine.handle(Request::get(url("/api/notes"))).await.unwrap();
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.text(), "live:/api/notes");
    }

    #[tokio::test]
    async fn test_api_read_without_cache_is_structured_offline() {
        let f = fixture(FakeNetwork::offline()).await;

        let response = f.engine.handle(Request::get(url("/api/notes"))).await.unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.header("content-type"), Some("application/json"));
        let body = response.body_json().unwrap();
        assert_eq!(body["error"], "offline");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_failed_api_read_is_not_cached() {
        let network = FakeNetwork::online();
        network.respond("/api/notes", StatusCode::NOT_FOUND, "missing");
        let f = fixture(network).await;

        let response = f.engine.handle(Request::get(url("/api/notes"))).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(f.cache.count("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cached_static_asset_does_not_wait_for_network() {
        let network = FakeNetwork::online();
        network.set_delay(Duration::from_secs(5));
        let f = fixture(network).await;
        seed(&f, "/static/js/main.js", "cached-js").await;

        let response = tokio::time::timeout(
            Duration::from_millis(500),
            f.engine.handle(Request::get(url("/static/js/main.js"))),
        )
        .await
        .expect("cache hit must not wait on the network")
        .unwrap();

        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.text(), "cached-js");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.network.sent_to("/static/js/main.js"), 1);
    }

    #[tokio::test]
    async fn test_revalidation_refreshes_cache() {
        let f = fixture(FakeNetwork::online()).await;
        seed(&f, "/static/css/main.css", "old").await;

        f.engine.handle(Request::get(url("/static/css/main.css"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let refreshed = f.engine.handle(Request::get(url("/static/css/main.css"))).await.unwrap();
        assert_eq!(refreshed.text(), "live:/static/css/main.css");
    }

    #[tokio::test]
    async fn test_static_miss_fetches_and_caches() {
        let f = fixture(FakeNetwork::online()).await;

        let response = f.engine.handle(Request::get(url("/static/logo.png"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(f.cache.count("v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_navigation_gets_shell() {
        let f = fixture(FakeNetwork::offline()).await;
        seed(&f, "/index.html", "<html>shell</html>").await;

        let response = f.engine.handle(Request::navigate(url("/boards/today"))).await.unwrap();
        assert_eq!(response.text(), "<html>shell</html>");

        let asset = f.engine.handle(Request::get(url("/static/missing.js"))).await.unwrap();
        assert_eq!(asset.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_other_route_prefers_own_cache_over_shell() {
        let f = fixture(FakeNetwork::online()).await;
        seed(&f, "/index.html", "<html>shell</html>").await;

        f.engine.handle(Request::navigate(url("/settings"))).await.unwrap();
        f.network.set_online(false);

        let response = f.engine.handle(Request::navigate(url("/settings"))).await.unwrap();
        assert_eq!(response.text(), "live:/settings");
    }

    #[tokio::test]
    async fn test_passthrough_surfaces_network_errors() {
        let f = fixture(FakeNetwork::offline()).await;

        let result = f.engine.handle(Request::get(Url::parse("https://cdn.example.com/lib.js").unwrap())).await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(f.cache.count("v1").await.unwrap(), 0);
    }
}
