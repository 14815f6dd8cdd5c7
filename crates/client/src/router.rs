//! Request classification.
//!
//! Every request the page issues is classified exactly once, with no side
//! effects. Precedence, highest first:
//!
//! 1. Non-HTTP schemes and cross-origin URLs pass through untouched
//! 2. Mutating requests under a capture prefix
//! 3. Anything under an API prefix
//! 4. Static assets, by file extension or trailing slash
//! 5. Everything else

use capsync_core::{AppConfig, Error};
use reqwest::Method;
use url::Url;

use crate::fetch::{is_http, same_origin};
use crate::http::Request;

/// Strategy category for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Bypasses the engine entirely.
    Passthrough,
    /// Queued for later delivery if the network fails.
    MutatingCapture,
    /// Network-first with cache fallback.
    ApiRead,
    /// Cache-first with background revalidation.
    StaticAsset,
    /// Network-first with cache and shell fallback.
    Other,
}

/// Path-prefix and extension based request router.
#[derive(Debug, Clone)]
pub struct Router {
    origin: Url,
    capture_prefixes: Vec<String>,
    api_prefixes: Vec<String>,
    static_extensions: Vec<String>,
}

impl Router {
    pub fn new(
        origin: Url, capture_prefixes: Vec<String>, api_prefixes: Vec<String>, static_extensions: Vec<String>,
    ) -> Self {
        let static_extensions = static_extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self { origin, capture_prefixes, api_prefixes, static_extensions }
    }

    /// Build a router from the loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("origin: {e}")))?;
        Ok(Self::new(
            origin,
            config.capture_prefixes.clone(),
            config.api_prefixes.clone(),
            config.static_extensions.clone(),
        ))
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Classify a request into exactly one route.
    pub fn classify(&self, request: &Request) -> Route {
        let url = &request.url;
        if !is_http(url) || !same_origin(url, &self.origin) {
            return Route::Passthrough;
        }

        let path = url.path();
        if is_mutating(&request.method) && self.capture_prefixes.iter().any(|p| matches_prefix(path, p)) {
            return Route::MutatingCapture;
        }
        if self.api_prefixes.iter().any(|p| matches_prefix(path, p)) {
            return Route::ApiRead;
        }
        if self.is_static_asset(path) {
            return Route::StaticAsset;
        }
        Route::Other
    }

    fn is_static_asset(&self, path: &str) -> bool {
        if path.ends_with('/') {
            return true;
        }
        let last_segment = path.rsplit('/').next().unwrap_or(path);
        match last_segment.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.static_extensions.iter().any(|known| *known == ext)
            }
            _ => false,
        }
    }
}

fn is_mutating(method: &Method) -> bool {
    ![Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
}

/// `/api/notes` matches `/api/notes` and `/api/notes/7`, not `/api/notesx`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::from_config(&AppConfig::default()).unwrap()
    }

    fn request(method: Method, path: &str) -> Request {
        Request::new(method, Url::parse("http://localhost:8000").unwrap().join(path).unwrap())
    }

    #[test]
    fn test_capture_takes_priority_over_api() {
        let router = router();
        assert_eq!(router.classify(&request(Method::POST, "/api/notes")), Route::MutatingCapture);
        assert_eq!(router.classify(&request(Method::PUT, "/api/tasks/12")), Route::MutatingCapture);
        assert_eq!(router.classify(&request(Method::DELETE, "/api/ideas/3")), Route::MutatingCapture);
    }

    #[test]
    fn test_reads_on_capture_paths_are_api_reads() {
        let router = router();
        assert_eq!(router.classify(&request(Method::GET, "/api/notes")), Route::ApiRead);
        assert_eq!(router.classify(&request(Method::GET, "/api/calendar/events")), Route::ApiRead);
    }

    #[test]
    fn test_non_capture_mutation_is_api() {
        let router = router();
        assert_eq!(router.classify(&request(Method::POST, "/api/pipelines/run")), Route::ApiRead);
    }

    #[test]
    fn test_prefix_respects_segment_boundary() {
        let router = router();
        assert_eq!(router.classify(&request(Method::POST, "/api/notesx")), Route::ApiRead);
        assert!(matches_prefix("/api/notes", "/api/notes"));
        assert!(matches_prefix("/api/notes/1", "/api/notes"));
        assert!(!matches_prefix("/api/notesx", "/api/notes"));
        assert!(!matches_prefix("/apix", "/api/"));
    }

    #[test]
    fn test_static_assets_by_extension() {
        let router = router();
        assert_eq!(router.classify(&request(Method::GET, "/static/js/main.js")), Route::StaticAsset);
        assert_eq!(router.classify(&request(Method::GET, "/static/css/MAIN.CSS")), Route::StaticAsset);
        assert_eq!(router.classify(&request(Method::GET, "/favicon.ico")), Route::StaticAsset);
        assert_eq!(router.classify(&request(Method::GET, "/.hidden")), Route::Other);
    }

    #[test]
    fn test_static_assets_by_trailing_slash() {
        let router = router();
        assert_eq!(router.classify(&request(Method::GET, "/")), Route::StaticAsset);
        assert_eq!(router.classify(&request(Method::GET, "/boards/")), Route::StaticAsset);
    }

    #[test]
    fn test_everything_else_is_other() {
        let router = router();
        assert_eq!(router.classify(&request(Method::GET, "/index.html")), Route::Other);
        assert_eq!(router.classify(&request(Method::GET, "/board")), Route::Other);
    }

    #[test]
    fn test_non_http_and_cross_origin_pass_through() {
        let router = router();
        let extension = Request::get(Url::parse("chrome-extension://abcdef/content.js").unwrap());
        assert_eq!(router.classify(&extension), Route::Passthrough);

        let cross = Request::new(Method::POST, Url::parse("https://cdn.example.com/api/notes").unwrap());
        assert_eq!(router.classify(&cross), Route::Passthrough);
    }
}
