//! Request and response model shared by the router, strategies and sync.

use std::borrow::Cow;

use bytes::Bytes;
use capsync_core::{CachedResponse, Error, cache::compute_request_key};
use reqwest::{Method, StatusCode};
use url::Url;

/// How the page issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load; may fall back to the app shell.
    Navigate,
    #[default]
    Other,
}

/// An outbound request observed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    /// Ordered header pairs, as issued.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub mode: RequestMode,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: Vec::new(), body: None, mode: RequestMode::Other }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A document navigation (GET in navigate mode).
    pub fn navigate(url: Url) -> Self {
        Self { mode: RequestMode::Navigate, ..Self::get(url) }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Safe read methods whose responses may be cached.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Key under which this request's response is cached.
    pub fn cache_key(&self) -> String {
        compute_request_key(self.method.as_str(), self.url.as_str())
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Built locally: offline fallback or queued acknowledgment.
    Synthesized,
}

/// A response handed back to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Build a synthesized JSON response.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(value.to_string()),
            source: ResponseSource::Synthesized,
        }
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<serde_json::Value, Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Snapshot this response for the cache generation `generation`.
    pub fn to_cached(&self, generation: &str, request: &Request) -> Result<CachedResponse, Error> {
        Ok(CachedResponse {
            generation: generation.to_string(),
            key_hash: request.cache_key(),
            url: request.url.to_string(),
            method: request.method.to_string(),
            status: self.status.as_u16(),
            headers_json: serde_json::to_string(&self.headers)?,
            body: self.body.to_vec(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Rebuild a response from a cache snapshot.
    pub fn from_cached(entry: CachedResponse) -> Result<Self, Error> {
        let status = StatusCode::from_u16(entry.status)
            .map_err(|e| Error::InvalidInput(format!("cached status {}: {e}", entry.status)))?;
        let headers = entry.headers()?;
        Ok(Self { status, headers, body: Bytes::from(entry.body), source: ResponseSource::Cache })
    }
}
