//! Network seam and the reqwest-backed implementation.
//!
//! ### Contract
//! - `Ok(response)` whenever the server answered, whatever the status.
//!   A non-2xx answer is a server rejection, not a transport failure.
//! - `Err(Error::Network | Error::Timeout)` when no response arrived.
//!
//! ### Safety Gates
//! - Per-attempt timeout (default 20s) so a stalled endpoint cannot pin a sweep
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)

pub mod url;

use std::time::{Duration, Instant};

use bytes::Bytes;
use capsync_core::{AppConfig, Error};
use reqwest::{Client, header};

use crate::http::{Request, Response, ResponseSource};

pub use self::url::{UrlError, is_http, resolve, same_origin};

/// Anything that can deliver a request and report what came back.
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    /// Send a request, returning any response the server produced.
    async fn send(&self, request: &Request) -> Result<Response, Error>;
}

/// Configuration for the HTTP network.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "capsync/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Per-attempt timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "capsync/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// HTTP network backed by reqwest.
pub struct HttpNetwork {
    http: Client,
    config: FetchConfig,
}

impl HttpNetwork {
    /// Create a new network client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(format!("no response within {}ms", self.config.timeout.as_millis()))
        } else {
            Error::Network(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl Network for HttpNetwork {
    async fn send(&self, request: &Request) -> Result<Response, Error> {
        if !is_http(&request.url) {
            return Err(Error::InvalidUrl(format!("unsupported scheme: {}", request.url.scheme())));
        }

        let start = Instant::now();
        let mut builder = self.http.request(request.method.clone(), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::TooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| name.as_str() != header::SET_COOKIE.as_str())
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        let bytes: Bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::TooLarge(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        tracing::debug!(
            "{} {} -> {} in {}ms ({} bytes)",
            request.method,
            request.url,
            status.as_u16(),
            start.elapsed().as_millis(),
            bytes.len()
        );

        Ok(Response { status, headers, body: bytes, source: ResponseSource::Network })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP reply on a loopback port and return the URL to hit.
    async fn serve_once(reply: String) -> ::url::Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        ::url::Url::parse(&format!("http://{addr}/api/notes")).unwrap()
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "capsync/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { timeout_ms: 1500, user_agent: "test-agent".into(), ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.user_agent, "test-agent");
    }

    #[tokio::test]
    async fn test_http_network_new() {
        let network = HttpNetwork::new(FetchConfig::default());
        assert!(network.is_ok());
    }

    #[tokio::test]
    async fn test_non_http_scheme_is_rejected_without_io() {
        let network = HttpNetwork::new(FetchConfig::default()).unwrap();
        let request = Request::get(::url::Url::parse("chrome-extension://abc/popup.html").unwrap());

        let result = network.send(&request).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let config = FetchConfig { timeout: Duration::from_millis(500), ..Default::default() };
        let network = HttpNetwork::new(config).unwrap();
        // Port 9 (discard) on loopback is expected to refuse connections.
        let request = Request::get(::url::Url::parse("http://127.0.0.1:9/api/notes").unwrap());

        let err = network.send(&request).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_a_response() {
        let url = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\n\
             Content-Type: text/plain\r\n\
             Set-Cookie: session=abc\r\n\
             Content-Length: 4\r\n\
             Connection: close\r\n\r\n\
             boom"
                .to_string(),
        )
        .await;
        let network = HttpNetwork::new(FetchConfig::default()).unwrap();

        let response = network.send(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.is_success());
        assert_eq!(response.text(), "boom");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("set-cookie"), None);
        assert_eq!(response.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let body = "x".repeat(64);
        let url = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ))
        .await;
        let network = HttpNetwork::new(FetchConfig { max_bytes: 16, ..Default::default() }).unwrap();

        let err = network.send(&Request::get(url)).await.unwrap_err();

        assert!(matches!(err, Error::TooLarge(_)));
        assert!(!err.is_transient());
    }
}
