//! HTTP channel: POST for delivery, GET on a health path for probes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client as HttpClient, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{debug, error};
use url::Url;

use turbolink_traits::{
    Channel, HealthCheckResult, TransportError, TransportReply, TransportResult,
};

/// HTTP channel configuration
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpChannelConfig {
    /// Base URL (e.g., <http://localhost:3000>)
    pub base_url: String,

    /// Path probed by health checks
    pub health_path: String,

    /// Path payloads are POSTed to
    pub send_path: String,

    /// Per-request timeout
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeoutMs")]
    pub timeout: Duration,

    /// Headers added to every request
    pub headers: HashMap<String, String>,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            health_path: "/health".to_string(),
            send_path: "/api/data".to_string(),
            timeout: Duration::from_secs(5),
            headers: HashMap::new(),
        }
    }
}

impl HttpChannelConfig {
    /// Configuration for `base_url` with default paths and timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the health-check path
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Set the delivery path
    pub fn with_send_path(mut self, path: impl Into<String>) -> Self {
        self.send_path = path.into();
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// [`Channel`] over HTTP.
///
/// `connect` succeeds when the health endpoint answers 2xx; there is no
/// persistent connection to hold. `disconnect` swaps in a fresh client, which
/// drops any pooled connections.
#[derive(Debug)]
pub struct HttpChannel {
    config: HttpChannelConfig,
    health_url: Url,
    send_url: Url,
    client: RwLock<HttpClient>,
}

impl HttpChannel {
    /// Create a channel.
    ///
    /// # Errors
    ///
    /// [`TransportError::Configuration`] if the base URL or a path does not
    /// form a valid URL, a header is malformed, or the client cannot be built.
    pub fn new(config: HttpChannelConfig) -> TransportResult<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            TransportError::Configuration(format!("invalid base URL {}: {e}", config.base_url))
        })?;
        let health_url = join(&base, &config.health_path)?;
        let send_url = join(&base, &config.send_path)?;
        let client = build_client(&config)?;

        Ok(Self {
            config,
            health_url,
            send_url,
            client: RwLock::new(client),
        })
    }

    /// Channel configuration
    pub fn config(&self) -> &HttpChannelConfig {
        &self.config
    }

    fn client(&self) -> HttpClient {
        self.client.read().clone()
    }
}

fn join(base: &Url, path: &str) -> TransportResult<Url> {
    base.join(path)
        .map_err(|e| TransportError::Configuration(format!("invalid path {path}: {e}")))
}

fn build_client(config: &HttpChannelConfig) -> TransportResult<HttpClient> {
    let mut headers = header::HeaderMap::new();
    for (name, value) in &config.headers {
        let name = header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Configuration(format!("invalid header name {name}: {e}")))?;
        let value = header::HeaderValue::from_str(value)
            .map_err(|e| TransportError::Configuration(format!("invalid header value: {e}")))?;
        headers.insert(name, value);
    }

    HttpClient::builder()
        .use_rustls_tls()
        .timeout(config.timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| TransportError::Configuration(format!("failed to build HTTP client: {e}")))
}

fn map_request_error(operation: &str, timeout: Duration, err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(operation, timeout)
    } else if err.is_connect() {
        TransportError::ConnectionFailed(err.to_string())
    } else if err.is_decode() || err.is_body() {
        TransportError::Serialization(err.to_string())
    } else {
        TransportError::SendFailed(err.to_string())
    }
}

#[async_trait]
impl Channel for HttpChannel {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn connect(&self) -> TransportResult<()> {
        let health = self.health_check().await;
        if health.is_healthy {
            debug!(url = %self.health_url, "HTTP channel reachable");
            return Ok(());
        }

        let cause = health
            .error
            .map_or_else(|| "unhealthy".to_string(), |e| e.to_string());
        Err(TransportError::ConnectionFailed(format!(
            "HTTP health check failed: {cause}"
        )))
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let fresh = build_client(&self.config)?;
        *self.client.write() = fresh;
        Ok(())
    }

    async fn send(&self, payload: &Value) -> TransportResult<TransportReply> {
        debug!(url = %self.send_url, "HTTP request");

        let response = self
            .client()
            .post(self.send_url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.send_url, error = %e, "HTTP request failed");
                map_request_error("send", self.config.timeout, &e)
            })?;

        let status = response.status();
        debug!(url = %self.send_url, status = status.as_u16(), "HTTP response");

        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_request_error("send", self.config.timeout, &e))?;

        let data = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)?
        };

        Ok(TransportReply::new(status.as_u16(), data))
    }

    async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = self
            .client()
            .get(self.health_url.clone())
            .timeout(self.config.timeout)
            .send()
            .await;
        let latency = started.elapsed();

        match outcome {
            Ok(response) if response.status().is_success() => HealthCheckResult::healthy(latency),
            Ok(response) => HealthCheckResult::unhealthy(
                latency,
                TransportError::HttpStatus {
                    status: response.status().as_u16(),
                },
            ),
            Err(e) => HealthCheckResult::unhealthy(
                latency,
                map_request_error("health check", self.config.timeout, &e),
            ),
        }
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.base_url.clone())
    }
}
