//! HTTP transport to vendor endpoints.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Serialize;

use crate::error::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BODY_MAX_LEN: usize = 500;

/// Settings for the shared HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall request timeout. Streaming responses hold the connection
    /// open, so this bounds the whole stream, not just the headers.
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Option<Duration>,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub use_env_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            pool_max_idle_per_host: 8,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            use_env_proxy: false,
        }
    }
}

/// Thin wrapper around a shared `reqwest::Client`, configured once and
/// reused for every vendor request.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the TLS backend fails to initialize.
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_nodelay(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout);
        if !config.use_env_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|err| Error::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    /// POST a JSON body and return the raw streaming response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on connection failure and
    /// [`Error::Upstream`] when the endpoint answers with a non-success
    /// status, with the vendor's error message extracted from the body.
    pub async fn post_stream<B: Serialize + ?Sized>(
        &self,
        url: &url::Url,
        headers: HeaderMap,
        body: &B,
    ) -> Result<reqwest::Response, Error> {
        let response = self
            .client
            .post(url.clone())
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body_bytes = response.bytes().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "vendor request rejected");
        Err(Error::Upstream {
            status: Some(status.as_u16()),
            message: extract_error_message(&body_bytes),
        })
    }
}

/// Pull a human-readable message out of a vendor error body. Both dialects
/// wrap it as `{"error": {"message": "..."}}`; anything else is passed
/// through truncated.
fn extract_error_message(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(message) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return truncate(message);
        }
    }
    truncate(&String::from_utf8_lossy(body))
}

fn truncate(message: &str) -> String {
    if message.len() > ERROR_BODY_MAX_LEN {
        let mut end = ERROR_BODY_MAX_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &message[..end])
    } else {
        message.to_owned()
    }
}
