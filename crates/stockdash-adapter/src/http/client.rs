/*
[INPUT]:  HTTP configuration (base URL, timeouts)
[OUTPUT]: Configured reqwest client ready for API calls
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing client behavior
*/

use crate::http::{AdapterError, Result};
use crate::types::ApiEnvelope;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default backend address used when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for the analysis dashboard backend
#[derive(Debug, Clone)]
pub struct DashboardClient {
    http_client: Client,
    base_url: Url,
}

impl DashboardClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::with_config_and_base_url(config, DEFAULT_BASE_URL)
    }

    /// Create a new client against a specific backend
    pub fn with_config_and_base_url(config: ClientConfig, base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build full URL for an endpoint
    fn url(&self, endpoint: &str) -> std::result::Result<Url, url::ParseError> {
        self.base_url.join(endpoint)
    }

    /// Build request builder for a path whose segments may carry caller input
    pub(crate) fn request_segments(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let url = segment_url(&self.base_url, segments)?;
        Ok(self.http_client.request(method, url))
    }

    /// Build request builder for an endpoint
    pub(crate) fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.url(endpoint)?;
        Ok(self.http_client.request(method, url))
    }

    /// Send a request and unwrap the `{code, message, data}` envelope.
    pub(crate) async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().clone();
        let body = response.text().await?;
        debug!(%url, status = status.as_u16(), bytes = body.len(), "http response");

        if !status.is_success() {
            return Err(error_for_status(status, url.path(), &body));
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)?;
        if !envelope.is_success() {
            return Err(AdapterError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }

        envelope.data.ok_or_else(|| {
            AdapterError::InvalidResponse(format!("missing data field in response from {}", url.path()))
        })
    }
}

/// `base` with its path replaced by `segments`, each percent-encoded as a single segment.
pub(crate) fn segment_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| AdapterError::Config(format!("{base} cannot carry a path")))?
        .clear()
        .extend(segments);
    Ok(url)
}

fn error_for_status(status: StatusCode, path: &str, body: &str) -> AdapterError {
    match status {
        StatusCode::NOT_FOUND => AdapterError::NotFound(path.to_string()),
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
            AdapterError::NotSupported {
                endpoint: path.to_string(),
            }
        }
        _ => AdapterError::api_error(status, extract_message(body).unwrap_or_else(|| body.to_string())),
    }
}

/// Pull a human-readable message out of an error body (`detail` or `message`).
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .or_else(|| value.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
