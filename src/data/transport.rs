//! HTTP transport for the OpenF1 API
//!
//! A `Transport` issues exactly one GET and reports what came back. Retry and
//! classification live in the fetch client, so tests can swap in a scripted
//! transport.

use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::cache::Params;

/// Base URL for the OpenF1 API
pub const OPENF1_BASE_URL: &str = "https://api.openf1.org/v1";

/// Upper bound on the connect phase of a request
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Status, headers of interest and body of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, when given in seconds
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl RawResponse {
    /// Response with the given status and body and no `Retry-After`
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }
}

/// Failures below the HTTP status level
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The attempt exceeded its timeout
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or was dropped
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request itself could not be built (bad URL, bad parameters)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

/// One GET against an API endpoint
pub trait Transport {
    fn get(
        &self,
        endpoint: &str,
        params: &Params,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// Client for issuing requests to the OpenF1 API over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport for `base_url` with a per-attempt timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a transport with a custom HTTP client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint)
    }
}

impl Transport for HttpTransport {
    async fn get(&self, endpoint: &str, params: &Params) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(self.url(endpoint))
            .query(params)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}
