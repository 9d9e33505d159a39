//! Cache-aware fetch client with bounded retries
//!
//! Every data view and export resolves through `FetchClient::fetch`: the cache
//! is consulted first, then the API is called with exponential backoff on
//! transient failures. Successful responses are written back to the cache with
//! the endpoint's TTL; failed ones never touch it.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::transport::{RawResponse, Transport, TransportError};
use crate::cache::{ttl_for, CacheKey, CacheStore, Params};

/// Longest response excerpt kept in a client error
const BODY_EXCERPT_LEN: usize = 200;

/// Why a request may succeed if tried again
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransientReason {
    #[error("request timed out")]
    Timeout,

    /// HTTP 429 from the API
    #[error("rate limited by the API, wait before retrying")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error (HTTP {0})")]
    ServerError(u16),

    #[error("connection failed: {0}")]
    Connection(String),
}

/// Why a request will not succeed as issued
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermanentReason {
    /// 4xx other than 429 (and any other non-success status)
    #[error("HTTP {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors that can occur when fetching API data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Every attempt failed with a retryable error
    #[error("fetching {endpoint} failed after {attempts} attempts: {reason}")]
    Transient {
        endpoint: String,
        attempts: u32,
        reason: TransientReason,
    },

    /// The request failed in a way retrying cannot fix
    #[error("fetching {endpoint} failed: {reason}")]
    Permanent {
        endpoint: String,
        reason: PermanentReason,
    },
}

impl FetchError {
    /// Whether the final failure was the API's rate limit
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            FetchError::Transient {
                reason: TransientReason::RateLimited { .. },
                ..
            }
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Wait requested by the API's last `Retry-After` header
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Transient {
                reason: TransientReason::RateLimited { retry_after },
                ..
            } => *retry_after,
            _ => None,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            FetchError::Transient { endpoint, .. } | FetchError::Permanent { endpoint, .. } => {
                endpoint
            }
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each further retry
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff delay, stretched to a server-requested wait but never past
    /// `max_delay`
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.delay_after(attempt);
        retry_after
            .map_or(backoff, |wait| backoff.max(wait))
            .min(self.max_delay)
    }
}

/// Async sleep used between attempts
pub type Sleeper = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Sleeper backed by the tokio timer
pub fn tokio_sleeper() -> Sleeper {
    Arc::new(|delay: Duration| tokio::time::sleep(delay).boxed())
}

/// A resolved response
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub value: Value,
    /// Served from the cache without a network call
    pub from_cache: bool,
    /// Number of 429 responses seen before success
    pub rate_limited: u32,
}

/// How one exchange should be handled
enum Attempt {
    Success(Value),
    Retry(TransientReason),
    Fail(PermanentReason),
}

/// Resolves requests through the cache and, on a miss, the API
pub struct FetchClient<T> {
    transport: T,
    store: Box<dyn CacheStore>,
    retry: RetryPolicy,
    sleeper: Sleeper,
}

impl<T> fmt::Debug for FetchClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> FetchClient<T> {
    pub fn new(transport: T, store: Box<dyn CacheStore>) -> Self {
        Self {
            transport,
            store,
            retry: RetryPolicy::default(),
            sleeper: tokio_sleeper(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches `endpoint` with `params`
    ///
    /// # Behavior
    /// - Unless `force_refresh` is set, a fresh cache entry is returned as is
    /// - Timeouts, 429 and 5xx responses are retried with exponential backoff
    ///   up to the policy's attempt limit
    /// - Other non-success statuses and unparseable bodies fail immediately
    /// - Only a successful response is written to the cache
    pub async fn fetch(
        &mut self,
        endpoint: &str,
        params: &Params,
        force_refresh: bool,
    ) -> Result<Fetched, FetchError> {
        let key = CacheKey::new(endpoint, params);

        if !force_refresh {
            if let Some(value) = self.store.get(&key) {
                info!(key = %key, "Using cached {} data", endpoint);
                return Ok(Fetched {
                    value,
                    from_cache: true,
                    rate_limited: 0,
                });
            }
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut rate_limited = 0;
        let mut last_reason = TransientReason::Timeout;

        for attempt in 1..=max_attempts {
            debug!(key = %key, attempt, "Requesting from API");

            let reason = match self.transport.get(endpoint, params).await {
                Ok(response) => match classify(response) {
                    Attempt::Success(value) => {
                        self.store_response(&key, &value);
                        return Ok(Fetched {
                            value,
                            from_cache: false,
                            rate_limited,
                        });
                    }
                    Attempt::Retry(reason) => reason,
                    Attempt::Fail(reason) => {
                        return Err(FetchError::Permanent {
                            endpoint: endpoint.to_string(),
                            reason,
                        });
                    }
                },
                Err(TransportError::Timeout) => TransientReason::Timeout,
                Err(TransportError::Connection(msg)) => TransientReason::Connection(msg),
                Err(TransportError::InvalidRequest(msg)) => {
                    return Err(FetchError::Permanent {
                        endpoint: endpoint.to_string(),
                        reason: PermanentReason::InvalidRequest(msg),
                    });
                }
            };

            if matches!(reason, TransientReason::RateLimited { .. }) {
                rate_limited += 1;
                warn!(key = %key, attempt, "Rate limit hit");
            }

            if attempt < max_attempts {
                let retry_after = match &reason {
                    TransientReason::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                let delay = self.retry.delay_with_hint(attempt, retry_after);
                warn!(
                    key = %key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Transient failure, retrying"
                );
                (self.sleeper)(delay).await;
            }
            last_reason = reason;
        }

        Err(FetchError::Transient {
            endpoint: endpoint.to_string(),
            attempts: max_attempts,
            reason: last_reason,
        })
    }

    /// A cache write failure only costs a future refetch, so it is logged
    /// and the fetched value is still returned
    fn store_response(&mut self, key: &CacheKey, value: &Value) {
        if let Err(e) = self.store.put(key, value, ttl_for(key.endpoint())) {
            warn!(key = %key, error = %e, "Failed to cache response");
        }
    }
}

/// Sorts one HTTP exchange into success, retryable or permanent failure
fn classify(response: RawResponse) -> Attempt {
    match response.status {
        200..=299 => match serde_json::from_str::<Value>(&response.body) {
            Ok(value @ (Value::Array(_) | Value::Object(_))) => Attempt::Success(value),
            Ok(other) => Attempt::Fail(PermanentReason::MalformedBody(format!(
                "expected records, got `{}`",
                excerpt(&other.to_string())
            ))),
            Err(e) => Attempt::Fail(PermanentReason::MalformedBody(e.to_string())),
        },
        408 => Attempt::Retry(TransientReason::Timeout),
        429 => Attempt::Retry(TransientReason::RateLimited {
            retry_after: response.retry_after,
        }),
        500..=599 => Attempt::Retry(TransientReason::ServerError(response.status)),
        status => Attempt::Fail(PermanentReason::ClientError {
            status,
            body: excerpt(&response.body),
        }),
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays a fixed script of outcomes
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, _endpoint: &str, _params: &Params) -> Result<RawResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more often than scripted")
        }
    }

    fn ok(body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(200, body))
    }

    fn status(code: u16) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(code, ""))
    }

    /// Sleeper that records requested delays without waiting
    fn recording_sleeper() -> (Sleeper, Arc<Mutex<Vec<Duration>>>) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let sleeper: Sleeper = Arc::new(move |delay: Duration| {
            recorded.lock().unwrap().push(delay);
            futures::future::ready(()).boxed()
        });
        (sleeper, delays)
    }

    fn client(
        script: Vec<Result<RawResponse, TransportError>>,
    ) -> (FetchClient<ScriptedTransport>, Arc<Mutex<Vec<Duration>>>) {
        let (sleeper, delays) = recording_sleeper();
        let client = FetchClient::new(ScriptedTransport::new(script), Box::new(MemoryCache::new()))
            .with_sleeper(sleeper);
        (client, delays)
    }

    fn laps_params() -> Params {
        [("session_key", "9636"), ("driver_number", "44")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn laps_key() -> CacheKey {
        CacheKey::new("laps", &laps_params())
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (mut client, _) = client(vec![ok(r#"[{"lap_number": 1}]"#)]);

        let first = client.fetch("laps", &laps_params(), false).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.value, json!([{"lap_number": 1}]));

        let second = client.fetch("laps", &laps_params(), false).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.value, first.value);
        assert_eq!(client.transport().calls(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_skips_cache_and_rewrites_entry() {
        let (mut client, _) = client(vec![ok("[1]"), ok("[2]")]);

        client.fetch("laps", &laps_params(), false).await.unwrap();
        let refreshed = client.fetch("laps", &laps_params(), true).await.unwrap();

        assert!(!refreshed.from_cache);
        assert_eq!(refreshed.value, json!([2]));
        assert_eq!(client.store().get(&laps_key()), Some(json!([2])));
        assert_eq!(client.transport().calls(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_with_non_decreasing_delays() {
        let (mut client, delays) = client(vec![status(429), status(429), status(429), ok("[{\"lap_number\": 1}]")]);

        let fetched = client.fetch("laps", &laps_params(), false).await.unwrap();

        assert_eq!(fetched.rate_limited, 3);
        assert_eq!(client.store().stats().total_entries, 1);

        let delays = delays.lock().unwrap().clone();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]), "delays: {:?}", delays);
        assert_eq!(
            delays,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_rate_limit_surfaces_distinct_signal() {
        let (mut client, delays) = client(vec![status(429), status(429), status(429), status(429)]);

        let err = client.fetch("laps", &laps_params(), false).await.unwrap_err();

        assert!(err.is_transient());
        assert!(err.is_rate_limited());
        assert!(matches!(err, FetchError::Transient { attempts: 4, .. }));
        assert_eq!(delays.lock().unwrap().len(), 3);
        assert!(client.store().get(&laps_key()).is_none());
    }

    #[tokio::test]
    async fn test_server_errors_and_timeouts_are_retried() {
        let (mut client, _) = client(vec![status(503), Err(TransportError::Timeout), ok("[]")]);

        let fetched = client.fetch("laps", &laps_params(), false).await.unwrap();

        assert_eq!(fetched.value, json!([]));
        assert_eq!(fetched.rate_limited, 0);
        assert_eq!(client.transport().calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_error_carries_last_reason() {
        let (mut client, _) = client(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            status(502),
        ]);

        let err = client.fetch("laps", &laps_params(), false).await.unwrap_err();

        assert_eq!(
            err,
            FetchError::Transient {
                endpoint: "laps".to_string(),
                attempts: 4,
                reason: TransientReason::ServerError(502),
            }
        );
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent_without_retry() {
        let (mut client, delays) = client(vec![Ok(RawResponse::new(404, "{\"detail\":\"Not Found\"}"))]);

        let err = client.fetch("lapz", &Params::new(), false).await.unwrap_err();

        assert!(matches!(
            err,
            FetchError::Permanent {
                reason: PermanentReason::ClientError { status: 404, .. },
                ..
            }
        ));
        assert_eq!(client.transport().calls(), 1);
        assert!(delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_permanent() {
        let (mut client, _) = client(vec![ok("<html>gateway</html>")]);

        let err = client.fetch("laps", &laps_params(), false).await.unwrap_err();

        assert!(matches!(
            err,
            FetchError::Permanent {
                reason: PermanentReason::MalformedBody(_),
                ..
            }
        ));
        assert_eq!(client.transport().calls(), 1);
    }

    #[tokio::test]
    async fn test_scalar_body_is_malformed() {
        let (mut client, _) = client(vec![ok("42")]);
        let err = client.fetch("laps", &laps_params(), false).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_existing_entry() {
        let (mut client, _) = client(vec![ok("[\"old\"]"), Ok(RawResponse::new(400, "bad")), status(500), status(500), status(500), status(500)]);

        client.fetch("laps", &laps_params(), false).await.unwrap();
        assert!(client.fetch("laps", &laps_params(), true).await.is_err());
        assert!(client.fetch("laps", &laps_params(), true).await.is_err());

        assert_eq!(client.store().get(&laps_key()), Some(json!(["old"])));
    }

    #[tokio::test]
    async fn test_single_attempt_policy_does_not_sleep() {
        let (client, delays) = client(vec![status(500)]);
        let mut client = client.with_retry_policy(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        });

        let err = client.fetch("laps", &laps_params(), false).await.unwrap_err();

        assert!(matches!(err, FetchError::Transient { attempts: 1, .. }));
        assert!(delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_response_uses_endpoint_ttl() {
        let (sleeper, _) = recording_sleeper();
        let mut client = FetchClient::new(ScriptedTransport::new(vec![ok("[]")]), Box::new(MemoryCache::new()))
            .with_sleeper(sleeper);

        client.fetch("position", &laps_params(), false).await.unwrap();

        let stats = client.store().stats();
        assert_eq!(stats.size_by_endpoint.get("position"), Some(&1));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3), Duration::from_secs(2));
        assert_eq!(policy.delay_after(4), Duration::from_secs(3));
        assert_eq!(policy.delay_after(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_retry_after_stretches_backoff() {
        let slow = RawResponse {
            status: 429,
            retry_after: Some(Duration::from_secs(5)),
            body: String::new(),
        };
        let endless = RawResponse {
            status: 429,
            retry_after: Some(Duration::from_secs(600)),
            body: String::new(),
        };
        let (mut client, delays) = client(vec![Ok(slow), Ok(endless), ok("[]")]);

        client.fetch("laps", &laps_params(), false).await.unwrap();

        assert_eq!(
            *delays.lock().unwrap(),
            vec![Duration::from_secs(5), Duration::from_secs(30)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_rate_limit_reports_requested_wait() {
        let limited = || {
            Ok(RawResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(20)),
                body: String::new(),
            })
        };
        let (mut client, _) = client(vec![limited(), limited(), limited(), limited()]);

        let err = client.fetch("laps", &laps_params(), false).await.unwrap_err();

        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
        assert_eq!(err.endpoint(), "laps");
    }

    #[test]
    fn test_delay_with_hint() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_hint(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_with_hint(3, Some(Duration::from_secs(1))), Duration::from_secs(4));
        assert_eq!(policy.delay_with_hint(1, Some(Duration::from_secs(90))), Duration::from_secs(30));
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(classify(RawResponse::new(429, "")), Attempt::Retry(TransientReason::RateLimited { .. })));
        assert!(matches!(classify(RawResponse::new(500, "")), Attempt::Retry(TransientReason::ServerError(500))));
        assert!(matches!(classify(RawResponse::new(408, "")), Attempt::Retry(TransientReason::Timeout)));
        assert!(matches!(classify(RawResponse::new(401, "")), Attempt::Fail(PermanentReason::ClientError { status: 401, .. })));
        assert!(matches!(classify(RawResponse::new(200, "{}")), Attempt::Success(_)));
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let long = "x".repeat(500);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), BODY_EXCERPT_LEN + 3);
    }
}
