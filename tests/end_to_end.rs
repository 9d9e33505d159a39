//! End-to-end tests: navigation context, fetch client, disk cache and export
//! against a mock OpenF1 server.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use pitwall::cache::{CacheManager, CacheStore};
use pitwall::data::{FetchClient, HttpTransport, RetryPolicy, Sleeper};
use pitwall::export::{export, ExportError, ExportFormat, ExportRequest};
use pitwall::navigation::{Level, NavigationContext};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LAPS: &str = r#"[
    {"driver_number": 44, "lap_number": 1, "lap_duration": 98.2, "segments_sector_1": [2049, 2051]},
    {"driver_number": 44, "lap_number": 2, "lap_duration": 96.7, "segments_sector_1": [2049]},
    {"driver_number": 44, "lap_number": 3, "lap_duration": null, "segments_sector_1": []}
]"#;

fn no_wait() -> Sleeper {
    Arc::new(|_: Duration| futures::future::ready(()).boxed())
}

fn client(server: &MockServer, cache_dir: &TempDir) -> FetchClient<HttpTransport> {
    let transport = HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap();
    let store = CacheManager::with_dir(cache_dir.path().to_path_buf());
    FetchClient::new(transport, Box::new(store))
        .with_retry_policy(RetryPolicy::default())
        .with_sleeper(no_wait())
}

fn driver_context() -> NavigationContext {
    let mut context = NavigationContext::new();
    context.push(Level::Year, 2024).unwrap();
    context.push(Level::Meeting, 1229).unwrap();
    context.push(Level::Session, 9636).unwrap();
    context.push(Level::Driver, 44).unwrap();
    context
}

#[tokio::test]
async fn test_laps_csv_export_uses_context_and_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/laps"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LAPS))
        .expect(1)
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let mut client = client(&server, &cache_dir);
    let context = driver_context();
    let request = ExportRequest::new("laps", ExportFormat::Csv).output_dir(out_dir.path());

    let first = export(&mut client, &context, &request).await.unwrap();
    let second = export(&mut client, &context, &request).await.unwrap();

    // Only the keys the laps endpoint filters on are sent
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let mut query: Vec<(String, String)> = received[0]
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    query.sort();
    assert_eq!(
        query,
        vec![
            ("driver_number".to_string(), "44".to_string()),
            ("session_key".to_string(), "9636".to_string()),
        ]
    );

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.records, 3);

    let content = std::fs::read_to_string(&first.path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4, "header plus one row per lap");
    assert_eq!(lines[0], "driver_number,lap_number,lap_duration,segments_sector_1");
    assert_eq!(lines[1], "44,1,98.2,\"2049, 2051\"");
    assert_eq!(lines[3], "44,3,,");

    assert_eq!(client.store().stats().total_entries, 1);
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stints"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stints"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"stint_number": 1, "compound": "SOFT"}]"#))
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let mut client = client(&server, &cache_dir);
    let params = [("session_key".to_string(), "9636".to_string())].into_iter().collect();

    let fetched = client.fetch("stints", &params, false).await.unwrap();

    assert_eq!(fetched.rate_limited, 2);
    assert!(!fetched.from_cache);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_persistent_rate_limit_fails_export_without_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/position"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let mut client = client(&server, &cache_dir);
    let request = ExportRequest::new("position", ExportFormat::Json).output_dir(out_dir.path());

    let err = export(&mut client, &driver_context(), &request).await.unwrap_err();

    assert!(matches!(err, ExportError::Fetch { .. }));
    assert!(err.is_rate_limited());
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
    assert_eq!(client.store().stats().total_entries, 0);
}

#[tokio::test]
async fn test_cache_survives_new_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/meetings"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"meeting_key": 1229, "meeting_name": "Bahrain Grand Prix"}]"#))
        .expect(1)
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let params = [("year".to_string(), "2024".to_string())].into_iter().collect();

    let first = client(&server, &cache_dir).fetch("meetings", &params, false).await.unwrap();
    let second = client(&server, &cache_dir).fetch("meetings", &params, false).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.value, second.value);
}

#[tokio::test]
async fn test_refresh_bypasses_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drivers"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"driver_number": 44}]"#))
        .expect(2)
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let mut client = client(&server, &cache_dir);
    let params = [("session_key".to_string(), "9636".to_string())].into_iter().collect();

    client.fetch("drivers", &params, false).await.unwrap();
    let refreshed = client.fetch("drivers", &params, true).await.unwrap();

    assert!(!refreshed.from_cache);
}
