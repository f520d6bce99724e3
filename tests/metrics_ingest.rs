// tests/metrics_ingest.rs
//
// Ingest series reach the Prometheus exposition. The recorder is
// process-global, so every test in this binary shares one handle and only
// checks series presence or a lower bound.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use once_cell::sync::OnceCell;
use post_pulse::error::{FetchError, PollError, StoreError};
use post_pulse::ingest::config::PollerConfig;
use post_pulse::ingest::scheduler::{PollOutcome, PollScheduler};
use post_pulse::ingest::types::{PageResponse, PageTransport, Post, Sleeper};
use post_pulse::metrics::Metrics;
use post_pulse::store::{MemoryStore, SnapshotStore};
use tower::ServiceExt;

fn metrics() -> &'static Metrics {
    static M: OnceCell<Metrics> = OnceCell::new();
    M.get_or_init(|| Metrics::init().expect("recorder"))
}

struct Upstream(Mutex<VecDeque<PageResponse>>);

#[async_trait::async_trait]
impl PageTransport for Upstream {
    async fn get_page(&self, url: &str) -> Result<PageResponse, FetchError> {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| FetchError::transport(url, "connection refused"))
    }
}

struct NoSleep;

#[async_trait::async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _dur: Duration) {}
}

struct BrokenStore;

#[async_trait::async_trait]
impl SnapshotStore for BrokenStore {
    async fn load(&self) -> Result<Vec<Post>, StoreError> {
        Err(std::io::Error::other("disk gone").into())
    }
    async fn save(&self, _posts: &[Post]) -> Result<(), StoreError> {
        Err(std::io::Error::other("disk gone").into())
    }
}

fn throttled_then_page() -> Arc<Upstream> {
    let throttled = PageResponse {
        status: 429,
        retry_after: Some("1".into()),
        ..Default::default()
    };
    let page = PageResponse {
        status: 200,
        content_type: Some("application/json".into()),
        body: r#"[
            {"id":"1","created_at":"2024-01-01T00:00:00Z"},
            {"id":"2"}
        ]"#
        .into(),
        ..Default::default()
    };
    Arc::new(Upstream(Mutex::new(vec![throttled, page].into())))
}

fn scheduler(upstream: Arc<Upstream>, store: Arc<dyn SnapshotStore>) -> PollScheduler {
    let cfg = PollerConfig {
        source_url: "https://feed.example.com/api/v1/accounts/1/statuses".into(),
        inter_page_delay_ms: 0,
        ..PollerConfig::default()
    };
    PollScheduler::new(cfg, upstream, Arc::new(NoSleep), store)
}

/// Value of an unlabelled series, if present.
fn value(out: &str, name: &str) -> Option<f64> {
    out.lines()
        .find(|l| l.starts_with(name) && l[name.len()..].starts_with(' '))
        .and_then(|l| l.split_whitespace().last())
        .and_then(|v| v.parse().ok())
}

#[tokio::test]
async fn poll_cycle_emits_ingest_series() {
    let handle = &metrics().handle;
    let s = scheduler(throttled_then_page(), Arc::new(MemoryStore::new()));

    let now = "2024-01-01T00:10:00Z".parse().unwrap();
    let out = s.poll_at(now).await.unwrap();
    assert_eq!(out, PollOutcome::Merged { fetched: 1, total: 1 });

    let text = handle.render();
    for name in [
        "ingest_pages_total",
        "ingest_rate_limited_total",
        "ingest_items_total",
        "ingest_items_dropped_total",
        "ingest_poll_runs_total",
        "ingest_store_posts",
        "ingest_last_success_ts",
    ] {
        assert!(value(&text, name).is_some_and(|v| v >= 1.0), "missing {name}:\n{text}");
    }
    assert!(text.contains("ingest_parse_ms"));
}

#[tokio::test]
async fn store_failure_counts_as_poll_error() {
    let handle = &metrics().handle;
    let s = scheduler(throttled_then_page(), Arc::new(BrokenStore));

    let now = "2024-01-01T00:10:00Z".parse().unwrap();
    let err = s.poll_at(now).await.unwrap_err();
    assert!(matches!(err, PollError::Store(_)));

    let text = handle.render();
    assert!(
        value(&text, "ingest_poll_errors_total").is_some_and(|v| v >= 1.0),
        "missing poll error count:\n{text}"
    );
}

#[tokio::test]
async fn metrics_route_serves_exposition() {
    let m = metrics();
    let s = scheduler(throttled_then_page(), Arc::new(MemoryStore::new()));
    s.poll_at("2024-01-01T00:10:00Z".parse().unwrap())
        .await
        .unwrap();

    let resp = m
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("ingest_pages_total"));
    assert!(text.contains("ingest_poll_runs_total"));
}
