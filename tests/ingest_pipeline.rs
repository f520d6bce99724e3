// tests/ingest_pipeline.rs
//
// Poll cycles end to end through the public API, with a scripted upstream
// and a sleeper that records instead of waiting.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use post_pulse::error::{FetchError, PollError};
use post_pulse::ingest::config::PollerConfig;
use post_pulse::ingest::fetcher::{fetch_pages, Backoff, FetchPlan};
use post_pulse::ingest::scheduler::{PollOutcome, PollScheduler};
use post_pulse::ingest::types::{PageResponse, PageTransport, Sleeper};
use post_pulse::store::{MemoryStore, SnapshotStore};

struct Upstream {
    pages: Mutex<VecDeque<PageResponse>>,
    hits: Mutex<Vec<String>>,
}

impl Upstream {
    fn new(pages: Vec<PageResponse>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            hits: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl PageTransport for Upstream {
    async fn get_page(&self, url: &str) -> Result<PageResponse, FetchError> {
        self.hits.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| FetchError::transport(url, "connection refused"))
    }
}

#[derive(Default)]
struct Waits(Mutex<Vec<Duration>>);

#[async_trait::async_trait]
impl Sleeper for Waits {
    async fn sleep(&self, dur: Duration) {
        self.0.lock().unwrap().push(dur);
    }
}

fn json(body: &str, next: Option<&str>) -> PageResponse {
    PageResponse {
        status: 200,
        content_type: Some("application/json".into()),
        link: next.map(|n| format!("<{n}>; rel=\"next\"")),
        retry_after: None,
        body: body.into(),
    }
}

fn throttled(retry_after: &str) -> PageResponse {
    PageResponse {
        status: 429,
        retry_after: Some(retry_after.into()),
        ..Default::default()
    }
}

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn config() -> PollerConfig {
    PollerConfig {
        source_url: "https://feed.example.com/api/v1/accounts/1/statuses".into(),
        inter_page_delay_ms: 500,
        backoff_base_ms: 1000,
        backoff_factor: 2.0,
        backoff_max_ms: 8000,
        recency_window_hours: 24,
        max_pages: 3,
        ..PollerConfig::default()
    }
}

#[tokio::test]
async fn backoff_waits_then_resets_after_success() {
    let upstream = Upstream::new(vec![
        throttled("2"),
        throttled("0"),
        json(r#"[{"id":"1","created_at":"2024-01-01T00:00:00Z"}]"#, Some("https://feed.example.com/p2")),
        throttled("0"),
        json("[]", None),
    ]);
    let waits = Waits::default();
    let plan: FetchPlan = config().fetch_plan(at("2023-12-01T00:00:00Z"));

    let out = fetch_pages(upstream.as_ref(), &waits, &plan).await.unwrap();
    assert_eq!(out.len(), 1);

    let waits = waits.0.lock().unwrap().clone();
    assert_eq!(
        waits,
        vec![
            Duration::from_millis(2000), // retry-after beats base delay
            Duration::from_millis(2000), // base * factor
            Duration::from_millis(500),  // inter-page delay
            Duration::from_millis(1000), // reset to base after success
        ]
    );
}

#[test]
fn backoff_never_exceeds_cap_on_its_own() {
    let mut b = Backoff::new(Duration::from_millis(1000), 2.0, Duration::from_millis(8000));
    let waits: Vec<_> = (0..6).map(|_| b.on_rate_limited(Duration::ZERO)).collect();
    assert_eq!(waits.last(), Some(&Duration::from_millis(8000)));
    assert!(waits.iter().all(|w| *w <= Duration::from_millis(8000)));
}

#[tokio::test]
async fn scenario_same_id_second_fetch_moves_timestamp_forward() {
    let upstream = Upstream::new(vec![
        json(
            r#"[{"id":"123","created_at":"2024-01-01T00:00:00Z","url":"https://example.com/@a/123","content":"<p>hi</p>"}]"#,
            None,
        ),
        json(r#"[{"id":"123","created_at":"2024-01-01T00:05:00Z"}]"#, None),
    ]);
    let store = Arc::new(MemoryStore::new());
    let sched = PollScheduler::new(config(), upstream, Arc::new(Waits::default()), store.clone());

    sched.poll_at(at("2024-01-01T01:00:00Z")).await.unwrap();
    let first = store.load().await.unwrap();
    assert_eq!(first[0].id, "123");
    assert_eq!(first[0].timestamp, "2024-01-01T00:00:00.000Z");

    sched.poll_at(at("2024-01-01T02:00:00Z")).await.unwrap();
    let second = store.load().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].timestamp, "2024-01-01T00:05:00.000Z");
    assert_eq!(second[0].url.as_deref(), Some("https://example.com/@a/123"));
    assert_eq!(second[0].content.as_deref(), Some("<p>hi</p>"));
}

#[tokio::test]
async fn empty_second_page_merges_only_first_page() {
    let upstream = Upstream::new(vec![
        json(
            r#"[{"id":"2","created_at":"2024-01-01T00:30:00Z"},{"id":"1","created_at":"2024-01-01T00:10:00Z"}]"#,
            Some("https://feed.example.com/p2"),
        ),
        json("[]", Some("https://feed.example.com/p3")),
    ]);
    let store = Arc::new(MemoryStore::new());
    let sched = PollScheduler::new(config(), upstream.clone(), Arc::new(Waits::default()), store.clone());

    let out = sched.poll_at(at("2024-01-01T01:00:00Z")).await.unwrap();
    assert_eq!(out, PollOutcome::Merged { fetched: 2, total: 2 });
    assert_eq!(upstream.hits.lock().unwrap().len(), 2);

    let ids: Vec<_> = store.load().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn transport_failure_skips_merge_and_next_cycle_recovers() {
    let upstream = Upstream::new(vec![]);
    let store = Arc::new(MemoryStore::with_posts(vec![post_pulse::Post {
        id: "9".into(),
        timestamp: "2024-01-01T00:00:00.000Z".into(),
        url: None,
        uri: None,
        content: None,
    }]));
    let sched = PollScheduler::new(config(), upstream, Arc::new(Waits::default()), store.clone());

    let err = sched.poll_at(at("2024-01-01T01:00:00Z")).await.unwrap_err();
    assert!(matches!(err, PollError::Fetch(FetchError::Transport { .. })));
    assert_eq!(store.save_count(), 0);
    assert_eq!(store.load().await.unwrap().len(), 1);
    assert!(sched.state().last_success.is_none());
}

#[tokio::test]
async fn non_json_body_is_format_error() {
    let upstream = Upstream::new(vec![PageResponse {
        status: 200,
        content_type: Some("text/html; charset=utf-8".into()),
        body: "<html>login</html>".into(),
        ..Default::default()
    }]);
    let store = Arc::new(MemoryStore::new());
    let sched = PollScheduler::new(config(), upstream, Arc::new(Waits::default()), store.clone());

    let err = sched.poll_at(at("2024-01-01T01:00:00Z")).await.unwrap_err();
    assert!(matches!(err, PollError::Fetch(FetchError::Format { .. })));
    assert_eq!(store.save_count(), 0);
}
