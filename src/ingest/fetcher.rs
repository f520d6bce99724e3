// src/ingest/fetcher.rs
//! Cursor-paginated fetch with 429 backoff.
//!
//! The walk is an explicit state machine (`Fetching`, `BackoffWaiting`, `Done`,
//! `Failed`) driven through the [`PageTransport`] and [`Sleeper`] seams so that
//! tests can script responses and observe waits without real time passing.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, LINK, RETRY_AFTER};

use crate::error::FetchError;
use crate::ingest::config::PollerConfig;
use crate::ingest::providers::{decode_page, FeedFormat};
use crate::ingest::types::{FetchedPost, PageResponse, PageTransport, Sleeper};

const ACCEPT_FEEDS: &str =
    "application/json, application/rss+xml, application/xml;q=0.9, */*;q=0.8";

/// Geometric backoff for rate-limited pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        let max = max.max(base);
        Self {
            base,
            factor,
            max,
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Wait for this 429: the larger of the current delay and the server's
    /// hint. The delay then grows by `factor`, capped at `max`.
    pub fn on_rate_limited(&mut self, retry_after: Duration) -> Duration {
        let wait = self.current.max(retry_after);
        let grown = self.current.as_secs_f64() * self.factor;
        self.current = Duration::from_secs_f64(grown.min(self.max.as_secs_f64()));
        wait
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// One fetch run: where to start and when to stop.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub start_url: String,
    pub per_page_limit: u32,
    pub max_pages: u32,
    /// Pagination stops once the oldest record seen is older than this.
    pub cutoff: DateTime<Utc>,
    pub inter_page_delay: Duration,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Fetching { url: String, page: u32 },
    BackoffWaiting { url: String, page: u32, wait: Duration },
    Done,
    Failed(FetchError),
}

/// Parse an RFC 8288 `Link` header into `rel -> target`.
pub fn parse_link_header(header: &str) -> HashMap<String, String> {
    static ENTRY: OnceCell<Regex> = OnceCell::new();
    static REL: OnceCell<Regex> = OnceCell::new();
    let entry = ENTRY.get_or_init(|| Regex::new(r"<([^>]*)>([^<]*)").unwrap());
    let rel = REL.get_or_init(|| Regex::new(r#"(?i)\brel\s*=\s*(?:"([^"]*)"|([^\s;,]+))"#).unwrap());

    let mut out = HashMap::new();
    for c in entry.captures_iter(header) {
        let target = c[1].trim().to_string();
        let params = c.get(2).map(|m| m.as_str()).unwrap_or_default();
        if let Some(r) = rel.captures(params) {
            let names = r.get(1).or_else(|| r.get(2)).map(|m| m.as_str()).unwrap_or_default();
            for name in names.split_whitespace() {
                out.entry(name.to_ascii_lowercase())
                    .or_insert_with(|| target.clone());
            }
        }
    }
    out
}

/// `Retry-After` as delta-seconds. Anything else counts as zero.
pub fn parse_retry_after(v: Option<&str>) -> Duration {
    v.and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_default()
}

/// Add `limit=<n>` unless the URL already carries one.
pub fn with_page_limit(url: &str, limit: u32) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    if limit == 0 || parsed.query_pairs().any(|(k, _)| k == "limit") {
        return url.to_string();
    }
    parsed
        .query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    parsed.to_string()
}

fn resolve(base: &str, target: &str) -> String {
    reqwest::Url::parse(base)
        .and_then(|b| b.join(target))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| target.to_string())
}

pub struct PageWalker<'a> {
    transport: &'a dyn PageTransport,
    sleeper: &'a dyn Sleeper,
    plan: &'a FetchPlan,
    backoff: Backoff,
    records: Vec<FetchedPost>,
    state: FetchState,
}

impl<'a> PageWalker<'a> {
    pub fn new(transport: &'a dyn PageTransport, sleeper: &'a dyn Sleeper, plan: &'a FetchPlan) -> Self {
        Self {
            transport,
            sleeper,
            plan,
            backoff: plan.backoff.clone(),
            records: Vec::new(),
            state: FetchState::Fetching {
                url: with_page_limit(&plan.start_url, plan.per_page_limit),
                page: 1,
            },
        }
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn records(&self) -> &[FetchedPost] {
        &self.records
    }

    /// Advance by one transition.
    pub async fn step(&mut self) {
        let state = std::mem::replace(&mut self.state, FetchState::Done);
        self.state = match state {
            FetchState::Fetching { url, page } => self.fetch_page(url, page).await,
            FetchState::BackoffWaiting { url, page, wait } => {
                self.sleeper.sleep(wait).await;
                FetchState::Fetching { url, page }
            }
            terminal => terminal,
        };
    }

    /// Drive to a terminal state. Records gathered before a failure are discarded.
    pub async fn run(mut self) -> Result<Vec<FetchedPost>, FetchError> {
        loop {
            match std::mem::replace(&mut self.state, FetchState::Done) {
                FetchState::Done => return Ok(self.records),
                FetchState::Failed(e) => return Err(e),
                live => {
                    self.state = live;
                    self.step().await;
                }
            }
        }
    }

    fn oldest(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.timestamp).min()
    }

    async fn fetch_page(&mut self, url: String, page: u32) -> FetchState {
        let resp = match self.transport.get_page(&url).await {
            Ok(r) => r,
            Err(e) => return FetchState::Failed(e),
        };

        if resp.status == 429 {
            let wait = self
                .backoff
                .on_rate_limited(parse_retry_after(resp.retry_after.as_deref()));
            counter!("ingest_rate_limited_total").increment(1);
            tracing::warn!(
                target: "ingest",
                page,
                url = %url,
                sleep_ms = wait.as_millis() as u64,
                "rate limited; backing off before retrying page"
            );
            return FetchState::BackoffWaiting { url, page, wait };
        }
        if !(200..300).contains(&resp.status) {
            return FetchState::Failed(FetchError::Status {
                url,
                status: resp.status,
            });
        }
        self.backoff.reset();
        counter!("ingest_pages_total").increment(1);

        let Some(format) = resp
            .content_type
            .as_deref()
            .and_then(FeedFormat::from_content_type)
        else {
            let msg = format!("unexpected content type {:?}", resp.content_type);
            return FetchState::Failed(FetchError::format(url, msg));
        };
        let batch = match decode_page(format, &resp.body) {
            Ok(b) => b,
            Err(e) => return FetchState::Failed(FetchError::format(url, format!("{e:#}"))),
        };

        let yielded = batch.len();
        self.records.extend(batch);
        tracing::debug!(target: "ingest", page, yielded, total = self.records.len(), "page fetched");

        if yielded == 0 {
            tracing::debug!(target: "ingest", page, "empty page; stopping");
            return FetchState::Done;
        }
        if page >= self.plan.max_pages {
            tracing::debug!(target: "ingest", page, "page cap reached");
            return FetchState::Done;
        }
        if self.oldest().is_some_and(|t| t < self.plan.cutoff) {
            tracing::debug!(target: "ingest", page, "passed recency cutoff");
            return FetchState::Done;
        }
        let next = resp
            .link
            .as_deref()
            .map(parse_link_header)
            .and_then(|mut rels| rels.remove("next"));
        let Some(next) = next else {
            return FetchState::Done;
        };

        if !self.plan.inter_page_delay.is_zero() {
            self.sleeper.sleep(self.plan.inter_page_delay).await;
        }
        FetchState::Fetching {
            url: resolve(&url, &next),
            page: page + 1,
        }
    }
}

/// Walk pages from `plan.start_url` until a stop condition; all-or-nothing.
pub async fn fetch_pages(
    transport: &dyn PageTransport,
    sleeper: &dyn Sleeper,
    plan: &FetchPlan,
) -> Result<Vec<FetchedPost>, FetchError> {
    PageWalker::new(transport, sleeper, plan).run().await
}

/// `reqwest`-backed transport with the fixed header set.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn from_config(cfg: &PollerConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_FEEDS));
        if let Some(cookie) = cfg.session_cookie.as_deref().filter(|c| !c.trim().is_empty()) {
            let v = HeaderValue::from_str(cookie.trim())
                .context("session cookie is not a valid header value")?;
            headers.insert(COOKIE, v);
        }
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl PageTransport for HttpTransport {
    async fn get_page(&self, url: &str) -> Result<PageResponse, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;
        let status = resp.status().as_u16();
        let headers = resp.headers();
        let content_type = header_string(headers, CONTENT_TYPE);
        let link = header_string(headers, LINK);
        let retry_after = header_string(headers, RETRY_AFTER);
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::transport(url, e))?;
        Ok(PageResponse {
            status,
            content_type,
            link,
            retry_after,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned responses in order and records requested URLs.
    pub struct ScriptedTransport {
        pub responses: Mutex<VecDeque<Result<PageResponse, FetchError>>>,
        pub requested: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Result<PageResponse, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl PageTransport for ScriptedTransport {
        async fn get_page(&self, url: &str) -> Result<PageResponse, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::transport(url, "script exhausted")))
        }
    }

    #[derive(Default)]
    pub struct RecordingSleeper {
        pub waits: Mutex<Vec<Duration>>,
    }

    #[async_trait::async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, dur: Duration) {
            self.waits.lock().unwrap().push(dur);
        }
    }

    pub fn json_page(body: &str, link: Option<&str>) -> Result<PageResponse, FetchError> {
        Ok(PageResponse {
            status: 200,
            content_type: Some("application/json; charset=utf-8".into()),
            link: link.map(str::to_string),
            retry_after: None,
            body: body.to_string(),
        })
    }

    pub fn status(code: u16, retry_after: Option<&str>) -> Result<PageResponse, FetchError> {
        Ok(PageResponse {
            status: code,
            retry_after: retry_after.map(str::to_string),
            ..Default::default()
        })
    }
}
