// src/ingest/types.rs
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Canonical, persisted post. `timestamp` stays a string so that a hand-edited
/// or legacy document still loads; use [`Post::instant`] for ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Post {
    /// Parsed timestamp, `None` when unparseable (sorts as -infinity).
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.timestamp)
    }
}

/// Record produced by either decoder before canonicalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPost {
    /// Best-available raw identity (id, guid, url or uri, in decoder preference).
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
    pub uri: Option<String>,
    pub content: Option<String>,
    /// Set when the record wraps another post, even one without a usable identity.
    pub is_reblog: bool,
    /// Identity of the wrapped original when it can be derived.
    pub reblog_of: Option<String>,
}

impl FetchedPost {
    /// Canonicalize and convert; `None` when no identity can be derived.
    pub fn into_post(self) -> Option<Post> {
        let id = crate::ingest::identity::canonical_id(
            Some(self.id.as_str()),
            self.url.as_deref(),
            self.uri.as_deref(),
        )?;
        Some(Post {
            id,
            timestamp: format_instant(self.timestamp),
            url: self.url,
            uri: self.uri,
            content: self.content,
        })
    }
}

/// Loosely-typed upstream payload, one variant per wire format.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Status(serde_json::Value),
    Syndication(SyndicationItem),
}

impl RawRecord {
    /// Validating constructor: a complete intermediate record or nothing.
    pub fn validate(self) -> Option<FetchedPost> {
        match self {
            RawRecord::Status(v) => crate::ingest::providers::status_json::status_to_record(&v),
            RawRecord::Syndication(it) => crate::ingest::providers::syndication::item_to_record(it),
        }
    }
}

/// Tag-extracted fields of one `<item>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyndicationItem {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub pub_date: Option<String>,
    pub description: Option<String>,
}

/// Derived hourly activity bucket; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourlyBucket {
    pub hour: String,
    pub count: usize,
}

/// The parts of an HTTP response the fetcher cares about.
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub link: Option<String>,
    pub retry_after: Option<String>,
    pub body: String,
}

/// Issues one GET. Statuses are reported in the response, only network-level
/// failures come back as errors.
#[async_trait::async_trait]
pub trait PageTransport: Send + Sync {
    async fn get_page(&self, url: &str) -> Result<PageResponse, FetchError>;
}

/// Suspension seam for backoff and inter-page delays.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, dur: Duration);
}

pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-01T00:00:00.000Z`.
pub fn format_instant(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
