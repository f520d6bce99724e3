//! CSV export of fetched posts.
//!
//! Columns: `id, created_at, url, is_retruth, retruth_of, content_text, content_html`.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Months, Utc};

use crate::ingest::config::PollerConfig;
use crate::ingest::fetcher::fetch_pages;
use crate::ingest::html_to_text;
use crate::ingest::identity::canonical_id;
use crate::ingest::types::{format_instant, FetchedPost, PageTransport, Sleeper};

pub const HEADER: [&str; 7] = [
    "id",
    "created_at",
    "url",
    "is_retruth",
    "retruth_of",
    "content_text",
    "content_html",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub is_retruth: bool,
    pub retruth_of: String,
    pub content_text: String,
    pub content_html: String,
}

impl ExportRow {
    pub fn from_record(r: &FetchedPost) -> Self {
        let html = r.content.clone().unwrap_or_default();
        Self {
            id: canonical_id(Some(r.id.as_str()), r.url.as_deref(), r.uri.as_deref())
                .unwrap_or_else(|| r.id.clone()),
            created_at: r.timestamp,
            url: r.url.clone().or_else(|| r.uri.clone()).unwrap_or_default(),
            is_retruth: r.is_reblog,
            retruth_of: r.reblog_of.clone().unwrap_or_default(),
            content_text: html_to_text(&html),
            content_html: html,
        }
    }

    fn fields(&self) -> [String; 7] {
        [
            self.id.clone(),
            format_instant(self.created_at),
            self.url.clone(),
            self.is_retruth.to_string(),
            self.retruth_of.clone(),
            self.content_text.clone(),
            self.content_html.clone(),
        ]
    }
}

/// Quote a field when it contains a delimiter, quote or line break.
pub fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut out = HEADER.join(",");
    out.push('\n');
    for row in rows {
        let line: Vec<String> = row.fields().iter().map(|f| escape_csv(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// `now` minus `months` calendar months. Zero months is rejected.
pub fn month_cutoff(now: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>> {
    if months == 0 {
        bail!("month count must be at least 1");
    }
    now.checked_sub_months(Months::new(months))
        .with_context(|| format!("month count {months} reaches before the representable range"))
}

/// Keep records at or after `cutoff`, one per identity, ascending by time.
pub fn rows_in_range(records: &[FetchedPost], cutoff: DateTime<Utc>) -> Vec<ExportRow> {
    let mut seen = HashSet::new();
    let mut rows: Vec<ExportRow> = records
        .iter()
        .filter(|r| r.timestamp >= cutoff)
        .map(ExportRow::from_record)
        .filter(|row| seen.insert(row.id.clone()))
        .collect();
    rows.sort_by_key(|r| r.created_at);
    rows
}

/// Fetch everything back to `cutoff` and build the export rows.
pub async fn collect_rows(
    transport: &dyn PageTransport,
    sleeper: &dyn Sleeper,
    cfg: &PollerConfig,
    cutoff: DateTime<Utc>,
    max_pages: u32,
) -> Result<Vec<ExportRow>> {
    let mut plan = cfg.fetch_plan(cutoff);
    plan.max_pages = max_pages.max(1);
    let records = fetch_pages(transport, sleeper, &plan)
        .await
        .context("fetching posts for export")?;
    Ok(rows_in_range(&records, cutoff))
}
