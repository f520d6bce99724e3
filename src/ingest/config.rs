// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::fetcher::{Backoff, FetchPlan};

const ENV_PATH: &str = "POLLER_CONFIG_PATH";
/// Ten years; a longer lookback is not a recency window.
pub const MAX_RECENCY_WINDOW_HOURS: u32 = 24 * 366 * 10;

/// Upstream fetch and polling configuration. Every field has a default so a
/// partial file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollerConfig {
    /// JSON status API endpoint or syndication feed URL.
    pub source_url: String,
    pub session_cookie: Option<String>,
    pub user_agent: String,
    pub poll_interval_secs: u64,
    /// Minimum gap between lazy seeding attempts triggered by reads.
    pub min_seed_interval_secs: u64,
    pub recency_window_hours: u32,
    pub max_pages: u32,
    pub per_page_limit: u32,
    pub inter_page_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_max_ms: u64,
    pub request_timeout_secs: u64,
    pub store_path: PathBuf,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            source_url: "https://truthsocial.com/api/v1/accounts/107780257626128497/statuses"
                .to_string(),
            session_cookie: None,
            user_agent: concat!("post-pulse/", env!("CARGO_PKG_VERSION")).to_string(),
            poll_interval_secs: 300,
            min_seed_interval_secs: 60,
            recency_window_hours: 24,
            max_pages: 5,
            per_page_limit: 40,
            inter_page_delay_ms: 1_000,
            backoff_base_ms: 1_000,
            backoff_factor: 2.0,
            backoff_max_ms: 60_000,
            request_timeout_secs: 20,
            store_path: PathBuf::from("data/posts.json"),
        }
    }
}

impl PollerConfig {
    /// Clamp values that would stall or break the fetch loop.
    pub fn sanitized(mut self) -> Self {
        self.max_pages = self.max_pages.max(1);
        self.per_page_limit = self.per_page_limit.max(1);
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self.recency_window_hours = self.recency_window_hours.min(MAX_RECENCY_WINDOW_HOURS);
        // reqwest fails every request on a zero timeout
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            self.backoff_factor = 1.0;
        }
        self.backoff_max_ms = self.backoff_max_ms.max(self.backoff_base_ms);
        self.source_url = self.source_url.trim().to_string();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn min_seed_interval(&self) -> chrono::Duration {
        i64::try_from(self.min_seed_interval_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.recency_window_hours))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            self.backoff_factor,
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    /// Fetch plan stopping at `cutoff` (recency window or export date).
    pub fn fetch_plan(&self, cutoff: DateTime<Utc>) -> FetchPlan {
        FetchPlan {
            start_url: self.source_url.clone(),
            per_page_limit: self.per_page_limit,
            max_pages: self.max_pages,
            cutoff,
            inter_page_delay: Duration::from_millis(self.inter_page_delay_ms),
            backoff: self.backoff(),
        }
    }

    /// Apply `SOURCE_URL`, `SESSION_COOKIE`, ... overrides from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn num<T: std::str::FromStr>(name: &str) -> Option<T> {
            var(name).and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = var("SOURCE_URL") {
            self.source_url = v;
        }
        if let Some(v) = var("SESSION_COOKIE") {
            self.session_cookie = Some(v);
        }
        if let Some(v) = num("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = v;
        }
        if let Some(v) = num("RECENCY_WINDOW_HOURS") {
            self.recency_window_hours = v;
        }
        if let Some(v) = num("MAX_PAGES") {
            self.max_pages = v;
        }
        if let Some(v) = num("PER_PAGE_LIMIT") {
            self.per_page_limit = v;
        }
        if let Some(v) = var("STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        self
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<PollerConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading poller config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
}

/// Load config using env var + fallbacks, then env overrides:
/// 1) $POLLER_CONFIG_PATH
/// 2) config/poller.toml
/// 3) config/poller.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<PollerConfig> {
    let base = if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("POLLER_CONFIG_PATH points to non-existent path"));
        }
        load_config_from(&pb)?
    } else {
        let toml_p = PathBuf::from("config/poller.toml");
        let json_p = PathBuf::from("config/poller.json");
        if toml_p.exists() {
            load_config_from(&toml_p)?
        } else if json_p.exists() {
            load_config_from(&json_p)?
        } else {
            PollerConfig::default()
        }
    };
    Ok(base.with_env_overrides().sanitized())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PollerConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return serde_json::from_str::<PollerConfig>(s)
            .map(PollerConfig::sanitized)
            .context("parsing poller config json");
    }
    toml::from_str::<PollerConfig>(s)
        .map(PollerConfig::sanitized)
        .context("parsing poller config toml")
}
