// src/ingest/mod.rs
pub mod config;
pub mod fetcher;
pub mod identity;
pub mod merge;
pub mod providers;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_pages_total", "Successfully fetched upstream pages.");
        describe_counter!(
            "ingest_rate_limited_total",
            "Upstream 429 responses recovered by backoff."
        );
        describe_counter!("ingest_items_total", "Items accepted by the feed decoders.");
        describe_counter!(
            "ingest_items_dropped_total",
            "Items dropped for missing identity or timestamp."
        );
        describe_counter!("ingest_poll_runs_total", "Poll cycles started.");
        describe_counter!(
            "ingest_poll_errors_total",
            "Poll cycles aborted by transport or format errors."
        );
        describe_histogram!("ingest_parse_ms", "Page decode time in milliseconds.");
        describe_gauge!("ingest_store_posts", "Posts in the persisted set after the last merge.");
        describe_gauge!(
            "ingest_last_success_ts",
            "Unix ts of the last successful poll cycle."
        );
    });
}

/// Plain text from an HTML post body: line breaks kept, tags stripped,
/// entities decoded, runs of spaces collapsed.
pub fn html_to_text(s: &str) -> String {
    static RE_BREAKS: OnceCell<regex::Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    static RE_NL: OnceCell<regex::Regex> = OnceCell::new();

    // 1) Block boundaries become newlines
    let re_breaks =
        RE_BREAKS.get_or_init(|| regex::Regex::new(r"(?i)<br\s*/?>|</p\s*>").unwrap());
    let out = re_breaks.replace_all(s, "\n");

    // 2) Strip remaining tags
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = re_tags.replace_all(&out, "");

    // 3) HTML entity decode (after stripping, so `&lt;b&gt;` survives as text)
    let out = html_escape::decode_html_entities(&out).replace('\u{00A0}', " ");

    // 4) Collapse horizontal whitespace and blank lines
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[ \t\r\f]+").unwrap());
    let out = re_ws.replace_all(&out, " ");
    let re_nl = RE_NL.get_or_init(|| regex::Regex::new(r" ?\n[ \n]*").unwrap());
    let out = re_nl.replace_all(&out, "\n");

    out.trim().to_string()
}
