// src/ingest/identity.rs
//! Stable post identity from heterogeneous source fields.
//!
//! The same post can show up as a bare numeric id in the JSON API and as a
//! permalink in the syndication feed. Both collapse onto the trailing digits of
//! the permalink. This is a heuristic, not a proven bijection.

use once_cell::sync::OnceCell;
use regex::Regex;

fn trailing_digits_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // `/<digits>` as the last path segment, optional trailing slash, query or fragment.
    RE.get_or_init(|| Regex::new(r"/([0-9]+)/?(?:[?#].*)?$").unwrap())
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Digits of a trailing `/<digits>` path segment, if any.
pub fn trailing_digits(s: &str) -> Option<&str> {
    trailing_digits_re()
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Derive the canonical identity. First match wins:
/// 1. all-digit `id`
/// 2. trailing digits of `id`
/// 3. trailing digits of `url`, then `uri`
/// 4. raw `id`, then `url`, then `uri`
///
/// Returns `None` when every field is absent or blank.
pub fn canonical_id(id: Option<&str>, url: Option<&str>, uri: Option<&str>) -> Option<String> {
    let id = non_empty(id);
    let url = non_empty(url);
    let uri = non_empty(uri);

    if let Some(id) = id {
        if id.bytes().all(|b| b.is_ascii_digit()) {
            return Some(id.to_string());
        }
        if let Some(d) = trailing_digits(id) {
            return Some(d.to_string());
        }
    }

    for link in [url, uri].into_iter().flatten() {
        if let Some(d) = trailing_digits(link) {
            return Some(d.to_string());
        }
    }

    id.or(url).or(uri).map(str::to_string)
}

/// Canonicalize a bare identity string.
pub fn canonicalize(id: &str) -> Option<String> {
    canonical_id(Some(id), None, None)
}
