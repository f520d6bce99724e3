// src/ingest/providers/status_json.rs
use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::ingest::identity::canonical_id;
use crate::ingest::types::{parse_instant, FetchedPost, RawRecord};

/// Ids arrive as strings or bare numbers depending on the upstream.
fn field_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validate one loosely-typed status object.
pub fn status_to_record(v: &Value) -> Option<FetchedPost> {
    let timestamp = v
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_instant)?;

    let raw_id = field_str(v, "id");
    let url = field_str(v, "url");
    let uri = field_str(v, "uri");
    let id = raw_id.or_else(|| url.clone()).or_else(|| uri.clone())?;

    let reblog = v.get("reblog").filter(|r| r.is_object());
    let reblog_of = reblog.and_then(|r| {
        canonical_id(
            field_str(r, "id").as_deref(),
            field_str(r, "url").as_deref(),
            field_str(r, "uri").as_deref(),
        )
    });

    Some(FetchedPost {
        id,
        timestamp,
        url,
        uri,
        content: v.get("content").and_then(Value::as_str).map(str::to_string),
        is_reblog: reblog.is_some(),
        reblog_of,
    })
}

/// Decode a status-list page. Returns `(items seen, items accepted)`.
pub fn parse_statuses(body: &str) -> Result<(usize, Vec<FetchedPost>)> {
    let parsed: Value = serde_json::from_str(body).context("parsing status list json")?;
    let Value::Array(items) = parsed else {
        bail!("status list is not a JSON array");
    };
    let seen = items.len();
    let out = items
        .into_iter()
        .filter_map(|v| RawRecord::Status(v).validate())
        .collect();
    Ok((seen, out))
}
