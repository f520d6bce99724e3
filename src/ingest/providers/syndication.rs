// src/ingest/providers/syndication.rs
//! Tag-delimited extraction over `<item>` blocks. Deliberately not a strict
//! XML parse: one broken item must not take the rest of the feed down.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::types::{parse_instant, FetchedPost, RawRecord, SyndicationItem};

struct Patterns {
    item: Regex,
    guid: Regex,
    link: Regex,
    pub_date: Regex,
    description: Regex,
}

fn tag_re(tag: &str) -> Regex {
    Regex::new(&format!(r"(?is)<{tag}(?:\s[^>]*)?>(.*?)</{tag}\s*>")).unwrap()
}

fn patterns() -> &'static Patterns {
    static P: OnceCell<Patterns> = OnceCell::new();
    P.get_or_init(|| Patterns {
        item: tag_re("item"),
        guid: tag_re("guid"),
        link: tag_re("link"),
        pub_date: tag_re("pubDate"),
        description: tag_re("description"),
    })
}

/// Unwrap CDATA, unescape entities, trim. Blank becomes `None`.
fn clean_text(raw: &str) -> Option<String> {
    let t = raw.trim();
    let t = match t
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
    {
        Some(inner) => inner.to_string(),
        None => quick_xml::escape::unescape(t)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| t.to_string()),
    };
    let t = t.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn extract(re: &Regex, block: &str) -> Option<String> {
    re.captures(block)
        .and_then(|c| c.get(1))
        .and_then(|m| clean_text(m.as_str()))
}

/// `pubDate` is RFC 2822 in RSS; some feeds emit RFC 3339 instead.
pub fn parse_pub_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = OffsetDateTime::parse(s.trim(), &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s.trim()) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_instant(s)
}

/// Split a feed document into raw items.
pub fn scan_items(xml: &str) -> Vec<SyndicationItem> {
    let p = patterns();
    p.item
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| {
            let block = m.as_str();
            SyndicationItem {
                guid: extract(&p.guid, block),
                link: extract(&p.link, block),
                pub_date: extract(&p.pub_date, block),
                description: extract(&p.description, block),
            }
        })
        .collect()
}

/// Validate one raw item: identity (guid, then link) and a parseable date are both required.
pub fn item_to_record(it: SyndicationItem) -> Option<FetchedPost> {
    let timestamp = it.pub_date.as_deref().and_then(parse_pub_date)?;
    let id = it.guid.clone().or_else(|| it.link.clone())?;
    Some(FetchedPost {
        id,
        timestamp,
        url: it.link,
        uri: None,
        content: it.description,
        is_reblog: false,
        reblog_of: None,
    })
}

/// Decode a feed document. Returns `(items seen, items accepted)`.
pub fn parse_items(xml: &str) -> (usize, Vec<FetchedPost>) {
    let items = scan_items(xml);
    let seen = items.len();
    let out = items
        .into_iter()
        .filter_map(|it| RawRecord::Syndication(it).validate())
        .collect();
    (seen, out)
}
