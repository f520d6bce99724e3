//! # Aggregate
//! Read projections over the persisted post set: the latest post, hourly
//! activity buckets, and the full ordered set.
//!
//! All three are pure functions of their input and never mutate it. Buckets
//! are recomputed on every call.

use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

use crate::ingest::types::{format_instant, HourlyBucket, Post};

/// Post with the maximum parsed timestamp; ties go to the first encountered.
/// Posts with unparseable timestamps never win.
pub fn latest(posts: &[Post]) -> Option<&Post> {
    let mut best: Option<(&Post, DateTime<Utc>)> = None;
    for p in posts {
        let Some(ts) = p.instant() else { continue };
        match best {
            Some((_, b)) if ts <= b => {}
            _ => best = Some((p, ts)),
        }
    }
    best.map(|(p, _)| p)
}

/// Truncate to the start of the UTC hour.
pub fn hour_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

/// One bucket per UTC hour holding at least one post, ascending by hour.
/// Posts with unparseable timestamps fall in no bucket.
pub fn hourly(posts: &[Post]) -> Vec<HourlyBucket> {
    let mut counts: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for ts in posts.iter().filter_map(Post::instant) {
        *counts.entry(hour_of(ts)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(hour, count)| HourlyBucket {
            hour: format_instant(hour),
            count,
        })
        .collect()
}

/// The full set ordered ascending by parsed timestamp (unparseable first).
pub fn all(posts: &[Post]) -> Vec<Post> {
    let mut out = posts.to_vec();
    out.sort_by_key(Post::instant);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, ts: &str) -> Post {
        Post {
            id: id.into(),
            timestamp: ts.into(),
            url: None,
            uri: None,
            content: None,
        }
    }

    #[test]
    fn latest_of_empty_is_none() {
        assert!(latest(&[]).is_none());
    }

    #[test]
    fn latest_picks_max_and_first_on_ties() {
        let posts = vec![
            post("a", "2024-01-01T10:00:00.000Z"),
            post("b", "2024-01-01T12:00:00.000Z"),
            post("c", "2024-01-01T12:00:00Z"),
            post("d", "junk"),
        ];
        assert_eq!(latest(&posts).unwrap().id, "b");
    }

    #[test]
    fn hourly_buckets_truncate_and_sum_to_total() {
        let posts = vec![
            post("1", "2024-01-01T10:05:00.000Z"),
            post("2", "2024-01-01T10:59:59.999Z"),
            post("3", "2024-01-01T11:00:00.000Z"),
            post("4", "2024-01-01T08:30:00+00:00"),
        ];
        let buckets = hourly(&posts);
        assert_eq!(
            buckets,
            vec![
                HourlyBucket { hour: "2024-01-01T08:00:00.000Z".into(), count: 1 },
                HourlyBucket { hour: "2024-01-01T10:00:00.000Z".into(), count: 2 },
                HourlyBucket { hour: "2024-01-01T11:00:00.000Z".into(), count: 1 },
            ]
        );
        let sum: usize = buckets.iter().map(|b| b.count).sum();
        assert_eq!(sum, all(&posts).len());
    }

    #[test]
    fn offsets_bucket_by_utc_hour() {
        let buckets = hourly(&[post("1", "2024-01-01T01:15:00+05:30")]);
        assert_eq!(buckets[0].hour, "2023-12-31T19:00:00.000Z");
    }

    #[test]
    fn projections_do_not_mutate_input() {
        let posts = vec![post("2", "2024-01-02T00:00:00.000Z"), post("1", "2024-01-01T00:00:00.000Z")];
        let before = posts.clone();
        let sorted = all(&posts);
        let _ = hourly(&posts);
        let _ = latest(&posts);
        assert_eq!(posts, before);
        assert_eq!(sorted[0].id, "1");
    }
}
