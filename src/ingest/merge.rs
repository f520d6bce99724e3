// src/ingest/merge.rs
//! Identity-keyed merge of persisted and freshly fetched posts.

use std::collections::HashMap;

use crate::ingest::identity::canonical_id;
use crate::ingest::types::Post;

fn fill_if_empty(slot: &mut Option<String>, other: Option<String>) {
    let empty = slot.as_deref().is_none_or(str::is_empty);
    if empty {
        if let Some(v) = other.filter(|v| !v.is_empty()) {
            *slot = Some(v);
        }
    }
}

/// Merge `incoming` into `kept`, both already sharing a canonical id.
/// The later parsed timestamp wins; optional fields are filled, never replaced.
pub fn merge_pair(kept: &mut Post, incoming: Post) {
    if incoming.instant() > kept.instant() {
        kept.timestamp = incoming.timestamp;
    }
    fill_if_empty(&mut kept.url, incoming.url);
    fill_if_empty(&mut kept.uri, incoming.uri);
    fill_if_empty(&mut kept.content, incoming.content);
}

/// Fold `existing` then `incoming` into one post per canonical id, sorted
/// ascending by parsed timestamp (unparseable first). Posts without any
/// derivable identity are dropped.
pub fn normalize<I, J>(existing: I, incoming: J) -> Vec<Post>
where
    I: IntoIterator<Item = Post>,
    J: IntoIterator<Item = Post>,
{
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Post> = HashMap::new();

    for mut post in existing.into_iter().chain(incoming) {
        let Some(id) = canonical_id(Some(post.id.as_str()), post.url.as_deref(), post.uri.as_deref())
        else {
            tracing::debug!(target: "ingest", "dropping post without identity");
            continue;
        };
        post.id = id.clone();
        match by_id.get_mut(&id) {
            Some(kept) => merge_pair(kept, post),
            None => {
                order.push(id.clone());
                by_id.insert(id, post);
            }
        }
    }

    let mut out: Vec<Post> = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();
    // stable: equal instants keep first-seen order
    out.sort_by_key(|p| p.instant());
    out
}
