//! Error taxonomy for fetching, persisting and polling.
//!
//! Rate limiting (HTTP 429) never shows up here: the fetcher recovers from it
//! in place. Per-item validation failures never show up either: decoders drop
//! the item and move on.

use thiserror::Error;

/// A fetch attempt that must be abandoned as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure, timeout or unreadable response body.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// Non-success status other than 429.
    #[error("upstream returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Unexpected content type or undecodable body.
    #[error("format error for {url}: {message}")]
    Format { url: String, message: String },
}

impl FetchError {
    pub fn transport(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn format(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Format {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

/// Failure of the persistence collaborator. A missing document is not one.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a poll cycle produced no merge.
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
