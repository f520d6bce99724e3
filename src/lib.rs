// src/lib.rs
// Public library surface for the service, the export tool and integration tests.

pub mod aggregate;
pub mod api;
pub mod error;
pub mod export;
pub mod ingest;
pub mod metrics;
pub mod store;

pub use crate::api::router;
pub use crate::ingest::types::{HourlyBucket, Post};

use std::sync::Arc;

use tracing::info;

use crate::ingest::config::load_config_default;
use crate::ingest::scheduler::PollScheduler;

/// Build the service: load config, start the poll timer, return the router.
/// Must be called inside a Tokio runtime.
pub fn app() -> anyhow::Result<axum::Router> {
    let cfg = load_config_default()?;
    info!(
        source = %cfg.source_url,
        interval_secs = cfg.poll_interval_secs,
        store = %cfg.store_path.display(),
        "starting poller"
    );
    let scheduler = Arc::new(PollScheduler::from_config(cfg)?);
    scheduler.clone().spawn();
    Ok(api::router(api::AppState::new(scheduler)))
}
