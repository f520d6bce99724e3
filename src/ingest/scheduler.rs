// src/ingest/scheduler.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::error::{PollError, StoreError};
use crate::ingest::config::PollerConfig;
use crate::ingest::fetcher::{fetch_pages, HttpTransport};
use crate::ingest::merge::normalize;
use crate::ingest::types::{FetchedPost, PageTransport, Post, Sleeper, TokioSleeper};
use crate::store::{JsonFileStore, SnapshotStore};

/// Scheduler bookkeeping. Lives as long as the scheduler instance; a fresh
/// instance starts with nothing recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollState {
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Merged { fetched: usize, total: usize },
    /// Another cycle was already in flight.
    Skipped,
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollScheduler {
    cfg: PollerConfig,
    transport: Arc<dyn PageTransport>,
    sleeper: Arc<dyn Sleeper>,
    store: Arc<dyn SnapshotStore>,
    in_flight: AtomicBool,
    // serializes read-merge-write against other writers
    write_lock: tokio::sync::Mutex<()>,
    state: Mutex<PollState>,
}

impl PollScheduler {
    pub fn new(
        cfg: PollerConfig,
        transport: Arc<dyn PageTransport>,
        sleeper: Arc<dyn Sleeper>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            cfg,
            transport,
            sleeper,
            store,
            in_flight: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(PollState::default()),
        }
    }

    /// Production wiring: reqwest transport, tokio sleeps, JSON file store.
    pub fn from_config(cfg: PollerConfig) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::from_config(&cfg)?);
        let store = Arc::new(JsonFileStore::new(cfg.store_path.clone()));
        Ok(Self::new(cfg, transport, Arc::new(TokioSleeper), store))
    }

    pub fn state(&self) -> PollState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update_state(&self, f: impl FnOnce(&mut PollState)) {
        f(&mut self.state.lock().unwrap_or_else(|p| p.into_inner()));
    }

    /// Current persisted snapshot.
    pub async fn snapshot(&self) -> Result<Vec<Post>, StoreError> {
        self.store.load().await
    }

    pub async fn poll_once(&self) -> Result<PollOutcome, PollError> {
        self.poll_at(Utc::now()).await
    }

    /// One fetch-merge-persist cycle as of `now`. On error nothing is written.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> Result<PollOutcome, PollError> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            tracing::info!(target: "ingest", "poll already in flight; skipping tick");
            return Ok(PollOutcome::Skipped);
        };
        self.update_state(|s| s.last_attempt = Some(now));
        counter!("ingest_poll_runs_total").increment(1);

        let cutoff = now
            .checked_sub_signed(self.cfg.recency_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let plan = self.cfg.fetch_plan(cutoff);
        let fetched = match fetch_pages(&*self.transport, &*self.sleeper, &plan).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, "poll cycle failed; keeping last snapshot");
                counter!("ingest_poll_errors_total").increment(1);
                return Err(e.into());
            }
        };
        let incoming: Vec<Post> = fetched
            .into_iter()
            .filter_map(FetchedPost::into_post)
            .collect();
        let fetched = incoming.len();

        let total = match self.merge_into_store(incoming).await {
            Ok(total) => total,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "poll cycle could not persist; keeping last snapshot");
                counter!("ingest_poll_errors_total").increment(1);
                return Err(e.into());
            }
        };

        self.update_state(|s| s.last_success = Some(now));
        gauge!("ingest_store_posts").set(total as f64);
        gauge!("ingest_last_success_ts").set(now.timestamp() as f64);
        tracing::info!(target: "ingest", fetched, total, "poll cycle merged");
        Ok(PollOutcome::Merged { fetched, total })
    }

    async fn merge_into_store(&self, incoming: Vec<Post>) -> Result<usize, StoreError> {
        let _w = self.write_lock.lock().await;
        let existing = self.store.load().await?;
        let merged = normalize(existing, incoming);
        self.store.save(&merged).await?;
        Ok(merged.len())
    }

    /// Lazy seeding for reads on a cold start: poll out of band when the
    /// persisted set is empty and the last attempt is old enough. Upstream
    /// failures are logged and swallowed; returns whether a merge happened.
    pub async fn seed_if_empty(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if !self.store.load().await?.is_empty() {
            return Ok(false);
        }
        let min_gap = self.cfg.min_seed_interval();
        let due = self
            .state()
            .last_attempt
            .is_none_or(|t| now - t >= min_gap);
        if !due {
            return Ok(false);
        }

        tracing::info!(target: "ingest", "empty store on read; seeding");
        match self.poll_at(now).await {
            Ok(PollOutcome::Merged { .. }) => Ok(true),
            Ok(PollOutcome::Skipped) => Ok(false),
            Err(PollError::Fetch(_)) => Ok(false),
            Err(PollError::Store(e)) => Err(e),
        }
    }

    /// Spawn the recurring poll timer. Failed cycles are logged and counted
    /// inside [`PollScheduler::poll_at`]; the next tick retries from scratch.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cfg.poll_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_once().await {
                    tracing::debug!(target: "ingest", error = %e, "tick ended without a merge");
                }
            }
        })
    }
}
