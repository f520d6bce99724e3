use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::aggregate;
use crate::error::StoreError;
use crate::ingest::scheduler::PollScheduler;
use crate::ingest::types::{format_instant, HourlyBucket, Post};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<PollScheduler>,
}

impl AppState {
    pub fn new(scheduler: Arc<PollScheduler>) -> Self {
        Self { scheduler }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/latest", get(latest))
        .route("/history/hourly", get(history_hourly))
        .route("/posts", get(posts))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Persistence failures are the only errors a read can surface.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "reading post snapshot failed");
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Seed on a cold start if due, then read the snapshot.
async fn snapshot(state: &AppState) -> Result<Vec<Post>, ApiError> {
    state.scheduler.seed_if_empty(Utc::now()).await?;
    Ok(state.scheduler.snapshot().await?)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LatestOut {
    latest: Option<Post>,
    total_posts: usize,
    polled_at: Option<String>,
}

async fn latest(State(state): State<AppState>) -> Result<Json<LatestOut>, ApiError> {
    let posts = snapshot(&state).await?;
    Ok(Json(LatestOut {
        latest: aggregate::latest(&posts).cloned(),
        total_posts: posts.len(),
        polled_at: state.scheduler.state().last_success.map(format_instant),
    }))
}

#[derive(Serialize)]
struct HourlyOut {
    hours: Vec<HourlyBucket>,
}

async fn history_hourly(State(state): State<AppState>) -> Result<Json<HourlyOut>, ApiError> {
    let posts = snapshot(&state).await?;
    Ok(Json(HourlyOut {
        hours: aggregate::hourly(&posts),
    }))
}

#[derive(Serialize)]
struct PostsOut {
    posts: Vec<Post>,
}

async fn posts(State(state): State<AppState>) -> Result<Json<PostsOut>, ApiError> {
    let posts = snapshot(&state).await?;
    Ok(Json(PostsOut {
        posts: aggregate::all(&posts),
    }))
}
