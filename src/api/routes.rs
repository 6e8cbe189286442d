use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::tracker::Tracker;

use super::handlers::{count_events, health_check, period_stats, track_visit, AppState};

pub fn create_api_router(tracker: Arc<Tracker>) -> Router {
    let state = Arc::new(AppState { tracker });

    Router::new()
        .route("/health", get(health_check))
        .route("/track/{*page_id}", get(track_visit).post(track_visit))
        .route("/count", get(count_events))
        .route("/stats", get(period_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
