use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::analytics::{RawParams, Visitor, UTM_KEYS};
use crate::storage::StorageError;
use crate::tracker::{PeriodStats, Tracker};

pub struct AppState {
    pub tracker: Arc<Tracker>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct TrackResponse {
    pub tracked: bool,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
    pub page_id: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn storage_failure(context: &str, err: StorageError) -> ApiError {
    tracing::error!(error = %err, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: context.to_string(),
        }),
    )
}

/// Record a campaign visit for `page_id` from the request's UTM query
///
/// Only the five UTM keys are taken from the query string; the generated
/// fields cannot be overridden over HTTP.
pub async fn track_visit(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<TrackResponse>, ApiError> {
    let visitor = Visitor::from_request(&headers, addr.ip(), &state.tracker.config().proxy);

    let params: RawParams = query
        .into_iter()
        .filter(|(key, _)| UTM_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key, Some(value)))
        .collect();

    let tracked = state
        .tracker
        .track(&visitor, &page_id, &params)
        .await
        .map_err(|e| storage_failure("Failed to record visit", e))?;

    Ok(Json(TrackResponse { tracked }))
}

/// Total number of recorded events
pub async fn count_events(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state
        .tracker
        .count_all()
        .await
        .map_err(|e| storage_failure("Failed to count events", e))?;

    Ok(Json(CountResponse { count }))
}

/// Period-over-period event counts
pub async fn period_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<PeriodStats>, ApiError> {
    let days = query
        .days
        .unwrap_or(state.tracker.config().stats_range_days)
        .max(1);

    let stats = state
        .tracker
        .period_stats(days, query.page_id.as_deref())
        .await
        .map_err(|e| storage_failure("Failed to compute stats", e))?;

    Ok(Json(stats))
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}
