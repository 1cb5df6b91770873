/**
 * HTTP SURFACE
 *
 * ROLE: thin axum layer over the kernel's three outward contracts
 * (range query, fleet ranking, manual rollup) plus read-only diagnostics.
 * Handlers parse input, call the aggregator or rollup job, and render JSON.
 *
 * ROUTES:
 * - GET  /health                          liveness, always "ok"
 * - GET  /system/health                   tick and rollup counters
 * - GET  /hosts, /hosts/{id}              directory entries + live state
 * - GET  /hosts/{id}/uptime?from=&to=     exact sweep over [from, to)
 * - GET  /hosts/{id}/samples?limit=       recent raw probe samples
 * - GET  /analytics/top-downtime?days=&limit=
 * - POST /rollups/{day}                   on-demand rollup, YYYY-MM-DD
 */

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tower_http::trace::TraceLayer;

use crate::aggregator::{parse_range, DowntimeReport, QueryError, UptimeAggregator};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{parse_day, HostId, LiveState, ProbeSample};
use crate::rollup::{RollupError, RollupJob, RollupReport};

const DEFAULT_RANKING_DAYS: u32 = 7;
const DEFAULT_RANKING_LIMIT: usize = 10;
const DEFAULT_SAMPLE_LIMIT: usize = 50;
const MAX_SAMPLE_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<UptimeAggregator>,
    pub rollups: Arc<RollupJob>,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/hosts", get(get_hosts))
        .route("/hosts/{id}", get(get_host))
        .route("/hosts/{id}/uptime", get(get_uptime))
        .route("/hosts/{id}/samples", get(get_samples))
        .route("/analytics/top-downtime", get(get_top_downtime))
        .route("/rollups/{day}", post(post_rollup))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Rollup(#[from] RollupError),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Query(QueryError::InvalidRange(msg)) => (StatusCode::BAD_REQUEST, "INVALID_RANGE", msg.clone()),
            ApiError::Query(QueryError::NotFound(id)) => (StatusCode::NOT_FOUND, "NOT_FOUND", format!("host {id} not found")),
            ApiError::Rollup(RollupError::Disabled) => (StatusCode::FORBIDDEN, "ROLLUP_DISABLED", self.to_string()),
            ApiError::Rollup(RollupError::DayNotOver(_)) => (StatusCode::BAD_REQUEST, "DAY_NOT_OVER", self.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Query(QueryError::Internal(_))
            | ApiError::Rollup(RollupError::Directory(_) | RollupError::Store(_) | RollupError::Incomplete(_)) => {
                tracing::error!(error = %self, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "An internal error occurred".to_string())
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HostView {
    host_id: HostId,
    name: String,
    address: String,
    is_online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    last_probe_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    last_transition_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
struct UptimeView {
    host_id: HostId,
    #[serde(with = "time::serde::rfc3339")]
    from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    to: OffsetDateTime,
    uptime_ms: i64,
    downtime_ms: i64,
    percentage: f64,
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RankingParams {
    days: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SampleParams {
    limit: Option<String>,
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let tracked = app.aggregator.directory().list_hosts().map(|h| h.len()).unwrap_or(0);
    Json(app.health.get_health(tracked))
}

// GET /hosts
async fn get_hosts(State(app): State<AppState>) -> ApiResult<Json<Vec<HostView>>> {
    let hosts = app.aggregator.directory().list_hosts().map_err(QueryError::from)?;
    let states = app.aggregator.store().host_states().map_err(QueryError::from)?;
    let views = hosts
        .into_iter()
        .map(|h| {
            let state = states.get(&h.id).cloned().unwrap_or_default();
            to_view(h.id, h.display_name, h.address, state)
        })
        .collect();
    Ok(Json(views))
}

// GET /hosts/{id}
async fn get_host(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<HostView>> {
    let host = app
        .aggregator
        .directory()
        .find_host(&id)
        .map_err(QueryError::from)?
        .ok_or_else(|| QueryError::NotFound(HostId::new(id.as_str())))?;
    let state = app
        .aggregator
        .store()
        .host_states()
        .map_err(QueryError::from)?
        .remove(&host.id)
        .unwrap_or_default();
    Ok(Json(to_view(host.id, host.display_name, host.address, state)))
}

// GET /hosts/{id}/uptime?from=&to=
async fn get_uptime(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<UptimeView>> {
    let (from, to) = parse_range(params.from.as_deref(), params.to.as_deref(), OffsetDateTime::now_utc())?;
    let host_id = HostId::new(id);
    let summary = app.aggregator.range_uptime(&host_id, from, to)?;
    Ok(Json(UptimeView {
        host_id,
        from,
        to,
        uptime_ms: summary.uptime_ms,
        downtime_ms: summary.downtime_ms,
        percentage: summary.percentage,
    }))
}

// GET /hosts/{id}/samples?limit=
async fn get_samples(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SampleParams>,
) -> ApiResult<Json<Vec<ProbeSample>>> {
    let limit = parse_number(params.limit.as_deref(), "limit", DEFAULT_SAMPLE_LIMIT)?.clamp(1, MAX_SAMPLE_LIMIT);
    let host_id = HostId::new(id);
    let samples = app.aggregator.store().samples_for_host(&host_id, limit).map_err(QueryError::from)?;
    Ok(Json(samples))
}

// GET /analytics/top-downtime?days=&limit=
async fn get_top_downtime(State(app): State<AppState>, Query(params): Query<RankingParams>) -> ApiResult<Json<DowntimeReport>> {
    let days = parse_number(params.days.as_deref(), "days", DEFAULT_RANKING_DAYS)?;
    let limit = parse_number(params.limit.as_deref(), "limit", DEFAULT_RANKING_LIMIT)?;
    let report = app.aggregator.top_downtime(days, limit, OffsetDateTime::now_utc())?;
    Ok(Json(report))
}

// POST /rollups/{day}
async fn post_rollup(State(app): State<AppState>, Path(day): Path<String>) -> ApiResult<Json<RollupReport>> {
    let day = parse_day(&day).map_err(|e| ApiError::BadRequest(format!("day must be YYYY-MM-DD: {e}")))?;
    let rollups = app.rollups.clone();
    let report = tokio::task::spawn_blocking(move || rollups.trigger(day, OffsetDateTime::now_utc()))
        .await
        .map_err(|e| QueryError::Internal(e.to_string()))??;
    Ok(Json(report))
}

fn to_view(host_id: HostId, name: String, address: String, state: LiveState) -> HostView {
    HostView {
        host_id,
        name,
        address,
        is_online: state.is_online,
        last_probe_at: state.last_probe_at,
        last_transition_at: state.last_transition_at,
    }
}

fn parse_number<T: std::str::FromStr>(raw: Option<&str>, name: &str, default: T) -> ApiResult<T> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(default),
        Some(r) => r
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("`{name}` must be a non-negative integer"))),
    }
}
