// JSON handlers: ingest, delete, list, lookups, version

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::accessor::Accessor;
use crate::error::StorageError;
use crate::models::{LookupQuery, MetricEntry};

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(super) enum ApiError {
    BadRequest(String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Storage(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Storage(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        tracing::warn!(status = status.as_u16(), error = %message, "request failed");
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// POST /metric body.
#[derive(Debug, Deserialize)]
pub(super) struct IngestRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: i64,
    #[serde(alias = "time_stamp")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DeleteParams {
    #[serde(default)]
    name: String,
}

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /metric: stage one sample.
pub(super) async fn post_metric<A: Accessor>(
    State(state): State<AppState<A>>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(req) = body?;
    let timestamp = req.timestamp.ok_or_else(|| {
        ApiError::BadRequest(format!("metric {:?} has no timestamp", req.name))
    })?;
    state
        .service
        .update(MetricEntry::new(req.name, timestamp, req.value))
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// DELETE /metric?name={metric}: drop a metric's staged and stored history.
pub(super) async fn delete_metric<A: Accessor>(
    State(state): State<AppState<A>>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<serde_json::Value> {
    let entry = MetricEntry::new(params.name, DateTime::<Utc>::UNIX_EPOCH, 0);
    state.service.delete(&entry).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /get-metrics-list: names with persisted data.
pub(super) async fn get_metrics_list<A: Accessor>(
    State(state): State<AppState<A>>,
) -> ApiResult<Vec<String>> {
    Ok(Json(state.service.get_list().await?))
}

/// POST /get-metric: one metric at the requested interval; an empty name means all.
pub(super) async fn get_metric<A: Accessor>(
    State(state): State<AppState<A>>,
    body: Result<Json<LookupQuery>, JsonRejection>,
) -> ApiResult<Vec<MetricEntry>> {
    let Json(query) = body?;
    let (from, to, interval) = query.resolve()?;
    let entries = if query.name.is_empty() {
        state.service.get_all(from, to, interval).await?
    } else {
        state
            .service
            .get_one_metric(&query.name, from, to, interval)
            .await?
    };
    Ok(Json(entries))
}

/// POST /get-metrics: every metric at the requested interval.
pub(super) async fn get_metrics<A: Accessor>(
    State(state): State<AppState<A>>,
    body: Result<Json<LookupQuery>, JsonRejection>,
) -> ApiResult<Vec<MetricEntry>> {
    let Json(query) = body?;
    let (from, to, interval) = query.resolve()?;
    Ok(Json(state.service.get_all(from, to, interval).await?))
}
