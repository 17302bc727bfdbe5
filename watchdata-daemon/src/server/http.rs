//! REST handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use watchdata_core::error::StorageError;
use watchdata_core::pipeline::{HealthStatus, Pipeline};
use watchdata_core::types::LogRecord;
use watchdata_log_stream::LogStore;

use super::AppState;
use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

fn storage_error_response(err: &StorageError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody {
            error: err.to_string(),
            kind: err.kind(),
        }),
    )
        .into_response()
}

/// `POST /v1/logs`: store a batch and acknowledge once it is durable.
pub(super) async fn ingest_logs<S: LogStore>(
    State(state): State<AppState<S>>,
    Json(records): Json<Vec<LogRecord>>,
) -> Response {
    match state.intake.ingest(records).await {
        Ok(receipt) => (StatusCode::ACCEPTED, Json(receipt)).into_response(),
        Err(e) => storage_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct RangeParams {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// `GET /logs?start=&end=`: most recent first, capped by the store writer.
///
/// Missing bounds default to the last hour.
pub(super) async fn query_logs<S: LogStore>(
    State(state): State<AppState<S>>,
    Query(params): Query<RangeParams>,
) -> Response {
    let end = params.end.unwrap_or_else(Utc::now);
    let start = params.start.unwrap_or(end - Duration::hours(1));

    match state.writer.query_range(start, end).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => storage_error_response(&e),
    }
}

/// `GET /health`: 200 unless the daemon is unhealthy.
pub(super) async fn health<S: LogStore>(State(state): State<AppState<S>>) -> Response {
    let report = health_report(&state).await;
    let code = if report.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report)).into_response()
}

/// Collect stream and storage health into one report.
pub async fn health_report<S: LogStore>(state: &AppState<S>) -> DaemonHealth {
    let (stream_status, dropped_records) = {
        let stream = state.stream.lock().await;
        (stream.health_check().await, stream.dropped_count())
    };
    let storage_status = match state.writer.ping().await {
        Ok(()) => HealthStatus::Healthy,
        Err(e) => HealthStatus::Unhealthy(e.to_string()),
    };

    let modules = vec![
        ModuleHealth {
            name: "log-stream".to_owned(),
            enabled: true,
            status: stream_status,
        },
        ModuleHealth {
            name: "storage".to_owned(),
            enabled: true,
            status: storage_status,
        },
    ];

    DaemonHealth {
        status: aggregate_status(&modules),
        uptime_secs: state.start_time.elapsed().as_secs(),
        subscribers: state.hub.subscriber_count(),
        dropped_records,
        modules,
    }
}
