//! HTTP 观测面处理器。

use crate::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fab_telemetry::metrics;
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// 流水线计数器 + 总线统计 + 当前良率。
pub async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = metrics().snapshot();
    let bus = state.bus.stats();
    Json(json!({
        "raw_messages": snapshot.raw_messages,
        "normalized_records": snapshot.normalized_records,
        "dropped_malformed": snapshot.dropped_malformed,
        "dropped_unknown_device": snapshot.dropped_unknown_device,
        "bus_published": snapshot.bus_published,
        "bus_overflow": snapshot.bus_overflow,
        "batch_commit_success": snapshot.batch_commit_success,
        "batch_commit_failure": snapshot.batch_commit_failure,
        "batch_retries": snapshot.batch_retries,
        "records_persisted": snapshot.records_persisted,
        "pool_exhausted": snapshot.pool_exhausted,
        "status_transitions": snapshot.status_transitions,
        "yield_updates": snapshot.yield_updates,
        "bus": {
            "published": bus.published,
            "delivered": bus.delivered,
            "dropped": bus.dropped,
        },
        "yield": state.yield_calc.value(),
    }))
}

pub async fn devices(State(state): State<AppState>) -> impl IntoResponse {
    let mut states = state.tracker.states();
    states.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    let body: Vec<_> = states
        .iter()
        .map(|device| {
            json!({
                "device_id": device.device_id,
                "status": device.status.as_str(),
                "last_heartbeat_ms": device.last_heartbeat_ms,
                "consecutive_misses": device.consecutive_misses,
            })
        })
        .collect();
    Json(body)
}

pub async fn history(
    State(state): State<AppState>,
    Path((device, parameter)): Path<(String, String)>,
) -> Response {
    let samples = state.window.history(&device, &parameter);
    if samples.is_empty() && !state.window.parameters(&device).contains(&parameter) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no such series" })),
        )
            .into_response();
    }
    Json(samples).into_response()
}
