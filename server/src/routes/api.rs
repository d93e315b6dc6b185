use std::fmt::Write as _;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use worldpulse_shared::ApiError;

use crate::error::MAP_NOT_CONFIGURED;
use crate::state::{AppState, ObservabilitySnapshot};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `GET /api/events`: recent geolocated events as a JSON array, or a 500
/// with `{error, details}`.
pub async fn get_events(State(state): State<AppState>) -> Response {
    state.observability.record_events_request();
    let started = Instant::now();

    match state.events.fetch_recent_events().await {
        Ok(records) => {
            state
                .observability
                .record_events_served(records.len() as u64, started.elapsed().as_millis() as u64);
            ([(header::CACHE_CONTROL, "no-store")], Json(records)).into_response()
        }
        Err(e) => {
            state.observability.record_events_failure();
            e.into_response()
        }
    }
}

/// `GET /api/map-config`: tile provider settings for the browser.
pub async fn get_map_config(State(state): State<AppState>) -> Response {
    state.observability.record_map_config_request();

    match state.map_config.as_deref() {
        Some(config) => (
            [(header::CACHE_CONTROL, "public, max-age=300")],
            Json(config.clone()),
        )
            .into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CACHE_CONTROL, "no-store")],
            Json(ApiError::new(MAP_NOT_CONFIGURED)),
        )
            .into_response(),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let observability = state.observability.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "bigquery_connected": state.events.is_connected(),
        "warehouse": state.events.warehouse_description(),
        "map_configured": state.map_config.is_some(),
        "filter": state.events.filter(),
        "observability": {
            "events_requests_total": observability.events_requests_total,
            "events_failures_total": observability.events_failures_total,
            "events_rows_served_total": observability.events_rows_served_total,
            "last_events_query_ms": observability.last_events_query_ms,
            "map_config_requests_total": observability.map_config_requests_total,
        }
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render_prometheus_metrics(
        state.events.is_connected(),
        state.map_config.is_some(),
        state.observability.snapshot(),
    );

    (
        [
            (header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
}

fn render_prometheus_metrics(
    bigquery_connected: bool,
    map_configured: bool,
    observability: ObservabilitySnapshot,
) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "# HELP worldpulse_bigquery_connected Whether the BigQuery client was initialized (1 or 0)."
    );
    let _ = writeln!(body, "# TYPE worldpulse_bigquery_connected gauge");
    let _ = writeln!(
        body,
        "worldpulse_bigquery_connected {}",
        u8::from(bigquery_connected)
    );

    let _ = writeln!(
        body,
        "# HELP worldpulse_map_configured Whether a map provider key is configured (1 or 0)."
    );
    let _ = writeln!(body, "# TYPE worldpulse_map_configured gauge");
    let _ = writeln!(
        body,
        "worldpulse_map_configured {}",
        u8::from(map_configured)
    );

    let _ = writeln!(
        body,
        "# HELP worldpulse_events_requests_total Total /api/events requests."
    );
    let _ = writeln!(body, "# TYPE worldpulse_events_requests_total counter");
    let _ = writeln!(
        body,
        "worldpulse_events_requests_total {}",
        observability.events_requests_total
    );

    let _ = writeln!(
        body,
        "# HELP worldpulse_events_failures_total Total /api/events requests answered with an error."
    );
    let _ = writeln!(body, "# TYPE worldpulse_events_failures_total counter");
    let _ = writeln!(
        body,
        "worldpulse_events_failures_total {}",
        observability.events_failures_total
    );

    let _ = writeln!(
        body,
        "# HELP worldpulse_events_rows_served_total Total event rows returned by /api/events."
    );
    let _ = writeln!(body, "# TYPE worldpulse_events_rows_served_total counter");
    let _ = writeln!(
        body,
        "worldpulse_events_rows_served_total {}",
        observability.events_rows_served_total
    );

    let _ = writeln!(
        body,
        "# HELP worldpulse_last_events_query_ms Duration of the last successful events query."
    );
    let _ = writeln!(body, "# TYPE worldpulse_last_events_query_ms gauge");
    let _ = writeln!(
        body,
        "worldpulse_last_events_query_ms {}",
        observability.last_events_query_ms
    );

    let _ = writeln!(
        body,
        "# HELP worldpulse_map_config_requests_total Total /api/map-config requests."
    );
    let _ = writeln!(body, "# TYPE worldpulse_map_config_requests_total counter");
    let _ = writeln!(
        body,
        "worldpulse_map_config_requests_total {}",
        observability.map_config_requests_total
    );

    body
}
