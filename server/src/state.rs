use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;
use worldpulse_shared::MapConfig;

use crate::config::{upstream_connect_timeout, upstream_http_timeout};
use crate::services::event_query::EventQueryService;

#[derive(Clone)]
pub struct AppState {
    pub events: Arc<EventQueryService>,
    /// Map provider settings handed to the browser. None if MAP_API_KEY is not set.
    pub map_config: Option<Arc<MapConfig>>,
    pub observability: Arc<ObservabilityCounters>,
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    events_requests_total: AtomicU64,
    events_failures_total: AtomicU64,
    events_rows_served_total: AtomicU64,
    last_events_query_ms: AtomicU64,
    map_config_requests_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub events_requests_total: u64,
    pub events_failures_total: u64,
    pub events_rows_served_total: u64,
    pub last_events_query_ms: u64,
    pub map_config_requests_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            events_requests_total: self.events_requests_total.load(Ordering::Relaxed),
            events_failures_total: self.events_failures_total.load(Ordering::Relaxed),
            events_rows_served_total: self.events_rows_served_total.load(Ordering::Relaxed),
            last_events_query_ms: self.last_events_query_ms.load(Ordering::Relaxed),
            map_config_requests_total: self.map_config_requests_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_events_request(&self) {
        self.events_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events_failure(&self) {
        self.events_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events_served(&self, rows: u64, elapsed_ms: u64) {
        self.events_rows_served_total
            .fetch_add(rows, Ordering::Relaxed);
        self.last_events_query_ms
            .store(elapsed_ms, Ordering::Relaxed);
    }

    pub fn record_map_config_request(&self) {
        self.map_config_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl AppState {
    pub fn new(events: EventQueryService, map_config: Option<MapConfig>) -> Self {
        Self {
            events: Arc::new(events),
            map_config: map_config.map(Arc::new),
            observability: Arc::new(ObservabilityCounters::default()),
        }
    }
}

/// Shared outbound client for BigQuery and the token endpoints.
pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    let request_timeout = upstream_http_timeout();
    let connect_timeout = upstream_connect_timeout();
    reqwest::Client::builder()
        .user_agent(concat!("worldpulse/", env!("CARGO_PKG_VERSION")))
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .or_else(|e| {
            warn!(
                error = %e,
                "failed to build configured HTTP client, retrying without custom user-agent"
            );
            reqwest::Client::builder()
                .timeout(request_timeout)
                .connect_timeout(connect_timeout)
                .build()
        })
}
