mod app;
mod config;
mod error;
mod query;
mod routes;
mod services;
mod state;
mod warehouse;

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::error::ConnectionError;
use crate::services::event_query::EventQueryService;
use crate::state::AppState;
use crate::warehouse::{BigQueryClient, Warehouse};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let warehouse: Result<Arc<dyn Warehouse>, ConnectionError> = match state::build_http_client() {
        Ok(http) => BigQueryClient::connect(http)
            .await
            .map(|client| Arc::new(client) as Arc<dyn Warehouse>),
        Err(e) => Err(ConnectionError::HttpClient(e.to_string())),
    };
    match &warehouse {
        Ok(client) => tracing::info!(warehouse = %client.describe(), "BigQuery client initialized"),
        Err(e) => tracing::error!(
            error = %e,
            "failed to initialize BigQuery client; /api/events will report the failure"
        ),
    }

    let filter = config::event_filter();
    tracing::info!(
        events_table = %filter.events_table,
        result_limit = filter.result_limit,
        min_mentions = ?filter.min_mention_count,
        theme_prefix = ?filter.theme_prefix,
        categories = ?filter.event_categories,
        "events filter configured"
    );

    let map_config = config::map_config();
    if map_config.is_none() {
        tracing::warn!("MAP_API_KEY is not set; /api/map-config will return an error");
    }

    let state = AppState::new(EventQueryService::new(warehouse, filter), map_config);
    let app = app::build_app(state);

    let addr = format!("0.0.0.0:{}", config::server_port());
    tracing::info!(
        static_dir = %config::static_dir().display(),
        "WorldPulse server listening on {addr}"
    );

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    tracing::info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
