use std::time::Duration;

use futures::future::{self, Either};
use gloo_timers::future::TimeoutFuture;
use serde::de::DeserializeOwned;
use worldpulse_shared::{ApiError, EventRecord, MapConfig};

pub const EVENTS_URL: &str = "/api/events";
pub const MAP_CONFIG_URL: &str = "/api/map-config";
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(45);

/// Why an events fetch produced no data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("Unexpected response from server: {0}")]
    Decode(String),
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// The map cannot be shown at all; never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Configuration error: {0}")]
pub struct ConfigurationError(pub String);

pub async fn fetch_events() -> Result<Vec<EventRecord>, FetchError> {
    get_json(EVENTS_URL).await
}

pub async fn fetch_map_config() -> Result<MapConfig, ConfigurationError> {
    let config: MapConfig = get_json(MAP_CONFIG_URL)
        .await
        .map_err(|e| ConfigurationError(e.to_string()))?;
    if config.api_key.trim().is_empty() {
        return Err(ConfigurationError("map provider API key is empty".into()));
    }
    Ok(config)
}

async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T, FetchError> {
    let request = Box::pin(async {
        let resp = gloo_net::http::Request::get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !resp.ok() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(server_error(status, &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    });
    let timeout = Box::pin(TimeoutFuture::new(FETCH_TIMEOUT.as_millis() as u32));

    match future::select(request, timeout).await {
        Either::Left((result, _)) => result,
        Either::Right(((), _)) => Err(FetchError::Timeout(FETCH_TIMEOUT)),
    }
}

/// Prefer the `{error, details}` body; fall back to the status line.
fn server_error(status: u16, body: &str) -> FetchError {
    let message = match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError {
            error,
            details: Some(details),
        }) if !details.trim().is_empty() => format!("{error} ({details})"),
        Ok(ApiError { error, .. }) if !error.trim().is_empty() => error,
        _ => format!("HTTP {status}"),
    };
    FetchError::Server { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_uses_api_error_body() {
        let err = server_error(
            500,
            r#"{"error":"Failed to fetch data from BigQuery.","details":"quota exceeded"}"#,
        );
        assert_eq!(
            err.to_string(),
            "Failed to fetch data from BigQuery. (quota exceeded)"
        );
    }

    #[test]
    fn server_error_without_details_or_json() {
        assert_eq!(
            server_error(500, r#"{"error":"BigQuery client not initialized."}"#).to_string(),
            "BigQuery client not initialized."
        );
        assert_eq!(server_error(502, "<html>bad gateway</html>").to_string(), "HTTP 502");
    }

    #[test]
    fn every_error_has_a_message() {
        let errors = [
            FetchError::Network("connection refused".into()),
            FetchError::Decode("expected array".into()),
            FetchError::Timeout(FETCH_TIMEOUT),
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
        assert_eq!(
            FetchError::Timeout(FETCH_TIMEOUT).to_string(),
            "Request timed out after 45s"
        );
    }
}
