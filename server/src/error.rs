use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use worldpulse_shared::ApiError;

pub const CLIENT_NOT_INITIALIZED: &str = "BigQuery client not initialized.";
pub const QUERY_FAILED: &str = "Failed to fetch data from BigQuery.";
pub const MAP_NOT_CONFIGURED: &str = "Map provider API key is not configured.";

/// The warehouse client could not be built. Fatal for the events route,
/// never retried.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),
    #[error("unsupported credential type `{0}`")]
    UnsupportedCredentialType(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("no project id: set BIGQUERY_PROJECT_ID or use credentials that carry one")]
    MissingProject,
    #[error("no credentials found: {0}")]
    NoCredentials(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// The warehouse accepted a request but could not answer it.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("BigQuery returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("query did not complete within {0}s")]
    Timeout(u64),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Failure of `GET /api/events`, rendered as the stable `{error, details}` body.
#[derive(Debug, Clone, Error)]
pub enum EventsError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl EventsError {
    pub fn body(&self) -> ApiError {
        match self {
            Self::Connection(e) => {
                ApiError::new(CLIENT_NOT_INITIALIZED).with_details(e.to_string())
            }
            Self::Query(e) => ApiError::new(QUERY_FAILED).with_details(e.to_string()),
        }
    }
}

impl IntoResponse for EventsError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CACHE_CONTROL, "no-store")],
            Json(self.body()),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_and_query_failures_have_distinct_messages() {
        let connection = EventsError::from(ConnectionError::MissingProject).body();
        let query = EventsError::from(QueryError::Rejected {
            status: 403,
            message: "Access Denied".into(),
        })
        .body();

        assert_eq!(connection.error, CLIENT_NOT_INITIALIZED);
        assert_eq!(query.error, QUERY_FAILED);
        assert_eq!(
            query.details.as_deref(),
            Some("BigQuery returned 403: Access Denied")
        );
        assert!(connection.details.is_some_and(|d| d.contains("BIGQUERY_PROJECT_ID")));
    }
}
