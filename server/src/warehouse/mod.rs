pub mod bigquery;
pub mod credentials;

use std::future::Future;
use std::pin::Pin;

use worldpulse_shared::EventRecord;

use crate::error::QueryError;
use crate::query::QueryRequest;

pub use bigquery::BigQueryClient;

pub type QueryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<EventRecord>, QueryError>> + Send + 'a>>;

/// An analytical store that can answer the events query.
///
/// Implementations return the complete bounded row set or an error, never a
/// partial result.
pub trait Warehouse: Send + Sync {
    fn run_events_query<'a>(&'a self, request: &'a QueryRequest) -> QueryFuture<'a>;

    /// Short description for health output, e.g. `bigquery:my-project@US`.
    fn describe(&self) -> String;
}
