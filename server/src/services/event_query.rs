use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info};
use worldpulse_shared::EventRecord;

use crate::error::{ConnectionError, EventsError};
use crate::query::EventFilter;
use crate::warehouse::Warehouse;

/// Answers `/api/events`. Holds the warehouse client built at startup, or the
/// reason it could not be built; a failed connection is never retried.
pub struct EventQueryService {
    warehouse: Result<Arc<dyn Warehouse>, ConnectionError>,
    filter: EventFilter,
}

impl EventQueryService {
    pub fn new(
        warehouse: Result<Arc<dyn Warehouse>, ConnectionError>,
        filter: EventFilter,
    ) -> Self {
        Self { warehouse, filter }
    }

    pub fn is_connected(&self) -> bool {
        self.warehouse.is_ok()
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn warehouse_description(&self) -> Option<String> {
        self.warehouse.as_ref().ok().map(|warehouse| warehouse.describe())
    }

    /// Events with `SQLDATE` on or after yesterday (UTC), newest filter applied.
    pub async fn fetch_recent_events(&self) -> Result<Vec<EventRecord>, EventsError> {
        self.fetch_recent_events_at(Utc::now()).await
    }

    pub async fn fetch_recent_events_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, EventsError> {
        let warehouse = match &self.warehouse {
            Ok(warehouse) => warehouse,
            Err(e) => {
                error!(error = %e, "events requested but BigQuery client is not initialized");
                return Err(EventsError::Connection(e.clone()));
            }
        };

        let since = self.filter.effective_since(now);
        let request = self.filter.build_query(since)?;
        let started = Instant::now();

        match warehouse.run_events_query(&request).await {
            Ok(records) => {
                info!(
                    rows = records.len(),
                    since = %since,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "served recent events"
                );
                Ok(records)
            }
            Err(e) => {
                error!(error = %e, since = %since, "events query failed");
                Err(e.into())
            }
        }
    }
}
