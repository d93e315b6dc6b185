use std::fmt::Write as _;

use serde::Serialize;
use worldpulse_shared::SqlDate;

use crate::config::{DEFAULT_EVENTS_TABLE, DEFAULT_GKG_TABLE, DEFAULT_RESULT_LIMIT};
use crate::error::QueryError;

/// Fixed, server-configured filter for the recent-events query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventFilter {
    pub events_table: String,
    pub gkg_table: String,
    /// Inclusive lower bound on `SQLDATE`; `None` means yesterday (UTC) at query time.
    pub since_date: Option<SqlDate>,
    pub min_mention_count: Option<u32>,
    pub theme_prefix: Option<String>,
    /// CAMEO root codes (`EventRootCode`), e.g. `14` for protests.
    pub event_categories: Vec<String>,
    pub result_limit: u32,
    pub order_by_mentions: bool,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            events_table: DEFAULT_EVENTS_TABLE.to_owned(),
            gkg_table: DEFAULT_GKG_TABLE.to_owned(),
            since_date: None,
            min_mention_count: None,
            theme_prefix: None,
            event_categories: Vec::new(),
            result_limit: DEFAULT_RESULT_LIMIT,
            order_by_mentions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Int64(i64),
    String(String),
    StringArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameter {
    pub name: &'static str,
    pub value: ParamValue,
}

/// A parameterized standard-SQL statement ready for the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
    pub max_rows: u32,
}

impl QueryRequest {
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters
            .iter()
            .find(|param| param.name == name)
            .map(|param| &param.value)
    }
}

impl EventFilter {
    pub fn effective_since(&self, now: chrono::DateTime<chrono::Utc>) -> SqlDate {
        self.since_date
            .unwrap_or_else(|| SqlDate::yesterday_utc(now))
    }

    /// Build the events query. Rows without actor coordinates never leave the
    /// warehouse.
    pub fn build_query(&self, since: SqlDate) -> Result<QueryRequest, QueryError> {
        let events_table = checked_table(&self.events_table)?;
        if self.result_limit == 0 {
            return Err(QueryError::InvalidFilter(
                "result limit must be positive".to_owned(),
            ));
        }

        let mut parameters = vec![QueryParameter {
            name: "since_date",
            value: ParamValue::Int64(since.as_i64()),
        }];

        let mut sql = String::from(
            "SELECT\n  GLOBALEVENTID,\n  SQLDATE,\n  Actor1Geo_Lat,\n  Actor1Geo_Long,\n  \
             Actor1Geo_FullName AS Actor1Geo_Fullname,\n  SOURCEURL,\n  AvgTone,\n  NumMentions\n",
        );
        let _ = write!(sql, "FROM\n  `{events_table}`\n");
        sql.push_str(
            "WHERE\n  SQLDATE >= @since_date\n  AND Actor1Geo_Lat IS NOT NULL\n  \
             AND Actor1Geo_Long IS NOT NULL\n",
        );

        if let Some(min_mentions) = self.min_mention_count {
            sql.push_str("  AND NumMentions >= @min_mentions\n");
            parameters.push(QueryParameter {
                name: "min_mentions",
                value: ParamValue::Int64(i64::from(min_mentions)),
            });
        }

        if !self.event_categories.is_empty() {
            sql.push_str("  AND EventRootCode IN UNNEST(@event_categories)\n");
            parameters.push(QueryParameter {
                name: "event_categories",
                value: ParamValue::StringArray(self.event_categories.clone()),
            });
        }

        if let Some(prefix) = self.theme_prefix.as_deref() {
            let gkg_table = checked_table(&self.gkg_table)?;
            let _ = write!(
                sql,
                "  AND SOURCEURL IN (\n    SELECT DocumentIdentifier\n    FROM `{gkg_table}`\n    \
                 WHERE DATE(_PARTITIONTIME) >= PARSE_DATE('%Y%m%d', CAST(@since_date AS STRING))\n      \
                 AND EXISTS (\n        SELECT 1 FROM UNNEST(SPLIT(V2Themes, ';')) AS theme\n        \
                 WHERE STARTS_WITH(theme, @theme_prefix)\n      )\n  )\n"
            );
            parameters.push(QueryParameter {
                name: "theme_prefix",
                value: ParamValue::String(prefix.to_owned()),
            });
        }

        if self.order_by_mentions {
            sql.push_str("ORDER BY NumMentions DESC\n");
        }
        let _ = write!(sql, "LIMIT {}", self.result_limit);

        Ok(QueryRequest {
            sql,
            parameters,
            max_rows: self.result_limit,
        })
    }
}

/// Table references are interpolated into the statement, so only
/// `project.dataset.table` shaped identifiers pass.
fn checked_table(table: &str) -> Result<&str, QueryError> {
    let parts: Vec<&str> = table.split('.').collect();
    let well_formed = (2..=3).contains(&parts.len())
        && parts.iter().all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        });
    if well_formed {
        Ok(table)
    } else {
        Err(QueryError::InvalidFilter(format!(
            "invalid table reference: {table}"
        )))
    }
}
