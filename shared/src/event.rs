use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Calendar date in the warehouse's integer `YYYYMMDD` form (GDELT `SQLDATE`).
///
/// Comparisons happen on this integer, never on timestamps, so a date computed
/// in UTC lines up with stored event dates regardless of the caller's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlDate(pub u32);

impl SqlDate {
    pub fn from_date(date: NaiveDate) -> Self {
        let year = date.year().clamp(0, 9999) as u32;
        Self(year * 10_000 + date.month() * 100 + date.day())
    }

    /// The day before `now`, truncated to a UTC calendar date.
    pub fn yesterday_utc(now: DateTime<Utc>) -> Self {
        let yesterday = now - TimeDelta::days(1);
        Self::from_date(yesterday.date_naive())
    }

    pub fn to_date(self) -> Option<NaiveDate> {
        let year = (self.0 / 10_000) as i32;
        let month = (self.0 / 100) % 100;
        let day = self.0 % 100;
        NaiveDate::from_ymd_opt(year, month, day)
    }

    pub fn as_i64(self) -> i64 {
        i64::from(self.0)
    }
}

impl fmt::Display for SqlDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_date() {
            Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            None => write!(f, "{}", self.0),
        }
    }
}

/// One geotagged event row as served by `GET /api/events`.
///
/// Field names follow the GDELT column names so the payload matches the
/// warehouse schema. Coordinates may arrive under either the actor or the
/// action geo columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "GLOBALEVENTID")]
    pub id: i64,
    #[serde(rename = "SQLDATE")]
    pub date: SqlDate,
    #[serde(rename = "Actor1Geo_Lat", alias = "ActionGeo_Lat")]
    pub latitude: f64,
    #[serde(rename = "Actor1Geo_Long", alias = "ActionGeo_Long")]
    pub longitude: f64,
    #[serde(
        rename = "SOURCEURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_url: Option<String>,
    #[serde(rename = "AvgTone", default)]
    pub tone: f64,
    #[serde(
        rename = "NumMentions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mention_count: Option<u32>,
    #[serde(
        rename = "Actor1Geo_Fullname",
        alias = "ActionGeo_Fullname",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub place_name: Option<String>,
}

impl EventRecord {
    /// Source URL, if present and not blank.
    pub fn link(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Human-readable label: the place name when known, otherwise a title
    /// derived from the source URL.
    pub fn display_title(&self) -> String {
        match self.place_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => crate::title::title_from_url(self.source_url.as_deref()),
        }
    }
}

/// Stable error body returned by every failing API route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
