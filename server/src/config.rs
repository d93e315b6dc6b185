use std::path::PathBuf;
use std::time::Duration;

use worldpulse_shared::{InitialView, MapConfig};

use crate::query::EventFilter;

pub const BIGQUERY_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
pub const METADATA_PROJECT_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/project/project-id";
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";

pub const DEFAULT_EVENTS_TABLE: &str = "gdelt-bq.gdeltv2.events";
pub const DEFAULT_GKG_TABLE: &str = "gdelt-bq.gdeltv2.gkg_partitioned";
// The public GDELT dataset lives in the US multi-region.
pub const DEFAULT_BIGQUERY_LOCATION: &str = "US";
pub const DEFAULT_RESULT_LIMIT: u32 = 1000;
pub const MAX_RESULT_LIMIT: u32 = 10_000;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_MAP_TILE_URL: &str =
    "https://api.maptiler.com/maps/dataviz-dark/256/{z}/{x}/{y}.png?key={key}";
pub const DEFAULT_MAP_ATTRIBUTION: &str = "\u{a9} MapTiler \u{a9} OpenStreetMap contributors";

pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 35;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const DEFAULT_STATIC_DIR: &str = "client/dist";

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_non_empty(name).map(|value| {
        let normalized = value.to_ascii_lowercase();
        matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
    })
}

pub fn server_port() -> u16 {
    env_non_empty("SERVER_PORT")
        .or_else(|| env_non_empty("PORT"))
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SERVER_PORT)
}

pub fn static_dir() -> PathBuf {
    env_non_empty("STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR))
}

pub fn credentials_json() -> Option<String> {
    env_non_empty("GOOGLE_APPLICATION_CREDENTIALS_JSON")
}

pub fn access_token() -> Option<String> {
    env_non_empty("GOOGLE_OAUTH_ACCESS_TOKEN")
}

pub fn credentials_file() -> Option<PathBuf> {
    env_non_empty("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from)
}

/// gcloud's application-default credentials file.
pub fn well_known_credentials_file() -> Option<PathBuf> {
    if let Some(dir) = env_non_empty("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    if cfg!(windows) {
        env_non_empty("APPDATA")
            .map(|dir| PathBuf::from(dir).join("gcloud/application_default_credentials.json"))
    } else {
        env_non_empty("HOME").map(|dir| {
            PathBuf::from(dir).join(".config/gcloud/application_default_credentials.json")
        })
    }
}

pub fn project_override() -> Option<String> {
    env_non_empty("BIGQUERY_PROJECT_ID").or_else(|| env_non_empty("GOOGLE_CLOUD_PROJECT"))
}

pub fn bigquery_location() -> String {
    env_non_empty("BIGQUERY_LOCATION").unwrap_or_else(|| DEFAULT_BIGQUERY_LOCATION.to_owned())
}

pub fn query_timeout() -> Duration {
    env_non_empty("BIGQUERY_QUERY_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS))
}

pub fn upstream_http_timeout() -> Duration {
    env_non_empty("UPSTREAM_HTTP_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS))
}

pub fn upstream_connect_timeout() -> Duration {
    env_non_empty("UPSTREAM_CONNECT_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS))
}

/// Filter options applied to every `/api/events` query.
pub fn event_filter() -> EventFilter {
    let min_mention_count = env_non_empty("EVENTS_MIN_MENTIONS")
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0);
    let event_categories = env_non_empty("EVENTS_CATEGORIES")
        .map(|value| parse_categories(&value))
        .unwrap_or_default();
    let order_by_mentions =
        env_flag("EVENTS_ORDER_BY_MENTIONS").unwrap_or(min_mention_count.is_some());

    EventFilter {
        events_table: env_non_empty("EVENTS_TABLE")
            .unwrap_or_else(|| DEFAULT_EVENTS_TABLE.to_owned()),
        gkg_table: env_non_empty("GKG_TABLE").unwrap_or_else(|| DEFAULT_GKG_TABLE.to_owned()),
        since_date: None,
        min_mention_count,
        theme_prefix: env_non_empty("EVENTS_THEME_PREFIX"),
        event_categories,
        result_limit: env_non_empty("EVENTS_RESULT_LIMIT")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(MAX_RESULT_LIMIT))
            .unwrap_or(DEFAULT_RESULT_LIMIT),
        order_by_mentions,
    }
}

/// CAMEO root codes are two digits; anything else is dropped.
fn parse_categories(raw: &str) -> Vec<String> {
    let mut codes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty() && code.len() <= 2)
        .filter(|code| code.chars().all(|c| c.is_ascii_digit()))
        .map(|code| format!("{:0>2}", code))
        .collect();
    codes.sort();
    codes.dedup();
    codes
}

/// Map provider settings; `None` when no API key is configured.
pub fn map_config() -> Option<MapConfig> {
    let api_key = env_non_empty("MAP_API_KEY")?;
    Some(MapConfig {
        api_key,
        tile_url_template: env_non_empty("MAP_TILE_URL")
            .unwrap_or_else(|| DEFAULT_MAP_TILE_URL.to_owned()),
        attribution: env_non_empty("MAP_ATTRIBUTION")
            .unwrap_or_else(|| DEFAULT_MAP_ATTRIBUTION.to_owned()),
        initial_view: InitialView::default(),
    })
}
