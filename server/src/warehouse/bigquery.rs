use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use worldpulse_shared::{EventRecord, SqlDate};

use crate::config::{self, BIGQUERY_API_BASE, METADATA_PROJECT_URL};
use crate::error::{ConnectionError, QueryError};
use crate::query::{ParamValue, QueryParameter, QueryRequest};
use crate::warehouse::credentials::{Credentials, TokenProvider};
use crate::warehouse::{QueryFuture, Warehouse};

const METADATA_TIMEOUT: Duration = Duration::from_secs(2);
// BigQuery caps a single long-poll at 10s regardless of what we ask for.
const MAX_POLL_WAIT_MS: u128 = 10_000;

/// BigQuery REST client for the events query (`jobs.query` +
/// `jobs.getQueryResults`).
pub struct BigQueryClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    project_id: String,
    location: String,
    api_base: String,
    query_timeout: Duration,
}

impl BigQueryClient {
    /// Build a client from ambient configuration. Fails when no usable
    /// credentials or billing project can be found.
    pub async fn connect(http: reqwest::Client) -> Result<Self, ConnectionError> {
        let credentials = Credentials::discover()?;
        let project_id = match config::project_override()
            .or_else(|| credentials.project_id().map(str::to_owned))
        {
            Some(project_id) => project_id,
            None if matches!(credentials, Credentials::Metadata) => {
                metadata_project_id(&http)
                    .await
                    .ok_or(ConnectionError::MissingProject)?
            }
            None => return Err(ConnectionError::MissingProject),
        };

        Ok(Self::new(
            http,
            credentials,
            project_id,
            config::bigquery_location(),
            config::query_timeout(),
        ))
    }

    pub fn new(
        http: reqwest::Client,
        credentials: Credentials,
        project_id: String,
        location: String,
        query_timeout: Duration,
    ) -> Self {
        Self {
            tokens: TokenProvider::new(credentials, http.clone()),
            http,
            project_id,
            location,
            api_base: BIGQUERY_API_BASE.to_owned(),
            query_timeout,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<EventRecord>, QueryError> {
        let started = Instant::now();
        let deadline = started + self.query_timeout;
        let token = self.tokens.access_token().await?;

        let url = format!("{}/projects/{}/queries", self.api_base, self.project_id);
        let body = query_body(request, &self.location, poll_wait_ms(deadline));
        let mut page = self
            .send(self.http.post(url).bearer_auth(&token).json(&body))
            .await?;

        while !page.job_complete {
            if Instant::now() >= deadline {
                return Err(QueryError::Timeout(self.query_timeout.as_secs()));
            }
            let job = page.job_reference.clone().ok_or_else(|| {
                QueryError::Decode("incomplete job without jobReference".to_owned())
            })?;
            debug!(job_id = %job.job_id, "query still running, polling for results");
            page = self
                .results_page(&token, &job, None, request.max_rows, deadline)
                .await?;
        }

        let job = page.job_reference.clone();
        let schema = page
            .schema
            .take()
            .ok_or_else(|| QueryError::Decode("completed query without schema".to_owned()))?;
        let columns = Columns::from_schema(&schema)?;
        let max_rows = request.max_rows as usize;
        let mut records = Vec::new();
        let mut skipped = 0_usize;

        loop {
            for row in &page.rows {
                match columns.decode(row)? {
                    Some(record) => records.push(record),
                    None => skipped += 1,
                }
            }

            let Some(page_token) = page.page_token.take() else {
                break;
            };
            if records.len() >= max_rows {
                break;
            }
            if Instant::now() >= deadline {
                return Err(QueryError::Timeout(self.query_timeout.as_secs()));
            }
            let job = job.as_ref().ok_or_else(|| {
                QueryError::Decode("paged result without jobReference".to_owned())
            })?;
            page = self
                .results_page(&token, job, Some(&page_token), request.max_rows, deadline)
                .await?;
        }

        records.truncate(max_rows);
        if skipped > 0 {
            warn!(skipped, "dropped rows without coordinates");
        }
        info!(
            rows = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "BigQuery events query completed"
        );
        Ok(records)
    }

    async fn results_page(
        &self,
        token: &str,
        job: &JobReference,
        page_token: Option<&str>,
        max_rows: u32,
        deadline: Instant,
    ) -> Result<QueryResponse, QueryError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_base, job.project_id, job.job_id
        );
        let location = job.location.as_deref().unwrap_or(self.location.as_str());
        let mut params = vec![
            ("location", location.to_owned()),
            ("maxResults", max_rows.to_string()),
            ("timeoutMs", poll_wait_ms(deadline).to_string()),
        ];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_owned()));
        }
        self.send(self.http.get(url).bearer_auth(token).query(&params))
            .await
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<QueryResponse, QueryError> {
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                QueryError::Timeout(self.query_timeout.as_secs())
            } else {
                QueryError::Transport(e.to_string())
            }
        })?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&bytes)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_owned());
            return Err(QueryError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| QueryError::Decode(e.to_string()))
    }
}

impl Warehouse for BigQueryClient {
    fn run_events_query<'a>(&'a self, request: &'a QueryRequest) -> QueryFuture<'a> {
        Box::pin(self.query(request))
    }

    fn describe(&self) -> String {
        format!("bigquery:{}@{}", self.project_id, self.location)
    }
}

async fn metadata_project_id(http: &reqwest::Client) -> Option<String> {
    let resp = http
        .get(METADATA_PROJECT_URL)
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .inspect_err(|e| warn!(error = %e, "metadata server unreachable"))
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let project = resp.text().await.ok()?;
    let project = project.trim();
    (!project.is_empty()).then(|| project.to_owned())
}

fn poll_wait_ms(deadline: Instant) -> u128 {
    deadline
        .saturating_duration_since(Instant::now())
        .as_millis()
        .clamp(1, MAX_POLL_WAIT_MS)
}

fn query_body(request: &QueryRequest, location: &str, timeout_ms: u128) -> Value {
    json!({
        "query": request.sql,
        "useLegacySql": false,
        "parameterMode": "NAMED",
        "queryParameters": request.parameters.iter().map(parameter_json).collect::<Vec<_>>(),
        "location": location,
        "maxResults": request.max_rows,
        "timeoutMs": timeout_ms as u64,
    })
}

fn parameter_json(param: &QueryParameter) -> Value {
    match &param.value {
        ParamValue::Int64(value) => json!({
            "name": param.name,
            "parameterType": { "type": "INT64" },
            "parameterValue": { "value": value.to_string() },
        }),
        ParamValue::String(value) => json!({
            "name": param.name,
            "parameterType": { "type": "STRING" },
            "parameterValue": { "value": value },
        }),
        ParamValue::StringArray(values) => json!({
            "name": param.name,
            "parameterType": { "type": "ARRAY", "arrayType": { "type": "STRING" } },
            "parameterValue": {
                "arrayValues": values.iter().map(|v| json!({ "value": v })).collect::<Vec<_>>(),
            },
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

/// Column positions of the event fields within a result schema.
#[derive(Debug)]
struct Columns {
    id: usize,
    date: usize,
    latitude: usize,
    longitude: usize,
    source_url: Option<usize>,
    tone: Option<usize>,
    mention_count: Option<usize>,
    place_name: Option<usize>,
}

impl Columns {
    fn from_schema(schema: &TableSchema) -> Result<Self, QueryError> {
        let find = |names: &[&str]| {
            schema
                .fields
                .iter()
                .position(|field| names.iter().any(|name| field.name.eq_ignore_ascii_case(name)))
        };
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| {
                QueryError::Decode(format!("result is missing column {}", names[0]))
            })
        };

        Ok(Self {
            id: require(&["GLOBALEVENTID"])?,
            date: require(&["SQLDATE"])?,
            latitude: require(&["Actor1Geo_Lat", "ActionGeo_Lat"])?,
            longitude: require(&["Actor1Geo_Long", "ActionGeo_Long"])?,
            source_url: find(&["SOURCEURL"]),
            tone: find(&["AvgTone"]),
            mention_count: find(&["NumMentions"]),
            place_name: find(&["Actor1Geo_Fullname", "ActionGeo_Fullname"]),
        })
    }

    /// `Ok(None)` for rows without coordinates; malformed rows fail the query.
    fn decode(&self, row: &TableRow) -> Result<Option<EventRecord>, QueryError> {
        let cell = |index: usize| row.f.get(index).map(|cell| &cell.v).unwrap_or(&Value::Null);

        let (Some(latitude), Some(longitude)) =
            (cell_f64(cell(self.latitude)), cell_f64(cell(self.longitude)))
        else {
            return Ok(None);
        };
        let id = cell_i64(cell(self.id))
            .ok_or_else(|| QueryError::Decode("row without GLOBALEVENTID".to_owned()))?;
        let date = cell_i64(cell(self.date))
            .and_then(|value| u32::try_from(value).ok())
            .map(SqlDate)
            .ok_or_else(|| QueryError::Decode(format!("event {id} has no valid SQLDATE")))?;

        Ok(Some(EventRecord {
            id,
            date,
            latitude,
            longitude,
            source_url: self.source_url.and_then(|i| cell_string(cell(i))),
            tone: self.tone.and_then(|i| cell_f64(cell(i))).unwrap_or(0.0),
            mention_count: self
                .mention_count
                .and_then(|i| cell_i64(cell(i)))
                .map(|count| u32::try_from(count.max(0)).unwrap_or(u32::MAX)),
            place_name: self.place_name.and_then(|i| cell_string(cell(i))),
        }))
    }
}

fn cell_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn cell_i64(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn cell_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};

    use super::*;
    use crate::query::EventFilter;

    fn schema_json() -> Value {
        json!({ "fields": [
            { "name": "GLOBALEVENTID", "type": "INTEGER" },
            { "name": "SQLDATE", "type": "INTEGER" },
            { "name": "Actor1Geo_Lat", "type": "FLOAT" },
            { "name": "Actor1Geo_Long", "type": "FLOAT" },
            { "name": "Actor1Geo_Fullname", "type": "STRING" },
            { "name": "SOURCEURL", "type": "STRING" },
            { "name": "AvgTone", "type": "FLOAT" },
            { "name": "NumMentions", "type": "INTEGER" }
        ]})
    }

    fn row_json(id: i64, lat: Value, tone: &str, mentions: Value) -> Value {
        json!({ "f": [
            { "v": id.to_string() },
            { "v": "20250601" },
            { "v": lat },
            { "v": "139.76" },
            { "v": null },
            { "v": format!("https://example.com/story-{id}") },
            { "v": tone },
            { "v": mentions }
        ]})
    }

    #[test]
    fn decodes_rows_from_string_cells() {
        let schema: TableSchema = serde_json::from_value(schema_json()).expect("schema");
        let columns = Columns::from_schema(&schema).expect("columns");
        let row: TableRow =
            serde_json::from_value(row_json(9, json!("35.68"), "-2.5", json!("14"))).expect("row");

        let record = columns.decode(&row).expect("decodes").expect("has coordinates");
        assert_eq!(record.id, 9);
        assert_eq!(record.date, SqlDate(20250601));
        assert!((record.latitude - 35.68).abs() < 1e-9);
        assert!((record.tone + 2.5).abs() < 1e-9);
        assert_eq!(record.mention_count, Some(14));
        assert!(record.place_name.is_none());
        assert_eq!(record.link(), Some("https://example.com/story-9"));
    }

    #[test]
    fn rows_without_coordinates_are_skipped() {
        let schema: TableSchema = serde_json::from_value(schema_json()).expect("schema");
        let columns = Columns::from_schema(&schema).expect("columns");
        let row: TableRow =
            serde_json::from_value(row_json(9, Value::Null, "0", Value::Null)).expect("row");
        assert!(columns.decode(&row).expect("decodes").is_none());
    }

    #[test]
    fn missing_required_column_is_a_decode_error() {
        let schema: TableSchema =
            serde_json::from_value(json!({ "fields": [{ "name": "SQLDATE" }] })).expect("schema");
        assert!(matches!(
            Columns::from_schema(&schema),
            Err(QueryError::Decode(_))
        ));
    }

    #[test]
    fn parameters_use_named_bigquery_shape() {
        let request = EventFilter {
            event_categories: vec!["14".into()],
            ..EventFilter::default()
        }
        .build_query(SqlDate(20250601))
        .expect("query builds");
        let body = query_body(&request, "US", 5_000);

        assert_eq!(body["useLegacySql"], false);
        assert_eq!(body["parameterMode"], "NAMED");
        assert_eq!(body["location"], "US");
        assert_eq!(body["maxResults"], 1000);
        let params = body["queryParameters"].as_array().expect("params array");
        assert_eq!(params[0]["name"], "since_date");
        assert_eq!(params[0]["parameterType"]["type"], "INT64");
        assert_eq!(params[0]["parameterValue"]["value"], "20250601");
        assert_eq!(params[1]["parameterType"]["arrayType"]["type"], "STRING");
        assert_eq!(params[1]["parameterValue"]["arrayValues"][0]["value"], "14");
    }

    #[derive(Clone, Default)]
    struct StubState {
        bodies: Arc<Mutex<Vec<Value>>>,
        page_tokens: Arc<Mutex<Vec<Option<String>>>>,
        auth_headers: Arc<Mutex<Vec<String>>>,
    }

    async fn stub_query(
        State(state): State<StubState>,
        Path(project): Path<String>,
        headers: HeaderMap,
        axum::Json(body): axum::Json<Value>,
    ) -> (StatusCode, axum::Json<Value>) {
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            state.auth_headers.lock().expect("lock").push(auth.to_owned());
        }
        let sql = body["query"].as_str().unwrap_or_default().to_owned();
        state.bodies.lock().expect("lock").push(body);
        if sql.contains("broken") {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "error": { "code": 400, "message": "Syntax error: broken" } })),
            );
        }
        (
            StatusCode::OK,
            axum::Json(json!({
                "jobComplete": false,
                "jobReference": { "projectId": project, "jobId": "job-1", "location": "US" }
            })),
        )
    }

    async fn stub_results(
        State(state): State<StubState>,
        Path((project, job)): Path<(String, String)>,
        Query(params): Query<HashMap<String, String>>,
    ) -> axum::Json<Value> {
        let page_token = params.get("pageToken").cloned();
        state.page_tokens.lock().expect("lock").push(page_token.clone());
        let reference = json!({ "projectId": project, "jobId": job, "location": "US" });
        match page_token.as_deref() {
            None => axum::Json(json!({
                "jobComplete": true,
                "jobReference": reference,
                "schema": schema_json(),
                "rows": [
                    row_json(1, json!("35.0"), "3.1", json!("40")),
                    row_json(2, Value::Null, "0", Value::Null)
                ],
                "pageToken": "page-2"
            })),
            Some(_) => axum::Json(json!({
                "jobComplete": true,
                "jobReference": reference,
                "rows": [row_json(3, json!("-12.5"), "-7", Value::Null)]
            })),
        }
    }

    async fn spawn_stub(state: StubState) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route("/projects/{project}/queries", post(stub_query))
            .route("/projects/{project}/queries/{job}", get(stub_results))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve stub");
        });
        (addr, handle)
    }

    fn stub_client(addr: SocketAddr) -> BigQueryClient {
        BigQueryClient::new(
            reqwest::Client::new(),
            Credentials::AccessToken("test-token".into()),
            "demo".into(),
            "US".into(),
            Duration::from_secs(10),
        )
        .with_api_base(format!("http://{addr}/"))
    }

    #[tokio::test]
    async fn polls_incomplete_job_and_collects_every_page() {
        let state = StubState::default();
        let (addr, handle) = spawn_stub(state.clone()).await;
        let client = stub_client(addr);
        let request = EventFilter::default()
            .build_query(SqlDate(20250601))
            .expect("query builds");

        let records = client
            .run_events_query(&request)
            .await
            .expect("query succeeds");

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(
            *state.page_tokens.lock().expect("lock"),
            vec![None, Some("page-2".to_string())]
        );
        assert_eq!(
            state.auth_headers.lock().expect("lock").as_slice(),
            ["Bearer test-token".to_string()]
        );
        assert_eq!(client.describe(), "bigquery:demo@US");

        handle.abort();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn rejected_query_propagates_cause() {
        let state = StubState::default();
        let (addr, handle) = spawn_stub(state).await;
        let client = stub_client(addr);
        let request = QueryRequest {
            sql: "SELECT broken".into(),
            parameters: Vec::new(),
            max_rows: 10,
        };

        let err = client
            .run_events_query(&request)
            .await
            .expect_err("query should fail");
        match err {
            QueryError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Syntax error: broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        handle.abort();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let client = BigQueryClient::new(
            reqwest::Client::new(),
            Credentials::AccessToken("t".into()),
            "demo".into(),
            "US".into(),
            Duration::from_secs(5),
        )
        .with_api_base("http://127.0.0.1:9");
        let request = QueryRequest {
            sql: "SELECT 1".into(),
            parameters: Vec::new(),
            max_rows: 1,
        };
        assert!(matches!(
            client.run_events_query(&request).await,
            Err(QueryError::Transport(_))
        ));
    }
}
