//! In-memory fake of the object-storage REST service.
//!
//! Serves the OAuth password-grant token endpoint and a small slice of the
//! data API (`sobjects`, `query`, `search`) under [`API_ROOT`]. Data calls
//! require `Authorization: OAuth <token>` with a token this server issued.
//!
//! Tests steer failures through [`Service`]: queue forced statuses for the
//! next data calls, revoke every issued token, and read login and data-call
//! counters.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const API_ROOT: &str = "/services/data/v25.0";
pub const TOKEN_PATH: &str = "/services/oauth2/token";

pub const USERNAME: &str = "integration@example.com";
pub const PASSWORD: &str = "hunter2";
pub const SECURITY_TOKEN: &str = "SECTOKEN";
pub const CLIENT_ID: &str = "mock-client";
pub const CLIENT_SECRET: &str = "mock-secret";

type Record = Map<String, Value>;

#[derive(Default)]
pub struct ServiceState {
    instance_url: String,
    tokens: HashSet<String>,
    /// object name -> id -> record
    objects: BTreeMap<String, BTreeMap<String, Record>>,
    forced: VecDeque<u16>,
    logins: usize,
    data_calls: usize,
}

pub type Db = Arc<RwLock<ServiceState>>;

/// Handle to one fake service instance and its state.
#[derive(Clone, Default)]
pub struct Service {
    db: Db,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self) -> Router {
        let data = Router::new()
            .route(&format!("{API_ROOT}/sobjects"), get(describe_global))
            .route(&format!("{API_ROOT}/sobjects/{{object}}"), post(create_record))
            .route(&format!("{API_ROOT}/sobjects/{{object}}/describe"), get(describe_object))
            .route(
                &format!("{API_ROOT}/sobjects/{{object}}/{{id}}"),
                get(get_record).patch(update_record).delete(delete_record),
            )
            .route(
                &format!("{API_ROOT}/sobjects/{{object}}/{{key}}/{{value}}"),
                get(get_nested).patch(upsert_external).delete(delete_external),
            )
            .route(&format!("{API_ROOT}/query"), get(query))
            .route(&format!("{API_ROOT}/search"), get(search))
            .route_layer(middleware::from_fn_with_state(self.db.clone(), guard));

        Router::new()
            .route(TOKEN_PATH, post(issue_token))
            .merge(data)
            .with_state(self.db.clone())
    }

    /// Serve on `listener`, advertising its address as the instance URL.
    pub async fn serve(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        self.set_instance_url(&format!("http://{addr}")).await;
        axum::serve(listener, self.router()).await
    }

    pub async fn set_instance_url(&self, url: &str) {
        self.db.write().await.instance_url = url.to_string();
    }

    /// Answer the next data call with `status` instead of handling it.
    pub async fn force_status(&self, status: u16) {
        self.db.write().await.forced.push_back(status);
    }

    /// Invalidate every issued token, as an expired session would.
    pub async fn revoke_tokens(&self) {
        self.db.write().await.tokens.clear();
    }

    pub async fn logins(&self) -> usize {
        self.db.read().await.logins
    }

    pub async fn data_calls(&self) -> usize {
        self.db.read().await.data_calls
    }

    /// Store `record` directly, returning its new id.
    pub async fn insert(&self, object: &str, record: Value) -> String {
        let fields = match record {
            Value::Object(map) => map,
            _ => Record::new(),
        };
        insert_record(&mut *self.db.write().await, object, fields)
    }

    pub async fn record(&self, object: &str, id: &str) -> Option<Value> {
        let state = self.db.read().await;
        state
            .objects
            .get(object)
            .and_then(|records| records.get(id))
            .map(|r| Value::Object(r.clone()))
    }
}

pub fn app() -> Router {
    Service::new().router()
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    Service::new().serve(listener).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn api_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!([{ "message": message, "errorCode": code }]))).into_response()
}

fn not_found() -> Response {
    api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "The requested resource does not exist")
}

fn id_prefix(object: &str) -> &'static str {
    match object {
        "Account" => "001",
        "Contact" => "003",
        "Attachment" => "00P",
        _ => "a00",
    }
}

fn insert_record(state: &mut ServiceState, object: &str, mut fields: Record) -> String {
    let id = format!("{}{}", id_prefix(object), &Uuid::new_v4().simple().to_string()[..15]);
    fields.insert("Id".to_string(), Value::String(id.clone()));
    if object == "Attachment" {
        let length = fields
            .get("Body")
            .and_then(Value::as_str)
            .and_then(|b| BASE64.decode(b).ok())
            .map(|bytes| bytes.len());
        if let Some(length) = length {
            fields.insert("BodyLength".to_string(), json!(length));
        }
    }
    state
        .objects
        .entry(object.to_string())
        .or_default()
        .insert(id.clone(), fields);
    id
}

fn view(object: &str, record: &Record, fields: Option<&str>) -> Value {
    let mut out = Record::new();
    let id = record.get("Id").and_then(Value::as_str).unwrap_or_default();
    out.insert(
        "attributes".to_string(),
        json!({ "type": object, "url": format!("{API_ROOT}/sobjects/{object}/{id}") }),
    );
    match fields {
        Some(list) => {
            for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                out.insert(name.to_string(), record.get(name).cloned().unwrap_or(Value::Null));
            }
        }
        None => out.extend(record.iter().map(|(k, v)| (k.clone(), v.clone()))),
    }
    Value::Object(out)
}

fn find_by(records: &BTreeMap<String, Record>, field: &str, value: &str) -> Option<String> {
    records.iter().find_map(|(id, record)| {
        let matches = match record.get(field) {
            Some(Value::String(s)) => s == value,
            Some(other) => other.to_string() == value,
            None => false,
        };
        matches.then(|| id.clone())
    })
}

fn created(id: &str) -> Response {
    (StatusCode::CREATED, Json(json!({ "id": id, "success": true, "errors": [] }))).into_response()
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

async fn issue_token(State(db): State<Db>, Query(params): Query<HashMap<String, String>>) -> Response {
    let param = |name: &str| params.get(name).map(String::as_str);
    let expected_password = format!("{PASSWORD}{SECURITY_TOKEN}");
    let valid = param("grant_type") == Some("password")
        && param("client_id") == Some(CLIENT_ID)
        && param("client_secret") == Some(CLIENT_SECRET)
        && param("username") == Some(USERNAME)
        && param("password") == Some(expected_password.as_str());

    if !valid {
        tracing::info!(user = ?param("username"), "rejecting login");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "authentication failure" })),
        )
            .into_response();
    }

    let mut state = db.write().await;
    let token = format!("00D!{}", Uuid::new_v4().simple());
    state.tokens.insert(token.clone());
    state.logins += 1;
    tracing::info!(logins = state.logins, "issued access token");
    Json(json!({
        "access_token": token,
        "instance_url": state.instance_url,
        "token_type": "Bearer",
        "id": format!("https://login.example.com/id/00D/{}", USERNAME),
    }))
    .into_response()
}

/// Counts data calls, applies forced statuses, and checks the OAuth header.
async fn guard(State(db): State<Db>, headers: HeaderMap, request: Request, next: Next) -> Response {
    {
        let mut state = db.write().await;
        state.data_calls += 1;
        if let Some(code) = state.forced.pop_front() {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            tracing::debug!(%status, "forcing status");
            return api_error(status, "FORCED", "forced by test");
        }
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("OAuth "));
        if !token.is_some_and(|t| state.tokens.contains(t)) {
            return api_error(StatusCode::UNAUTHORIZED, "INVALID_SESSION_ID", "Session expired or invalid");
        }
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Describe
// ---------------------------------------------------------------------------

async fn describe_global(State(db): State<Db>) -> Json<Value> {
    let state = db.read().await;
    let mut names: Vec<&str> = vec!["Account", "Attachment", "Contact"];
    names.extend(state.objects.keys().map(String::as_str));
    names.sort_unstable();
    names.dedup();
    let sobjects: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
    Json(json!({ "encoding": "UTF-8", "maxBatchSize": 200, "sobjects": sobjects }))
}

async fn describe_object(State(db): State<Db>, Path(object): Path<String>) -> Json<Value> {
    let state = db.read().await;
    let mut fields: Vec<&str> = vec!["Id"];
    if let Some(records) = state.objects.get(&object) {
        fields.extend(records.values().flat_map(|r| r.keys().map(String::as_str)));
    }
    fields.sort_unstable();
    fields.dedup();
    let fields: Vec<Value> = fields.iter().map(|f| json!({ "name": f })).collect();
    Json(json!({ "name": object, "fields": fields }))
}

// ---------------------------------------------------------------------------
// Records by id
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FieldsQuery {
    fields: Option<String>,
}

async fn create_record(
    State(db): State<Db>,
    Path(object): Path<String>,
    Json(input): Json<Record>,
) -> Response {
    let id = insert_record(&mut *db.write().await, &object, input);
    created(&id)
}

async fn get_record(
    State(db): State<Db>,
    Path((object, id)): Path<(String, String)>,
    Query(params): Query<FieldsQuery>,
) -> Response {
    let state = db.read().await;
    match state.objects.get(&object).and_then(|records| records.get(&id)) {
        Some(record) => Json(view(&object, record, params.fields.as_deref())).into_response(),
        None => not_found(),
    }
}

async fn update_record(
    State(db): State<Db>,
    Path((object, id)): Path<(String, String)>,
    Json(input): Json<Record>,
) -> Response {
    let mut state = db.write().await;
    match state.objects.get_mut(&object).and_then(|records| records.get_mut(&id)) {
        Some(record) => {
            record.extend(input.into_iter().filter(|(k, _)| k != "Id"));
            StatusCode::NO_CONTENT.into_response()
        }
        None => not_found(),
    }
}

async fn delete_record(State(db): State<Db>, Path((object, id)): Path<(String, String)>) -> Response {
    let mut state = db.write().await;
    match state.objects.get_mut(&object).and_then(|records| records.remove(&id)) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(),
    }
}

// ---------------------------------------------------------------------------
// Blob fields and external ids
// ---------------------------------------------------------------------------

/// `{key}/{value}` is either `{id}/{blob field}` or `{external field}/{value}`.
async fn get_nested(State(db): State<Db>, Path((object, key, value)): Path<(String, String, String)>) -> Response {
    let state = db.read().await;
    let Some(records) = state.objects.get(&object) else {
        return not_found();
    };

    if let Some(record) = records.get(&key) {
        let Some(bytes) = record
            .get(&value)
            .and_then(Value::as_str)
            .and_then(|encoded| BASE64.decode(encoded).ok())
        else {
            return not_found();
        };
        let content_type = record
            .get("ContentType")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream")
            .to_string();
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    match find_by(records, &key, &value).and_then(|id| records.get(&id)) {
        Some(record) => Json(view(&object, record, None)).into_response(),
        None => not_found(),
    }
}

async fn upsert_external(
    State(db): State<Db>,
    Path((object, field, value)): Path<(String, String, String)>,
    Json(mut input): Json<Record>,
) -> Response {
    let mut state = db.write().await;
    let existing = state
        .objects
        .get(&object)
        .and_then(|records| find_by(records, &field, &value));
    match existing {
        Some(id) => {
            if let Some(record) = state.objects.get_mut(&object).and_then(|r| r.get_mut(&id)) {
                record.extend(input.into_iter().filter(|(k, _)| k != "Id"));
            }
            StatusCode::NO_CONTENT.into_response()
        }
        None => {
            input.insert(field, Value::String(value));
            let id = insert_record(&mut state, &object, input);
            created(&id)
        }
    }
}

async fn delete_external(
    State(db): State<Db>,
    Path((object, field, value)): Path<(String, String, String)>,
) -> Response {
    let mut state = db.write().await;
    let Some(records) = state.objects.get_mut(&object) else {
        return not_found();
    };
    match find_by(records, &field, &value) {
        Some(id) => {
            records.remove(&id);
            StatusCode::NO_CONTENT.into_response()
        }
        None => not_found(),
    }
}

// ---------------------------------------------------------------------------
// Query and search
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Statement {
    q: String,
}

/// Only `FROM <object>` is honoured; every record of that object matches.
async fn query(State(db): State<Db>, Query(statement): Query<Statement>) -> Response {
    let words: Vec<&str> = statement.q.split_whitespace().collect();
    let Some(object) = words
        .windows(2)
        .find(|pair| pair[0].eq_ignore_ascii_case("from"))
        .map(|pair| pair[1])
    else {
        return api_error(StatusCode::BAD_REQUEST, "MALFORMED_QUERY", "missing FROM clause");
    };

    let state = db.read().await;
    let records: Vec<Value> = state
        .objects
        .get(object)
        .map(|records| records.values().map(|r| view(object, r, None)).collect())
        .unwrap_or_default();
    Json(json!({ "totalSize": records.len(), "done": true, "records": records })).into_response()
}

/// `FIND {term}` matches records with any string field containing `term`.
async fn search(State(db): State<Db>, Query(statement): Query<Statement>) -> Response {
    let term = statement
        .q
        .split_once('{')
        .and_then(|(_, rest)| rest.split_once('}'))
        .map(|(term, _)| term.to_lowercase());
    let Some(term) = term else {
        return api_error(StatusCode::BAD_REQUEST, "MALFORMED_SEARCH", "missing {term}");
    };

    let state = db.read().await;
    let mut hits = Vec::new();
    for (object, records) in &state.objects {
        for record in records.values() {
            let matched = record
                .values()
                .filter_map(Value::as_str)
                .any(|s| s.to_lowercase().contains(&term));
            if matched {
                hits.push(view(object, record, Some("Id")));
            }
        }
    }
    Json(json!({ "searchRecords": hits })).into_response()
}
