use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const APP_ID: &str = "TESTAPP";
pub const API_KEY: &str = "test-api-key";

const APP_ID_HEADER: &str = "x-algolia-application-id";
const API_KEY_HEADER: &str = "x-algolia-api-key";

/// Behavior injected in front of every route.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    None,
    /// Answer every request with this status and `{"message": ...}`.
    Status(u16, String),
    /// Answer every request with 200 and a body that is not JSON.
    Malformed,
    /// Sleep before handling the request normally.
    Delay(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct IndexData {
    pub objects: BTreeMap<String, Map<String, Value>>,
    pub settings: Map<String, Value>,
}

pub type Db = Arc<RwLock<HashMap<String, IndexData>>>;

#[derive(Clone)]
pub struct MockState {
    db: Db,
    keys: Arc<RwLock<HashMap<String, Value>>>,
    fault: Arc<RwLock<Fault>>,
    hits: Arc<AtomicUsize>,
    next_task: Arc<AtomicU64>,
    app_id: String,
    api_key: String,
}

impl MockState {
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            db: Arc::default(),
            keys: Arc::default(),
            fault: Arc::new(RwLock::new(Fault::None)),
            hits: Arc::default(),
            next_task: Arc::new(AtomicU64::new(1)),
            app_id: app_id.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn set_fault(&self, fault: Fault) {
        *self.fault.write().await = fault;
    }

    /// Requests received, including rejected and faulted ones.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    fn task_id(&self) -> u64 {
        self.next_task.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self::new(APP_ID, API_KEY)
    }
}

type ApiFailure = (StatusCode, Json<Value>);
type Reply = Result<(StatusCode, Json<Value>), ApiFailure>;

fn failure(status: StatusCode, message: &str) -> ApiFailure {
    (status, Json(json!({ "message": message })))
}

fn ok(body: Value) -> Reply {
    Ok((StatusCode::OK, Json(body)))
}

pub fn app() -> Router {
    app_with_state(MockState::default())
}

pub fn app_with_state(state: MockState) -> Router {
    // The multi-index query route has a literal `*` segment.
    Router::new()
        .without_v07_checks()
        .route("/1/indexes", get(list_indexes))
        .route("/1/indexes/*/queries", post(multiple_queries))
        .route("/1/indexes/{index}", post(add_object).delete(delete_index))
        .route("/1/indexes/{index}/operation", post(index_operation))
        .route("/1/indexes/{index}/query", post(search))
        .route("/1/indexes/{index}/settings", get(get_settings).put(set_settings))
        .route("/1/indexes/{index}/clear", post(clear_index))
        .route("/1/indexes/{index}/task/{task_id}", get(get_task))
        .route(
            "/1/indexes/{index}/{object_id}",
            get(get_object).put(put_object).delete(delete_object),
        )
        .route("/1/indexes/{index}/{object_id}/partial", post(partial_update))
        .route("/1/keys", get(list_keys).post(add_key))
        .route("/1/keys/{key}", get(get_key).put(update_key).delete(delete_key))
        .route("/1/logs", get(get_logs))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), guard))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, MockState::default()).await
}

pub async fn run_with_state(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

/// Counts the request, applies the injected fault, then checks credentials.
async fn guard(State(state): State<MockState>, request: Request, next: Next) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let fault = state.fault.read().await.clone();
    if fault != Fault::None {
        tracing::debug!(path = %request.uri().path(), ?fault, "injecting fault");
    }
    match fault {
        Fault::None => {}
        Fault::Status(status, message) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return failure(status, &message).into_response();
        }
        Fault::Malformed => return (StatusCode::OK, "<html>upstream error</html>").into_response(),
        Fault::Delay(delay) => tokio::time::sleep(delay).await,
    }

    if !authorized(request.headers(), &state) {
        return failure(StatusCode::FORBIDDEN, "Invalid Application-ID or API key").into_response();
    }
    next.run(request).await
}

fn authorized(headers: &HeaderMap, state: &MockState) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    header(APP_ID_HEADER) == Some(state.app_id.as_str())
        && header(API_KEY_HEADER) == Some(state.api_key.as_str())
}

async fn not_found() -> ApiFailure {
    failure(StatusCode::NOT_FOUND, "Not found")
}

// --- indexes ---

async fn list_indexes(State(state): State<MockState>) -> Reply {
    let db = state.db.read().await;
    let mut items: Vec<Value> = db
        .iter()
        .map(|(name, index)| json!({ "name": name, "entries": index.objects.len() }))
        .collect();
    items.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    ok(json!({ "items": items, "nbPages": 1 }))
}

async fn delete_index(State(state): State<MockState>, Path(index): Path<String>) -> Reply {
    state.db.write().await.remove(&index);
    ok(json!({ "taskID": state.task_id() }))
}

#[derive(Deserialize)]
struct IndexOperation {
    operation: String,
    destination: String,
}

async fn index_operation(
    State(state): State<MockState>,
    Path(index): Path<String>,
    Json(op): Json<IndexOperation>,
) -> Reply {
    let mut db = state.db.write().await;
    let source = match op.operation.as_str() {
        "move" => db.remove(&index),
        "copy" => db.get(&index).cloned(),
        _ => return Err(failure(StatusCode::BAD_REQUEST, "Invalid operation")),
    };
    let source = source.ok_or_else(|| failure(StatusCode::NOT_FOUND, "Index does not exist"))?;
    db.insert(op.destination, source);
    ok(json!({ "taskID": state.task_id() }))
}

async fn clear_index(State(state): State<MockState>, Path(index): Path<String>) -> Reply {
    if let Some(data) = state.db.write().await.get_mut(&index) {
        data.objects.clear();
    }
    ok(json!({ "taskID": state.task_id() }))
}

async fn get_settings(State(state): State<MockState>, Path(index): Path<String>) -> Reply {
    let db = state.db.read().await;
    let data = db
        .get(&index)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Index does not exist"))?;
    ok(Value::Object(data.settings.clone()))
}

async fn set_settings(
    State(state): State<MockState>,
    Path(index): Path<String>,
    Json(settings): Json<Map<String, Value>>,
) -> Reply {
    let mut db = state.db.write().await;
    db.entry(index).or_default().settings.extend(settings);
    ok(json!({ "taskID": state.task_id() }))
}

async fn get_task(Path((_index, task_id)): Path<(String, u64)>) -> Reply {
    ok(json!({ "taskID": task_id, "status": "published", "pendingTask": false }))
}

// --- objects ---

fn as_object(body: Value) -> Result<Map<String, Value>, ApiFailure> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(failure(StatusCode::BAD_REQUEST, "Body must be a JSON object")),
    }
}

async fn add_object(
    State(state): State<MockState>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    let mut object = as_object(body)?;
    let object_id = Uuid::new_v4().to_string();
    object.insert("objectID".to_string(), Value::String(object_id.clone()));
    state
        .db
        .write()
        .await
        .entry(index)
        .or_default()
        .objects
        .insert(object_id.clone(), object);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "objectID": object_id, "taskID": state.task_id() })),
    ))
}

async fn put_object(
    State(state): State<MockState>,
    Path((index, object_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Reply {
    let mut object = as_object(body)?;
    object.insert("objectID".to_string(), Value::String(object_id.clone()));
    state
        .db
        .write()
        .await
        .entry(index)
        .or_default()
        .objects
        .insert(object_id.clone(), object);
    ok(json!({ "objectID": object_id, "taskID": state.task_id() }))
}

async fn partial_update(
    State(state): State<MockState>,
    Path((index, object_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Reply {
    let partial = as_object(body)?;
    let mut db = state.db.write().await;
    let object = db
        .entry(index)
        .or_default()
        .objects
        .entry(object_id.clone())
        .or_insert_with(|| {
            let mut fresh = Map::new();
            fresh.insert("objectID".to_string(), Value::String(object_id.clone()));
            fresh
        });
    for (key, value) in partial {
        if key != "objectID" {
            object.insert(key, value);
        }
    }
    ok(json!({ "objectID": object_id, "taskID": state.task_id() }))
}

async fn get_object(
    State(state): State<MockState>,
    Path((index, object_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let db = state.db.read().await;
    let object = db
        .get(&index)
        .and_then(|data| data.objects.get(&object_id))
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "ObjectID does not exist"))?;
    let object = match params.get("attributes") {
        Some(list) => {
            let wanted: Vec<&str> = list.split(',').collect();
            object
                .iter()
                .filter(|(key, _)| *key == "objectID" || wanted.contains(&key.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>()
        }
        None => object.clone(),
    };
    ok(Value::Object(object))
}

async fn delete_object(
    State(state): State<MockState>,
    Path((index, object_id)): Path<(String, String)>,
) -> Reply {
    let mut db = state.db.write().await;
    db.get_mut(&index)
        .and_then(|data| data.objects.remove(&object_id))
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "ObjectID does not exist"))?;
    ok(json!({ "objectID": object_id, "taskID": state.task_id() }))
}

// --- search ---

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    params: String,
}

fn parse_params(params: &str) -> HashMap<String, String> {
    Uri::try_from(format!("/?{params}"))
        .ok()
        .and_then(|uri| Query::<HashMap<String, String>>::try_from_uri(&uri).ok())
        .map(|Query(map)| map)
        .unwrap_or_default()
}

fn run_search(data: Option<&IndexData>, params: &str) -> Value {
    let parsed = parse_params(params);
    let text = parsed.get("query").map(|q| q.to_lowercase()).unwrap_or_default();
    let hits: Vec<Value> = data
        .map(|data| {
            data.objects
                .values()
                .filter(|object| text.is_empty() || matches_text(object, &text))
                .map(|object| Value::Object(object.clone()))
                .collect()
        })
        .unwrap_or_default();
    json!({
        "hits": hits,
        "nbHits": hits.len(),
        "page": 0,
        "query": parsed.get("query").cloned().unwrap_or_default(),
        "params": params,
    })
}

fn matches_text(object: &Map<String, Value>, text: &str) -> bool {
    object
        .iter()
        .filter(|(key, _)| *key != "objectID")
        .any(|(_, value)| match value {
            Value::String(s) => s.to_lowercase().contains(text),
            _ => false,
        })
}

async fn search(
    State(state): State<MockState>,
    Path(index): Path<String>,
    Json(body): Json<SearchBody>,
) -> Reply {
    let db = state.db.read().await;
    ok(run_search(db.get(&index), &body.params))
}

#[derive(Deserialize)]
struct MultipleQueries {
    requests: Vec<IndexQuery>,
}

#[derive(Deserialize)]
struct IndexQuery {
    #[serde(rename = "indexName")]
    index_name: String,
    #[serde(default)]
    params: String,
}

async fn multiple_queries(State(state): State<MockState>, Json(body): Json<MultipleQueries>) -> Reply {
    let db = state.db.read().await;
    let results: Vec<Value> = body
        .requests
        .iter()
        .map(|q| {
            let mut result = run_search(db.get(&q.index_name), &q.params);
            result["index"] = Value::String(q.index_name.clone());
            result
        })
        .collect();
    ok(json!({ "results": results }))
}

// --- keys and logs ---

async fn list_keys(State(state): State<MockState>) -> Reply {
    let keys = state.keys.read().await;
    let mut listed: Vec<Value> = keys.values().cloned().collect();
    listed.sort_by(|a, b| a["value"].as_str().cmp(&b["value"].as_str()));
    ok(json!({ "keys": listed }))
}

async fn add_key(State(state): State<MockState>, Json(body): Json<Value>) -> Reply {
    let mut description = as_object(body)?;
    let key = Uuid::new_v4().simple().to_string();
    description.insert("value".to_string(), Value::String(key.clone()));
    state.keys.write().await.insert(key.clone(), Value::Object(description));
    Ok((StatusCode::CREATED, Json(json!({ "key": key }))))
}

async fn get_key(State(state): State<MockState>, Path(key): Path<String>) -> Reply {
    let keys = state.keys.read().await;
    let description = keys
        .get(&key)
        .cloned()
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Key does not exist"))?;
    ok(description)
}

async fn update_key(
    State(state): State<MockState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    let mut description = as_object(body)?;
    let mut keys = state.keys.write().await;
    if !keys.contains_key(&key) {
        return Err(failure(StatusCode::NOT_FOUND, "Key does not exist"));
    }
    description.insert("value".to_string(), Value::String(key.clone()));
    keys.insert(key.clone(), Value::Object(description));
    ok(json!({ "key": key }))
}

async fn delete_key(State(state): State<MockState>, Path(key): Path<String>) -> Reply {
    state
        .keys
        .write()
        .await
        .remove(&key)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Key does not exist"))?;
    ok(json!({ "deletedAt": "1970-01-01T00:00:00Z" }))
}

async fn get_logs() -> Reply {
    ok(json!({ "logs": [] }))
}
