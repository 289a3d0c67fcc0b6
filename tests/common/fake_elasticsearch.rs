//! Fake Elasticsearch server for integration tests.
//!
//! Spins up a minimal `axum` HTTP server on a random TCP port bound to
//! 127.0.0.1. It understands exactly the requests `ElasticsearchStore`
//! sends:
//!
//! - `PUT /{index}`, `DELETE /{index}`
//! - `POST /_bulk` (ndjson `index` actions)
//! - `POST /{index}/_search`, `/_count`, `/_delete_by_query`
//!
//! Queries are evaluated for the subset the store builds: `bool` with
//! `filter`/`should`, `term`, `wildcard` and `range.lte`, sorted on one
//! field with `from`/`size`.
//!
//! # Example
//!
//! ```rust,no_run
//! let es = FakeElasticsearch::start().await.unwrap();
//! es.set_down(true).await; // every request now answers 500
//! let store = es_store(&es, 10);
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Default)]
struct EsState {
    /// Index name to stored `_source` documents, in arrival order.
    indices: HashMap<String, Vec<Value>>,
    /// When set, every request answers 500.
    down: bool,
    /// `"METHOD /path"` for every request received.
    requests: Vec<String>,
}

type Shared = Arc<Mutex<EsState>>;

/// Handle to the running fake search server.
pub struct FakeElasticsearch {
    addr: SocketAddr,
    state: Shared,
}

impl FakeElasticsearch {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state: Shared = Arc::new(Mutex::new(EsState::default()));

        let app = Router::new()
            .route("/_bulk", post(bulk))
            .route("/{index}", put(create_index).delete(delete_index))
            .route("/{index}/_search", post(search))
            .route("/{index}/_count", post(count))
            .route("/{index}/_delete_by_query", post(delete_by_query))
            .layer(middleware::from_fn_with_state(state.clone(), gate))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(Self { addr, state })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn set_down(&self, down: bool) {
        self.state.lock().await.down = down;
    }

    /// Every request seen so far, as `"METHOD /path"`.
    pub async fn requests(&self) -> Vec<String> {
        self.state.lock().await.requests.clone()
    }

    pub async fn bulk_requests(&self) -> usize {
        self.requests()
            .await
            .iter()
            .filter(|r| r.as_str() == "POST /_bulk")
            .count()
    }

    /// Documents currently stored in `index`, in arrival order.
    pub async fn documents(&self, index: &str) -> Vec<Value> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .cloned()
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn gate(State(state): State<Shared>, request: Request, next: Next) -> Response {
    {
        let mut state = state.lock().await;
        state
            .requests
            .push(format!("{} {}", request.method(), request.uri().path()));
        if state.down {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": { "type": "cluster_unavailable" } })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

fn index_missing() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": { "type": "index_not_found_exception" } })),
    )
        .into_response()
}

async fn create_index(Path(index): Path<String>, State(state): State<Shared>) -> Response {
    let mut state = state.lock().await;
    if state.indices.contains_key(&index) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "type": "resource_already_exists_exception" } })),
        )
            .into_response();
    }
    state.indices.insert(index, Vec::new());
    Json(json!({ "acknowledged": true })).into_response()
}

async fn delete_index(Path(index): Path<String>, State(state): State<Shared>) -> Response {
    match state.lock().await.indices.remove(&index) {
        Some(_) => Json(json!({ "acknowledged": true })).into_response(),
        None => index_missing(),
    }
}

async fn bulk(State(state): State<Shared>, body: String) -> Response {
    let mut state = state.lock().await;
    let mut items = Vec::new();
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    while let (Some(action), Some(source)) = (lines.next(), lines.next()) {
        let (Ok(action), Ok(source)) = (
            serde_json::from_str::<Value>(action),
            serde_json::from_str::<Value>(source),
        ) else {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad ndjson" })))
                .into_response();
        };
        let index = action
            .pointer("/index/_index")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        state.indices.entry(index).or_default().push(source);
        items.push(json!({ "index": { "status": 201 } }));
    }
    Json(json!({ "errors": false, "items": items })).into_response()
}

async fn search(
    Path(index): Path<String>,
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Response {
    let state = state.lock().await;
    let Some(docs) = state.indices.get(&index) else {
        return index_missing();
    };

    let mut hits: Vec<&Value> = docs.iter().filter(|d| query_matches(&body["query"], d)).collect();
    if let Some((field, order)) = body["sort"][0].as_object().and_then(|o| o.iter().next()) {
        let descending = order["order"] == "desc";
        hits.sort_by(|a, b| {
            let ord = compare(&a[field.as_str()], &b[field.as_str()]);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
    let from = body["from"].as_u64().unwrap_or(0) as usize;
    let size = body["size"].as_u64().unwrap_or(10) as usize;
    let hits: Vec<Value> = hits
        .into_iter()
        .skip(from)
        .take(size)
        .map(|doc| json!({ "_index": index, "_source": doc }))
        .collect();
    Json(json!({ "hits": { "hits": hits } })).into_response()
}

async fn count(
    Path(index): Path<String>,
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Response {
    let state = state.lock().await;
    let Some(docs) = state.indices.get(&index) else {
        return index_missing();
    };
    let count = docs.iter().filter(|d| query_matches(&body["query"], d)).count();
    Json(json!({ "count": count })).into_response()
}

async fn delete_by_query(
    Path(index): Path<String>,
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().await;
    let Some(docs) = state.indices.get_mut(&index) else {
        return index_missing();
    };
    let before = docs.len();
    docs.retain(|d| !query_matches(&body["query"], d));
    Json(json!({ "deleted": before - docs.len() })).into_response()
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

fn query_matches(query: &Value, doc: &Value) -> bool {
    let Some((kind, clause)) = query.as_object().and_then(|o| o.iter().next()) else {
        // No query (or `match_all`-like empty object) selects everything.
        return true;
    };
    match kind.as_str() {
        "bool" => {
            let filters_ok = clause["filter"]
                .as_array()
                .map_or(true, |fs| fs.iter().all(|f| query_matches(f, doc)));
            let should_ok = clause["should"]
                .as_array()
                .map_or(true, |ss| ss.iter().any(|s| query_matches(s, doc)));
            filters_ok && should_ok
        }
        "term" => field_clause(clause).is_some_and(|(field, value)| &doc[field] == value),
        "wildcard" => field_clause(clause).is_some_and(|(field, pattern)| {
            match (doc[field].as_str(), pattern.as_str()) {
                (Some(text), Some(pattern)) => wildcard(pattern, text),
                _ => false,
            }
        }),
        "range" => field_clause(clause).is_some_and(|(field, bounds)| {
            match (doc[field].as_u64(), bounds["lte"].as_u64()) {
                (Some(v), Some(lte)) => v <= lte,
                _ => false,
            }
        }),
        "match_all" => true,
        _ => false,
    }
}

fn field_clause(clause: &Value) -> Option<(&str, &Value)> {
    clause
        .as_object()?
        .iter()
        .next()
        .map(|(field, value)| (field.as_str(), value))
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_u64(), b.as_u64()) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// `*`, `?` and backslash escapes, anchored at both ends.
fn wildcard(pattern: &str, text: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            '*' => Token::Any,
            '?' => Token::One,
            c => Token::Literal(c),
        });
    }
    let text: Vec<char> = text.chars().collect();
    wildcard_at(&tokens, &text)
}

#[derive(Clone, Copy)]
enum Token {
    Literal(char),
    Any,
    One,
}

fn wildcard_at(tokens: &[Token], text: &[char]) -> bool {
    match tokens.split_first() {
        None => text.is_empty(),
        Some((Token::Any, rest)) => (0..=text.len()).any(|i| wildcard_at(rest, &text[i..])),
        Some((Token::One, rest)) => !text.is_empty() && wildcard_at(rest, &text[1..]),
        Some((Token::Literal(c), rest)) => {
            text.first() == Some(c) && wildcard_at(rest, &text[1..])
        }
    }
}
