//! Search-engine backed store.
//!
//! Lines are indexed one document per line into a per-app index named from
//! `index_template`. Writes are buffered and shipped through the bulk API
//! when `batch_size` documents are pending or every `flush_interval_ms`,
//! whichever comes first. A read flushes the buffer before querying, so it
//! sees every write acknowledged before it started.
//!
//! A flush that fails leaves its documents buffered for the next attempt.
//! Bulk items the cluster rejects with 429 or a 5xx are buffered again;
//! any other per-item rejection is permanent and is dropped with an error.
//!
//! Every document carries a process-wide monotonic `seq`; reads sort on it
//! rather than on the timestamp, so lines written in the same instant keep
//! their insertion order. After each flush the cap is enforced by deleting
//! documents below the `capacity`-th newest `seq`.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{LogStore, Result, StoreError, DEFAULT_CAPACITY};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// `[store.elasticsearch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `{app}` is replaced by the lowercased application name.
    #[serde(default = "default_index_template")]
    pub index_template: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 9200 }
fn default_index_template() -> String { "sluice-{app}".to_string() }
fn default_batch_size() -> usize { 50 }
fn default_flush_interval_ms() -> u64 { 1000 }

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            index_template: default_index_template(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl ElasticsearchConfig {
    pub fn index_name(&self, app: &str) -> String {
        self.index_template.replace("{app}", &app.to_lowercase())
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
struct PendingDoc {
    app: String,
    body: Value,
}

struct Inner {
    config: ElasticsearchConfig,
    capacity: usize,
    client: parking_lot::RwLock<HttpClient>,
    pending: Mutex<Vec<PendingDoc>>,
    flush_lock: Mutex<()>,
    created: parking_lot::Mutex<HashSet<String>>,
    last_seq: AtomicU64,
    stopped: AtomicBool,
}

pub struct ElasticsearchStore {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    flusher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

impl ElasticsearchStore {
    pub fn new(config: ElasticsearchConfig, capacity: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                capacity: if capacity == 0 { DEFAULT_CAPACITY } else { capacity },
                client: parking_lot::RwLock::new(build_client()),
                pending: Mutex::new(Vec::new()),
                flush_lock: Mutex::new(()),
                created: parking_lot::Mutex::new(HashSet::new()),
                last_seq: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
            shutdown,
            flusher: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ElasticsearchConfig {
        &self.inner.config
    }

    /// Ship everything buffered so far.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

impl Inner {
    /// Wall-clock nanoseconds, bumped past the previous value when the clock
    /// stalls or steps back.
    fn next_seq(&self) -> u64 {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map_or(0, |n| n.max(0) as u64);
        let prev = self
            .last_seq
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<(StatusCode, Bytes)> {
        let uri = format!("{}{}", self.config.base_url(), path);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(body))
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let client = self.client.read().clone();
        let response = client
            .request(request)
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?
            .to_bytes();
        Ok((status, body))
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<(StatusCode, Value)> {
        let body = Bytes::from(serde_json::to_vec(body)?);
        let (status, bytes) = self.send(method, path, "application/json", body).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    async fn ensure_index(&self, index: &str) -> Result<()> {
        if self.created.lock().contains(index) {
            return Ok(());
        }
        let (status, body) = self
            .send_json(Method::PUT, &format!("/{index}"), &index_mapping())
            .await?;
        let exists = body
            .pointer("/error/type")
            .and_then(Value::as_str)
            .is_some_and(|t| t == "resource_already_exists_exception");
        if !status.is_success() && !exists {
            return Err(StoreError::Backend(format!(
                "creating index {index} returned {status}: {body}"
            )));
        }
        debug!(index, "search index ready");
        self.created.lock().insert(index.to_string());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;
        // Writers only append while a flush is in flight, so the snapshot
        // stays a prefix of `pending` until it is drained below.
        let docs = self.pending.lock().await.clone();
        if docs.is_empty() {
            return Ok(());
        }

        let apps: BTreeSet<String> = docs.iter().map(|d| d.app.clone()).collect();
        let outcome = match self.ship(&docs, &apps).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(retained = docs.len(), error = %e, "bulk flush failed");
                return Err(e);
            }
        };

        {
            let mut pending = self.pending.lock().await;
            let shipped = docs.len().min(pending.len());
            pending.drain(..shipped);
            let retry: Vec<PendingDoc> =
                outcome.retry.iter().filter_map(|&i| docs.get(i).cloned()).collect();
            pending.splice(0..0, retry);
        }

        if outcome.rejected > 0 {
            error!(
                dropped = outcome.rejected,
                reason = outcome.reason.as_deref().unwrap_or("unknown"),
                "bulk items rejected"
            );
        }
        debug!(
            documents = docs.len().saturating_sub(outcome.retry.len() + outcome.rejected),
            retried = outcome.retry.len(),
            apps = apps.len(),
            "flushed log documents"
        );

        for app in &apps {
            if let Err(e) = self.trim(app).await {
                warn!(app, error = %e, "cap enforcement failed");
            }
        }

        match outcome.reason {
            Some(reason) => Err(StoreError::Backend(reason)),
            None => Ok(()),
        }
    }

    /// One bulk round trip. `Err` means nothing can be assumed stored.
    async fn ship(&self, docs: &[PendingDoc], apps: &BTreeSet<String>) -> Result<BulkOutcome> {
        for app in apps {
            self.ensure_index(&self.config.index_name(app)).await?;
        }
        let body = bulk_body(&self.config, docs)?;
        let (status, bytes) = self
            .send(Method::POST, "/_bulk?refresh=wait_for", "application/x-ndjson", body)
            .await?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(StoreError::Backend(format!("bulk returned {status}: {text}")));
        }
        let response: Value = serde_json::from_slice(&bytes)?;
        Ok(bulk_outcome(&response))
    }

    /// Delete everything older than the `capacity` newest lines of `app`.
    async fn trim(&self, app: &str) -> Result<()> {
        let index = self.config.index_name(app);
        let query = cutoff_query(app, self.capacity);
        let (status, body) = self
            .send_json(Method::POST, &format!("/{index}/_search"), &query)
            .await?;
        if !status.is_success() {
            return Err(StoreError::Backend(format!("cap lookup returned {status}")));
        }
        let Some(cutoff) = body
            .pointer("/hits/hits/0/_source/seq")
            .and_then(Value::as_u64)
        else {
            return Ok(());
        };
        let (status, body) = self
            .send_json(
                Method::POST,
                &format!("/{index}/_delete_by_query?refresh=true&conflicts=proceed"),
                &evict_query(app, cutoff),
            )
            .await?;
        if !status.is_success() {
            return Err(StoreError::Backend(format!("eviction returned {status}")));
        }
        debug!(app, cutoff, deleted = ?body.get("deleted"), "evicted lines over cap");
        Ok(())
    }

    async fn count(&self, index: &str, app: &str) -> Result<u64> {
        let query = json!({ "query": app_filter(app, None) });
        let (status, body) = self
            .send_json(Method::POST, &format!("/{index}/_count"), &query)
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!("count returned {status}")));
        }
        Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
    }
}

#[async_trait]
impl LogStore for ElasticsearchStore {
    async fn write(&self, app: &str, line: &str, process: Option<&str>) -> Result<()> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(StoreError::Stopped);
        }
        let doc = PendingDoc {
            app: app.to_string(),
            body: json!({
                "app": app,
                "process": process,
                "line": line,
                "seq": self.inner.next_seq(),
                "@timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        };
        let full = {
            let mut pending = self.inner.pending.lock().await;
            pending.push(doc);
            pending.len() >= self.inner.config.batch_size
        };
        if full {
            // The line stays buffered when the flush fails; the next flush
            // retries it.
            if let Err(e) = self.inner.flush().await {
                debug!(app, error = %e, "batch flush deferred");
            }
        }
        Ok(())
    }

    async fn read(&self, app: &str, count: usize, process: Option<&str>) -> Result<Vec<String>> {
        self.inner.flush().await?;
        let index = self.inner.config.index_name(app);
        let count = count.min(self.inner.capacity);

        if count == 0 {
            return match self.inner.count(&index, app).await? {
                0 => Err(StoreError::not_found(app)),
                _ => Ok(Vec::new()),
            };
        }

        let query = read_query(app, count, process);
        let (status, body) = self
            .inner
            .send_json(Method::POST, &format!("/{index}/_search"), &query)
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(app));
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!("search returned {status}: {body}")));
        }

        let lines = parse_lines(&body);
        if lines.is_empty() && (process.is_none() || self.inner.count(&index, app).await? == 0) {
            return Err(StoreError::not_found(app));
        }
        Ok(lines)
    }

    async fn destroy(&self, app: &str) -> Result<()> {
        let _guard = self.inner.flush_lock.lock().await;
        self.inner.pending.lock().await.retain(|d| d.app != app);
        let index = self.inner.config.index_name(app);
        let (status, _) = self
            .inner
            .send(Method::DELETE, &format!("/{index}"), "application/json", Bytes::new())
            .await?;
        self.inner.created.lock().remove(&index);
        if status.is_success() || status == StatusCode::NOT_FOUND {
            info!(app, index, "destroyed logs");
            Ok(())
        } else {
            Err(StoreError::Backend(format!("deleting index {index} returned {status}")))
        }
    }

    async fn reopen(&self) -> Result<()> {
        *self.inner.client.write() = build_client();
        self.inner.created.lock().clear();
        info!(url = %self.inner.config.base_url(), "reopened search store client");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut flusher = self.flusher.lock();
        if flusher.is_some() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.shutdown.subscribe();
        let period = Duration::from_millis(self.inner.config.flush_interval_ms.max(1));
        *flusher = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = inner.flush().await {
                            warn!(error = %e, "periodic flush failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
        info!(url = %self.inner.config.base_url(), "search store flusher started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stopped.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.flush().await
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "app": { "type": "keyword" },
                "process": { "type": "keyword" },
                "line": { "type": "text", "index": false },
                "seq": { "type": "long" },
                "@timestamp": { "type": "date" }
            }
        }
    })
}

fn escape_wildcard(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn app_filter(app: &str, process: Option<&str>) -> Value {
    let mut filters = vec![json!({ "term": { "app": app } })];
    if let Some(process) = process {
        filters.push(json!({
            "bool": {
                "should": [
                    { "term": { "process": process } },
                    { "wildcard": { "process": format!("*-{}", escape_wildcard(process)) } }
                ],
                "minimum_should_match": 1
            }
        }));
    }
    json!({ "bool": { "filter": filters } })
}

fn read_query(app: &str, count: usize, process: Option<&str>) -> Value {
    json!({
        "query": app_filter(app, process),
        "sort": [{ "seq": { "order": "desc" } }],
        "size": count,
        "_source": ["line"]
    })
}

/// Finds the newest document that falls outside the cap.
fn cutoff_query(app: &str, capacity: usize) -> Value {
    json!({
        "query": app_filter(app, None),
        "sort": [{ "seq": { "order": "desc" } }],
        "from": capacity,
        "size": 1,
        "_source": ["seq"]
    })
}

fn evict_query(app: &str, cutoff: u64) -> Value {
    json!({
        "query": {
            "bool": {
                "filter": [
                    { "term": { "app": app } },
                    { "range": { "seq": { "lte": cutoff } } }
                ]
            }
        }
    })
}

fn bulk_body(config: &ElasticsearchConfig, docs: &[PendingDoc]) -> Result<Bytes> {
    let mut out = Vec::with_capacity(docs.len() * 256);
    for doc in docs {
        let action = json!({ "index": { "_index": config.index_name(&doc.app) } });
        serde_json::to_writer(&mut out, &action)?;
        out.push(b'\n');
        serde_json::to_writer(&mut out, &doc.body)?;
        out.push(b'\n');
    }
    Ok(Bytes::from(out))
}

/// Lines from a search response, reversed into chronological order.
fn parse_lines(body: &Value) -> Vec<String> {
    let mut lines: Vec<String> = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.pointer("/_source/line").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    lines.reverse();
    lines
}

/// Per-item result of a bulk response.
#[derive(Debug, Default, PartialEq)]
struct BulkOutcome {
    /// Positions in the request that hit a transient failure.
    retry: Vec<usize>,
    /// Items refused for good.
    rejected: usize,
    /// First permanent rejection, if any.
    reason: Option<String>,
}

fn bulk_outcome(response: &Value) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    if response.get("errors").and_then(Value::as_bool) != Some(true) {
        return outcome;
    }
    let items = response.get("items").and_then(Value::as_array);
    for (i, item) in items.into_iter().flatten().enumerate() {
        let Some(error) = item.pointer("/index/error") else {
            continue;
        };
        let status = item.pointer("/index/status").and_then(Value::as_u64).unwrap_or(0);
        if status == 429 || status >= 500 {
            outcome.retry.push(i);
        } else {
            outcome.rejected += 1;
            outcome.reason.get_or_insert_with(|| error.to_string());
        }
    }
    outcome
}
