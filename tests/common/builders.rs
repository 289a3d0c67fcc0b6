//! Test builders — ergonomic constructors for envelopes, payloads and the
//! running pieces (stores, pipelines, tail services).
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use sluice::sluice_core::store::{ElasticsearchConfig, ElasticsearchStore, RingStore};
use sluice::sluice_core::{ContainerRef, Encoding, Envelope, LinePipeline, Origin};
use sluice::sluice_feeds::{MemoryBroker, TailService};

use super::FakeElasticsearch;

/// The timestamp every builder uses unless told otherwise.
pub const FIXED_TS: &str = "2018-01-22T20:21:00.123456789-02:00";

/// [`FIXED_TS`] rendered the way classified lines carry it.
pub const FIXED_TS_RENDERED: &str = "2018-01-22T20:21:00.123456789-02:00";

pub fn fixed_ts() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(FIXED_TS).unwrap()
}

// ---------------------------------------------------------------------------
// EnvelopeBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Envelope`] test fixtures.
///
/// # Example
///
/// ```rust
/// let envelope = EnvelopeBuilder::new("listening on :8080")
///     .app("foo", "web", "v2")
///     .pod("foo-v2-web-2ggow")
///     .build();
/// ```
pub struct EnvelopeBuilder {
    log: String,
    stream: String,
    origin: Origin,
    container: ContainerRef,
    timestamp: DateTime<FixedOffset>,
}

impl EnvelopeBuilder {
    pub fn new(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            stream: "stdout".to_string(),
            origin: Origin {
                namespace: "default".to_string(),
                host: "node-1".to_string(),
                ..Origin::default()
            },
            container: ContainerRef::Structured {
                container_id: "c0ffee".to_string(),
            },
            timestamp: fixed_ts(),
        }
    }

    /// Sets the `app`, `type` and `version` labels, the namespace and a
    /// container name of `<app>-<type>`.
    pub fn app(mut self, app: &str, process_type: &str, version: &str) -> Self {
        self.origin.namespace = app.to_string();
        self.origin.container_name = format!("{app}-{process_type}");
        self = self.label("app", app).label("type", process_type).label("version", version);
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.origin.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn labels(mut self, labels: HashMap<String, String>) -> Self {
        self.origin.labels = labels;
        self
    }

    pub fn pod(mut self, pod_name: &str) -> Self {
        self.origin.pod_name = pod_name.to_string();
        self
    }

    pub fn container(mut self, container_name: &str) -> Self {
        self.origin.container_name = container_name.to_string();
        self
    }

    /// Container identifier as a bare string (legacy shape).
    pub fn legacy(mut self, container_id: &str) -> Self {
        self.container = ContainerRef::Legacy(container_id.to_string());
        self
    }

    pub fn stderr(mut self) -> Self {
        self.stream = "stderr".to_string();
        self
    }

    pub fn timestamp(mut self, rfc3339: &str) -> Self {
        self.timestamp = DateTime::parse_from_rfc3339(rfc3339).unwrap();
        self
    }

    pub fn build(self) -> Envelope {
        Envelope {
            log: self.log,
            stream: self.stream,
            origin: self.origin,
            container: self.container,
            timestamp: self.timestamp,
        }
    }

    pub fn encode(self, encoding: Encoding) -> Vec<u8> {
        self.build().encode(encoding).unwrap()
    }

    pub fn json(self) -> Vec<u8> {
        self.encode(Encoding::Json)
    }
}

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

/// An application line for `app` from its `web` process.
pub fn app_envelope(app: &str, log: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(log)
        .app(app, "web", "v2")
        .pod(&format!("{app}-v2-web-2ggow"))
}

/// A control-plane line as the controller container writes it.
pub fn controller_envelope(log: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(log)
        .container("deis-controller")
        .pod("deis-controller-3844356438-6hkbf")
        .label("app", "deis-controller")
}

/// JSON payload of an application line.
pub fn app_payload(app: &str, log: &str) -> Vec<u8> {
    app_envelope(app, log).json()
}

// ---------------------------------------------------------------------------
// Running pieces
// ---------------------------------------------------------------------------

pub fn ring_store(capacity: usize) -> Arc<RingStore> {
    Arc::new(RingStore::with_capacity(capacity))
}

/// Config pointing at `es`. Batches never fill and the flusher never ticks
/// on its own, so tests decide when documents are shipped.
pub fn es_config(es: &FakeElasticsearch) -> ElasticsearchConfig {
    ElasticsearchConfig {
        host: es.host(),
        port: es.port(),
        batch_size: 1000,
        flush_interval_ms: 60_000,
        ..ElasticsearchConfig::default()
    }
}

pub fn es_store(es: &FakeElasticsearch, capacity: usize) -> Arc<ElasticsearchStore> {
    Arc::new(ElasticsearchStore::new(es_config(es), capacity))
}

pub fn json_pipeline() -> LinePipeline {
    LinePipeline::default()
}

/// A tail service over `broker` on the `logs.>` topic.
pub fn tail_service(broker: &MemoryBroker) -> Arc<TailService> {
    Arc::new(TailService::new(
        Arc::new(broker.clone()),
        json_pipeline(),
        LOG_TOPIC,
        "sluice-tail",
    ))
}

/// Topic pattern every harness subscribes to.
pub const LOG_TOPIC: &str = "logs.>";

/// Subject an app's records are published on.
pub fn subject(app: &str) -> String {
    format!("logs.{app}")
}
