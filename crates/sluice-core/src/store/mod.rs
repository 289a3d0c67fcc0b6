//! Store — capped, per-application, insertion-ordered line storage.
//!
//! The store is the only state shared between the ingestion loop (one
//! writer) and the HTTP read paths (many readers). Every adapter is
//! responsible for its own synchronisation; callers never lock.
//!
//! # Contract
//!
//! - `write` appends the newest line for an app, evicting the oldest once the
//!   per-app cap is exceeded.
//! - `read` returns up to `count` most recent lines, oldest first, optionally
//!   restricted to one process. An app with no lines at all is
//!   [`StoreError::NotFound`]; fewer lines than requested is not an error.
//! - `destroy` drops every line of an app and is idempotent.
//! - `reopen` re-establishes backend connectivity.

pub mod elasticsearch;
pub mod ring;

use async_trait::async_trait;
use thiserror::Error;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchStore};
pub use ring::RingStore;

/// Default per-application line cap.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not find logs for '{app}'")]
    NotFound { app: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store http error: {0}")]
    Http(String),

    #[error("store payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store has been stopped")]
    Stopped,
}

impl StoreError {
    pub fn not_found(app: impl Into<String>) -> Self {
        StoreError::NotFound { app: app.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append `line` for `app`. `process` is the container name the line came
    /// from, used by filtered reads.
    async fn write(&self, app: &str, line: &str, process: Option<&str>) -> Result<()>;

    /// The `count` most recent lines for `app`, oldest first.
    async fn read(&self, app: &str, count: usize, process: Option<&str>) -> Result<Vec<String>>;

    async fn destroy(&self, app: &str) -> Result<()>;

    async fn reopen(&self) -> Result<()>;

    /// Begin background work (flushers). Repeated calls have no effect.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Flush anything buffered and refuse further writes.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
