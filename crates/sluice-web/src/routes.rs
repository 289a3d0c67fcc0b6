//! Handlers for `/healthz` and `/logs/{app}`.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use sluice_feeds::tail::terminate_line;
use sluice_feeds::TailRequest;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WebError;
use crate::state::AppState;

/// Lines returned when `log_lines` is missing or unparsable.
pub const DEFAULT_LOG_LINES: usize = 100;

/// Lines buffered between a tail session and its response body.
const TAIL_BUFFER: usize = 64;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub log_lines: Option<String>,
    pub process: Option<String>,
}

impl LogParams {
    pub fn line_count(&self) -> usize {
        self.log_lines
            .as_deref()
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(DEFAULT_LOG_LINES)
    }

    pub fn process(&self) -> Option<&str> {
        self.process.as_deref().filter(|p| !p.is_empty())
    }
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn get_logs(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Response, WebError> {
    let lines = state
        .store
        .read(&app, params.line_count(), params.process())
        .await?;
    debug!(%app, lines = lines.len(), "serving logs");

    let body: String = lines.iter().map(|line| terminate_line(line)).collect();
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
}

pub async fn delete_logs(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<StatusCode, WebError> {
    state.store.destroy(&app).await.map_err(WebError::Delete)?;
    debug!(%app, "logs destroyed");
    Ok(StatusCode::OK)
}

/// Streams matching lines until the client goes away.
///
/// The session runs on its own task. Its cancellation token is armed by a
/// drop guard that lives inside the response body, so the session ends as
/// soon as hyper drops the body.
pub async fn tail_logs(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Query(params): Query<LogParams>,
) -> Response {
    let request = TailRequest::new(app, params.process().map(str::to_string));
    let (tx, rx) = mpsc::channel::<String>(TAIL_BUFFER);
    let cancel = state.tails.session_token();
    let guard = cancel.clone().drop_guard();

    let tails = state.tails.clone();
    tokio::spawn(async move {
        let app = request.app.clone();
        match tails.open(request, tx, cancel).await {
            Ok(end) => debug!(%app, ?end, "tail finished"),
            Err(e) => warn!(%app, error = %e, "tail could not subscribe"),
        }
    });

    let lines = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|line| (Ok::<_, Infallible>(Bytes::from(line)), (rx, guard)))
    });

    ([(header::CONTENT_TYPE, TEXT_PLAIN)], Body::from_stream(lines)).into_response()
}
