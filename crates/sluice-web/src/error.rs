//! Error to status mapping for the read and delete endpoints.
//!
//! The endpoints answer with bare status codes and no body. Tails never
//! produce an error response; they just end the stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sluice_core::StoreError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Any failure to delete is a server error, `NotFound` included.
    #[error("failed to delete logs: {0}")]
    Delete(#[source] StoreError),
}

impl WebError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Store(e) if e.is_not_found() => StatusCode::NO_CONTENT,
            Self::Store(_) | Self::Delete(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        status.into_response()
    }
}
