//! sluice-web — the HTTP boundary.
//!
//! | Route                     | Method | Result                                   |
//! |---------------------------|--------|------------------------------------------|
//! | `/healthz`                | GET    | 200                                      |
//! | `/logs/{app}`             | GET    | 200 lines, 204 when unknown, 500 failure |
//! | `/logs/{app}`             | DELETE | 200, 500 failure                         |
//! | `/logs/{app}/tail`        | GET    | streamed lines until disconnect          |
//!
//! Every route also answers with a trailing slash.

pub mod error;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::Router;

pub use error::WebError;
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/healthz/", get(routes::healthz))
        .route(
            "/logs/{app}",
            get(routes::get_logs).delete(routes::delete_logs),
        )
        .route(
            "/logs/{app}/",
            get(routes::get_logs).delete(routes::delete_logs),
        )
        .route("/logs/{app}/tail", get(routes::tail_logs))
        .route("/logs/{app}/tail/", get(routes::tail_logs))
        .with_state(state)
}
