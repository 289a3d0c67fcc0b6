//! sluice — log ingestion, bounded per-application storage and live tails.
//!
//! # Architecture
//!
//! ```text
//!                ┌──► Ingestion loop ──► Store ──► GET/DELETE /logs/{app}
//! log stream ────┤
//!                └──► Tail session ──────────────► GET /logs/{app}/tail
//! ```
//!
//! The work lives in three crates, re-exported here so integration harnesses
//! and benches can reach everything through one path:
//!
//! - [`sluice_core`]: envelopes, classification, stores, config
//! - [`sluice_feeds`]: transports, the ingestion loop, tail sessions
//! - [`sluice_web`]: the HTTP boundary
//!
//! [`server`] wires them together for the binary.

pub mod server;

pub use sluice_core;
pub use sluice_feeds;
pub use sluice_web;
