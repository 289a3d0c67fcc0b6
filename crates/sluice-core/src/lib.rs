//! sluice-core — envelope decoding, classification and bounded storage.
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────────► Ingestion loop ──► Store ──► read API
//! stream ─────┤   decode ─► classify
//!             └──────────────► Tail session ──────────────► live HTTP stream
//! ```
//!
//! This crate holds everything that does not touch the stream transport:
//! the [`envelope`] decoder, the [`classify`] rules, the combined
//! [`pipeline`], the [`store`] capability and its adapters, and [`config`].

pub mod classify;
pub mod config;
pub mod envelope;
pub mod pipeline;
pub mod store;
pub mod types;

pub use classify::Classifier;
pub use pipeline::LinePipeline;
pub use store::{LogStore, StoreError};
pub use types::{ClassifiedLine, ContainerRef, Encoding, Envelope, LineOrigin, Origin};
