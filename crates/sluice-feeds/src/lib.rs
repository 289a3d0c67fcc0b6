//! sluice-feeds — everything that reads the log stream.
//!
//! - [`transport`]: the consumer-group capability and its event vocabulary.
//! - [`nats`]: JetStream adapter used in production.
//! - [`memory`]: in-process broker for tests and broker-less runs.
//! - [`ingest`]: the long-lived loop feeding the store.
//! - [`tail`]: per-request sessions feeding a live HTTP response.

pub mod ingest;
pub mod memory;
pub mod nats;
pub mod tail;
pub mod transport;

pub use ingest::{IngestError, IngestStats, IngestionLoop, LoopState, StoppedSignal};
pub use memory::MemoryBroker;
pub use nats::NatsTransport;
pub use tail::{TailEnd, TailRequest, TailService};
pub use transport::{
    Consumer, Membership, OffsetReset, Partition, Record, StreamEvent, Subscription, Transport,
    TransportError,
};
