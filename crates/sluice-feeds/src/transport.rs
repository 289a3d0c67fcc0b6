//! Transport — the publish/subscribe boundary every consumer reads from.
//!
//! A [`Transport`] hands out [`Consumer`]s bound to a consumer group and a
//! subject pattern. A consumer surfaces everything the broker tells it as a
//! [`StreamEvent`]; the owner decides what each event means (the ingestion
//! loop treats [`StreamEvent::Error`] as fatal, a tail simply ends).
//!
//! Subject patterns use NATS-style tokens: `*` matches exactly one
//! `.`-separated token, `>` matches one or more trailing tokens.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("stream closed by broker")]
    Closed,
}

/// One slice of a topic owned by at most one member of a group at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    pub topic: String,
    pub index: u32,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.topic, self.index)
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub subject: String,
    pub partition: Partition,
    pub payload: Bytes,
}

#[derive(Debug)]
pub enum StreamEvent {
    /// The group handed these partitions to this member.
    Assigned(Vec<Partition>),
    /// These partitions are being taken away; release before the next
    /// rebalance can finish.
    Revoked(Vec<Partition>),
    Record(Record),
    /// Caught up with the end of a partition. Informational.
    PartitionEof(Partition),
    Error(TransportError),
}

/// Where a new group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    /// Only records published after the group first subscribed.
    #[default]
    Latest,
    Earliest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Survives restarts; instances sharing the group split the stream.
    Durable,
    /// Removed by the broker once its only member leaves.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub group: String,
    pub topic_pattern: String,
    pub offset_reset: OffsetReset,
    pub membership: Membership,
}

impl Subscription {
    /// A shared, durable group identity.
    pub fn durable(group: impl Into<String>, topic_pattern: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            topic_pattern: topic_pattern.into(),
            offset_reset: OffsetReset::Latest,
            membership: Membership::Durable,
        }
    }

    /// A globally unique group so the subscriber gets its own full copy of
    /// the stream instead of competing for partitions.
    pub fn ephemeral(prefix: &str, topic_pattern: impl Into<String>) -> Self {
        Self {
            group: format!("{prefix}-{}", uuid::Uuid::new_v4().simple()),
            topic_pattern: topic_pattern.into(),
            offset_reset: OffsetReset::Latest,
            membership: Membership::Ephemeral,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Result<Box<dyn Consumer>, TransportError>;
}

/// A single group member.
///
/// `next_event` must be cancel safe: callers race it against shutdown.
/// Records are committed automatically once the following event is
/// requested, so delivery is at-least-once.
#[async_trait]
pub trait Consumer: Send {
    fn group(&self) -> &str;

    async fn next_event(&mut self) -> Option<StreamEvent>;

    async fn assign(&mut self, partitions: &[Partition]) -> Result<(), TransportError>;

    async fn unassign(&mut self) -> Result<(), TransportError>;

    /// Leave the group and release every held connection.
    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// NATS-style subject matching.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut subject = subject.split('.');
    loop {
        match (pattern.next(), subject.next()) {
            (Some(">"), Some(_)) => return pattern.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
