//! JetStream adapter.
//!
//! Each consumer group maps onto one JetStream pull consumer bound to the
//! configured stream. Durable groups keep their consumer on the server so
//! every instance started with the same group id shares one delivery cursor.
//! Ephemeral groups (tails) get a uniquely named consumer with an inactivity
//! threshold, and are deleted explicitly on close.
//!
//! JetStream has no partitions in the Kafka sense. A pull consumer behaves
//! like a single partition per group, so the adapter reports one synthetic
//! [`Partition`] that is assigned on subscribe.

use std::collections::VecDeque;
use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy, PullConsumer},
    stream::Config as JsStreamConfig,
};
use async_nats::ServerAddr;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::transport::{
    Consumer, Membership, OffsetReset, Partition, Record, StreamEvent, Subscription, Transport,
    TransportError,
};

/// How long the server keeps an abandoned tail consumer around.
const TAIL_INACTIVE_THRESHOLD: Duration = Duration::from_secs(30);

pub struct NatsTransport {
    jetstream: jetstream::Context,
    stream_name: String,
}

impl NatsTransport {
    /// Connect to `brokers`, a comma separated list of server URLs.
    pub async fn connect(
        brokers: &str,
        stream_name: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let servers = brokers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<ServerAddr>().map_err(|e| {
                    TransportError::Connect(format!("invalid broker address '{s}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if servers.is_empty() {
            return Err(TransportError::Connect("no broker addresses configured".to_string()));
        }

        info!(brokers, ?timeout, "connecting to NATS");
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(servers.as_slice())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(brokers, stream = stream_name, "connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client),
            stream_name: stream_name.to_string(),
        })
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Create the stream if it does not exist yet.
    pub async fn ensure_stream(&self, subjects: &[String]) -> Result<(), TransportError> {
        match self.jetstream.get_stream(&self.stream_name).await {
            Ok(_) => {
                debug!(stream = %self.stream_name, "stream already exists");
            }
            Err(_) => {
                self.jetstream
                    .create_stream(JsStreamConfig {
                        name: self.stream_name.clone(),
                        subjects: subjects.to_vec(),
                        description: Some("Container log records".to_string()),
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| {
                        TransportError::Subscribe(format!("failed to create stream: {e}"))
                    })?;
                info!(stream = %self.stream_name, ?subjects, "created stream");
            }
        }
        Ok(())
    }

    fn consumer_config(subscription: &Subscription) -> pull::Config {
        let deliver_policy = match subscription.offset_reset {
            OffsetReset::Latest => DeliverPolicy::New,
            OffsetReset::Earliest => DeliverPolicy::All,
        };
        let mut config = pull::Config {
            name: Some(subscription.group.clone()),
            filter_subject: subscription.topic_pattern.clone(),
            deliver_policy,
            ack_policy: AckPolicy::Explicit,
            ..Default::default()
        };
        match subscription.membership {
            Membership::Durable => config.durable_name = Some(subscription.group.clone()),
            Membership::Ephemeral => config.inactive_threshold = TAIL_INACTIVE_THRESHOLD,
        }
        config
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Result<Box<dyn Consumer>, TransportError> {
        let config = Self::consumer_config(&subscription);
        let consumer = self
            .jetstream
            .create_consumer_on_stream(config, self.stream_name.as_str())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        info!(
            stream = %self.stream_name,
            group = %subscription.group,
            subject = %subscription.topic_pattern,
            "consumer created"
        );

        let partition = Partition {
            topic: subscription.topic_pattern.clone(),
            index: 0,
        };
        Ok(Box::new(NatsConsumer {
            jetstream: self.jetstream.clone(),
            stream_name: self.stream_name.clone(),
            group: subscription.group,
            ephemeral: subscription.membership == Membership::Ephemeral,
            consumer,
            messages: None,
            unacked: None,
            queued: VecDeque::from([StreamEvent::Assigned(vec![partition.clone()])]),
            partition,
        }))
    }
}

struct NatsConsumer {
    jetstream: jetstream::Context,
    stream_name: String,
    group: String,
    ephemeral: bool,
    consumer: PullConsumer,
    partition: Partition,
    messages: Option<pull::Stream>,
    /// The last record handed out; acked when the next event is requested.
    unacked: Option<jetstream::Message>,
    queued: VecDeque<StreamEvent>,
}

impl NatsConsumer {
    async fn ack_pending(&mut self) {
        if let Some(msg) = self.unacked.take() {
            if let Err(e) = msg.ack().await {
                warn!(group = %self.group, error = %e, "failed to ack record");
            }
        }
    }
}

#[async_trait]
impl Consumer for NatsConsumer {
    fn group(&self) -> &str {
        &self.group
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.queued.pop_front() {
            return Some(event);
        }
        self.ack_pending().await;

        let Some(messages) = self.messages.as_mut() else {
            // Nothing assigned: the only way out is the caller giving up.
            return std::future::pending().await;
        };

        match messages.next().await {
            None => Some(StreamEvent::Error(TransportError::Closed)),
            Some(Err(e)) => Some(StreamEvent::Error(TransportError::Broker(e.to_string()))),
            Some(Ok(msg)) => {
                let caught_up = msg.info().map(|info| info.pending == 0).unwrap_or(false);
                let record = Record {
                    subject: msg.subject.to_string(),
                    partition: self.partition.clone(),
                    payload: msg.payload.clone(),
                };
                self.unacked = Some(msg);
                if caught_up {
                    self.queued
                        .push_back(StreamEvent::PartitionEof(self.partition.clone()));
                }
                Some(StreamEvent::Record(record))
            }
        }
    }

    async fn assign(&mut self, partitions: &[Partition]) -> Result<(), TransportError> {
        if self.messages.is_some() {
            return Ok(());
        }
        let messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        debug!(group = %self.group, ?partitions, "pulling messages");
        self.messages = Some(messages);
        Ok(())
    }

    async fn unassign(&mut self) -> Result<(), TransportError> {
        self.ack_pending().await;
        self.messages = None;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), TransportError> {
        self.ack_pending().await;
        self.messages = None;
        if self.ephemeral {
            self.jetstream
                .delete_consumer_from_stream(self.group.as_str(), self.stream_name.as_str())
                .await
                .map_err(|e| TransportError::Broker(format!("failed to delete consumer: {e}")))?;
            debug!(group = %self.group, "ephemeral consumer deleted");
        }
        Ok(())
    }
}
