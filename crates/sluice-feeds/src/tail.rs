//! Tail sessions — one short-lived consumer per live HTTP tail.
//!
//! Every session joins the stream under its own unique group so it gets a
//! full copy of the stream rather than competing with the ingestion loop.
//! Control-plane lines are filed under the app named in the message, not the
//! subject they were published on, so sessions subscribe to the whole topic
//! and filter after classification.

use std::sync::Arc;

use sluice_core::classify::process_matches;
use sluice_core::{ClassifiedLine, LinePipeline};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{Consumer, StreamEvent, Subscription, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRequest {
    pub app: String,
    /// Container-name fragment; `None` streams every process.
    pub process: Option<String>,
}

impl TailRequest {
    pub fn new(app: impl Into<String>, process: Option<String>) -> Self {
        Self {
            app: app.into(),
            process: process.filter(|p| !p.is_empty()),
        }
    }

    pub fn matches(&self, line: &ClassifiedLine) -> bool {
        if line.target_key != self.app {
            return false;
        }
        match &self.process {
            None => true,
            Some(process) => line
                .process_hint
                .as_deref()
                .is_some_and(|name| process_matches(name, process)),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEnd {
    Cancelled,
    /// The sink's receiver went away.
    SinkClosed,
    Transport(TransportError),
}

/// Opens tail sessions against one transport.
///
/// Holds a shutdown token; every session's token should be a child of it
/// (see [`TailService::session_token`]) so shutting the service down ends
/// every open tail.
pub struct TailService {
    transport: Arc<dyn Transport>,
    pipeline: LinePipeline,
    topic: String,
    group_prefix: String,
    shutdown: CancellationToken,
}

impl TailService {
    pub fn new(
        transport: Arc<dyn Transport>,
        pipeline: LinePipeline,
        topic: impl Into<String>,
        group_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            pipeline,
            topic: topic.into(),
            group_prefix: group_prefix.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel every session opened with a [`TailService::session_token`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stream matching lines into `sink` until `cancel` fires, the sink is
    /// dropped, or the transport fails.
    ///
    /// Only a failed subscription is an `Err`; everything after that is
    /// reported as a [`TailEnd`]. The consumer is closed before returning on
    /// every path.
    pub async fn open(
        &self,
        request: TailRequest,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<TailEnd, TransportError> {
        let subscription = Subscription::ephemeral(&self.group_prefix, self.topic.clone());
        let group = subscription.group.clone();
        let mut consumer = self.transport.subscribe(subscription).await?;
        info!(app = %request.app, process = ?request.process, %group, "tail session opened");

        let end = self.pump(consumer.as_mut(), &request, &sink, &cancel).await;

        if let Err(e) = consumer.close().await {
            warn!(%group, error = %e, "failed to close tail consumer");
        }
        info!(app = %request.app, %group, reason = ?end, "tail session closed");
        Ok(end)
    }

    async fn pump(
        &self,
        consumer: &mut dyn Consumer,
        request: &TailRequest,
        sink: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> TailEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TailEnd::Cancelled,
                event = consumer.next_event() => event,
            };

            match event {
                Some(StreamEvent::Assigned(partitions)) => {
                    if let Err(e) = consumer.assign(&partitions).await {
                        return TailEnd::Transport(e);
                    }
                }
                Some(StreamEvent::Revoked(_)) => {
                    if let Err(e) = consumer.unassign().await {
                        debug!(error = %e, "tail failed to release partitions");
                    }
                }
                Some(StreamEvent::Record(record)) => {
                    let Some(line) = self.pipeline.process(&record.payload) else {
                        continue;
                    };
                    if !request.matches(&line) {
                        continue;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return TailEnd::Cancelled,
                        sent = sink.send(terminate_line(&line.rendered)) => {
                            if sent.is_err() {
                                return TailEnd::SinkClosed;
                            }
                        }
                    }
                }
                Some(StreamEvent::PartitionEof(_)) => {}
                Some(StreamEvent::Error(e)) => return TailEnd::Transport(e),
                None => return TailEnd::Transport(TransportError::Closed),
            }
        }
    }
}

/// Exactly one trailing newline.
pub fn terminate_line(text: &str) -> String {
    let mut line = text.trim_end_matches(['\n', '\r']).to_string();
    line.push('\n');
    line
}
