//! Ingestion loop — the singleton consumer feeding the store.
//!
//! Lifecycle: `Idle → Listening → Stopping → Stopped`. The state lives in a
//! `watch` channel and every transition goes through `send_if_modified`, so
//! there is exactly one writer-visible answer to "is the loop running".
//!
//! ```text
//!   start() ──► subscribe ──► spawn event loop ──► Listening
//!                                   │
//!        Assigned  → consumer.assign
//!        Revoked   → consumer.unassign   (failure logged)
//!        Record    → decode → classify → store.write   (failures logged)
//!        Eof       → debug
//!        Error     → Stopped, fatal error sent once on the stopped signal
//!        cancel    → abandon the in-flight event, close consumer, Stopped
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sluice_core::{LinePipeline, LogStore};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::{Consumer, Record, StreamEvent, Subscription, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Listening,
    Stopping,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Listening => "listening",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion loop could not subscribe: {0}")]
    Subscribe(#[source] TransportError),

    #[error("ingestion task failed: {0}")]
    Task(String),
}

/// Counters for what the loop has seen. Cheap to read from anywhere.
#[derive(Debug, Default)]
pub struct IngestStats {
    records: AtomicU64,
    stored: AtomicU64,
    discarded: AtomicU64,
    write_failures: AtomicU64,
}

impl IngestStats {
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    /// Records that failed to decode.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

/// Resolves once the loop has terminated.
///
/// Yields the fatal transport error when the loop died on its own and `None`
/// after a clean [`IngestionLoop::stop`].
#[derive(Debug)]
pub struct StoppedSignal {
    rx: oneshot::Receiver<TransportError>,
}

impl StoppedSignal {
    pub async fn wait(self) -> Option<TransportError> {
        self.rx.await.ok()
    }
}

pub struct IngestionLoop {
    transport: Arc<dyn Transport>,
    store: Arc<dyn LogStore>,
    pipeline: LinePipeline,
    subscription: Subscription,
    stop_timeout: Duration,
    state: Arc<watch::Sender<LoopState>>,
    stats: Arc<IngestStats>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    fatal_tx: Mutex<Option<oneshot::Sender<TransportError>>>,
    fatal_rx: Mutex<Option<oneshot::Receiver<TransportError>>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl IngestionLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn LogStore>,
        pipeline: LinePipeline,
        subscription: Subscription,
        stop_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        let (fatal_tx, fatal_rx) = oneshot::channel();
        Self {
            transport,
            store,
            pipeline,
            subscription,
            stop_timeout,
            state: Arc::new(state),
            stats: Arc::new(IngestStats::default()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            fatal_tx: Mutex::new(Some(fatal_tx)),
            fatal_rx: Mutex::new(Some(fatal_rx)),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Subscribe and spawn the event loop.
    ///
    /// Only the first successful call does anything; a failed subscription
    /// leaves the loop `Idle` so the caller may retry.
    pub async fn start(&self) -> Result<(), IngestError> {
        let _guard = self.start_lock.lock().await;
        if self.state() != LoopState::Idle {
            debug!(state = %self.state(), "ingestion loop already started");
            return Ok(());
        }

        let consumer = self
            .transport
            .subscribe(self.subscription.clone())
            .await
            .map_err(IngestError::Subscribe)?;

        let fatal_tx = self.fatal_tx.lock().take();
        let entered = fatal_tx.is_some()
            && self.state.send_if_modified(|state| {
                if *state == LoopState::Idle {
                    *state = LoopState::Listening;
                    true
                } else {
                    false
                }
            });
        let Some(fatal_tx) = fatal_tx.filter(|_| entered) else {
            // stop() won the race while we were subscribing.
            if let Err(e) = consumer.close().await {
                warn!(error = %e, "failed to close ingestion consumer");
            }
            return Ok(());
        };

        info!(
            group = %self.subscription.group,
            topic = %self.subscription.topic_pattern,
            "ingestion loop listening"
        );

        let worker = Worker {
            store: Arc::clone(&self.store),
            pipeline: self.pipeline.clone(),
            stats: Arc::clone(&self.stats),
        };
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let fatal = worker.run(consumer, cancel).await;
            state.send_replace(LoopState::Stopped);
            if let Some(err) = fatal {
                // The receiver may be gone if nobody asked for the signal.
                let _ = fatal_tx.send(err);
            }
            info!("ingestion loop stopped");
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop consuming and release the subscription. Safe from any task and
    /// safe to call repeatedly.
    pub async fn stop(&self) -> Result<(), IngestError> {
        self.state.send_if_modified(|state| match state {
            LoopState::Listening => {
                *state = LoopState::Stopping;
                true
            }
            LoopState::Idle => {
                *state = LoopState::Stopped;
                true
            }
            LoopState::Stopping | LoopState::Stopped => false,
        });
        self.cancel.cancel();
        self.fatal_tx.lock().take();

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.stop_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.state.send_replace(LoopState::Stopped);
                    return Err(IngestError::Task(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        timeout = ?self.stop_timeout,
                        "ingestion loop did not stop in time; aborting, consumer may stay open"
                    );
                    handle.abort();
                }
            }
        }
        self.state.send_replace(LoopState::Stopped);
        Ok(())
    }

    /// The one-shot termination signal. `None` once it has been taken.
    pub fn stopped(&self) -> Option<StoppedSignal> {
        self.fatal_rx.lock().take().map(|rx| StoppedSignal { rx })
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct Worker {
    store: Arc<dyn LogStore>,
    pipeline: LinePipeline,
    stats: Arc<IngestStats>,
}

impl Worker {
    /// Runs until cancelled or the transport fails. Returns the fatal error.
    ///
    /// Cancellation also interrupts a slow store write or rebalance, so the
    /// consumer is closed even when the store hangs. The abandoned record was
    /// never committed and is redelivered to the next member.
    async fn run(
        &self,
        mut consumer: Box<dyn Consumer>,
        cancel: CancellationToken,
    ) -> Option<TransportError> {
        let fatal = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                event = consumer.next_event() => event,
            };
            let handled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                handled = self.handle_event(consumer.as_mut(), event) => handled,
            };
            if let Err(e) = handled {
                break Some(e);
            }
        };

        if let Some(e) = &fatal {
            error!(error = %e, "ingestion loop hit a fatal transport error");
        }
        if let Err(e) = consumer.close().await {
            warn!(error = %e, "failed to close ingestion consumer");
        }
        fatal
    }

    /// `Err` ends the loop.
    async fn handle_event(
        &self,
        consumer: &mut dyn Consumer,
        event: Option<StreamEvent>,
    ) -> Result<(), TransportError> {
        match event {
            Some(StreamEvent::Assigned(partitions)) => {
                info!(?partitions, "partitions assigned");
                consumer.assign(&partitions).await?;
            }
            Some(StreamEvent::Revoked(partitions)) => {
                info!(?partitions, "partitions revoked");
                if let Err(e) = consumer.unassign().await {
                    warn!(error = %e, "failed to release partitions");
                }
            }
            Some(StreamEvent::Record(record)) => self.handle_record(record).await,
            Some(StreamEvent::PartitionEof(partition)) => {
                debug!(%partition, "reached end of partition");
            }
            Some(StreamEvent::Error(e)) => return Err(e),
            None => return Err(TransportError::Closed),
        }
        Ok(())
    }

    async fn handle_record(&self, record: Record) {
        self.stats.records.fetch_add(1, Ordering::Relaxed);
        let Some(line) = self.pipeline.process(&record.payload) else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match self
            .store
            .write(&line.target_key, &line.rendered, line.process_hint.as_deref())
            .await
        {
            Ok(()) => {
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    app = %line.target_key,
                    subject = %record.subject,
                    error = %e,
                    "failed to store line"
                );
            }
        }
    }
}
