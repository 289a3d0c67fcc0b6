//! Process wiring for `sluice serve`.
//!
//! [`serve`] connects to the broker and hands off to [`run`], which owns the
//! whole lifecycle once a transport and a listener exist:
//!
//! 1. start the store and the ingestion loop
//! 2. serve HTTP until a shutdown signal or a fatal ingestion error
//! 3. end every tail, drain HTTP, stop the loop, flush the store
//!
//! A fatal ingestion error is returned as `Err` so the process exits non-zero
//! and the supervisor can restart it.

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use sluice_core::config::{Config, StoreBackend, StoreConfig};
use sluice_core::store::{ElasticsearchStore, RingStore};
use sluice_core::{Classifier, LinePipeline, LogStore};
use sluice_feeds::{IngestionLoop, NatsTransport, Subscription, TailService, Transport};
use sluice_web::AppState;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub fn build_store(config: &StoreConfig) -> Arc<dyn LogStore> {
    match config.backend {
        StoreBackend::Memory => Arc::new(RingStore::with_capacity(config.capacity)),
        StoreBackend::Elasticsearch => Arc::new(ElasticsearchStore::new(
            config.elasticsearch.clone(),
            config.capacity,
        )),
    }
}

pub fn build_pipeline(config: &Config) -> LinePipeline {
    LinePipeline::new(
        config.stream.message_type,
        Classifier::new(config.classifier.controller_container.clone()),
    )
}

/// Connect to JetStream, bind the HTTP listener and run until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let transport = NatsTransport::connect(
        &config.stream.brokers,
        &config.stream.stream_name,
        config.stream.connect_timeout(),
    )
    .await
    .context("failed to connect to the stream broker")?;
    transport
        .ensure_stream(std::slice::from_ref(&config.stream.topic))
        .await
        .context("failed to prepare the log stream")?;

    let listener = TcpListener::bind(&config.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;

    run(config, Arc::new(transport), listener, shutdown_signal()).await
}

enum Outcome {
    Shutdown,
    Fatal(sluice_feeds::TransportError),
    ServerExited(anyhow::Result<()>),
}

pub async fn run<F>(
    config: Config,
    transport: Arc<dyn Transport>,
    listener: TcpListener,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let store = build_store(&config.store);
    store.start().await.context("failed to start the store")?;

    let pipeline = build_pipeline(&config);
    let ingest = IngestionLoop::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        pipeline.clone(),
        Subscription::durable(&config.stream.group_id, &config.stream.topic),
        config.stream.stop_timeout(),
    );
    let stopped = ingest
        .stopped()
        .context("ingestion stopped signal already taken")?;
    ingest.start().await.context("failed to start ingestion")?;

    let tails = Arc::new(TailService::new(
        transport,
        pipeline,
        config.stream.topic.clone(),
        config.stream.tail_group_prefix.clone(),
    ));
    let app = sluice_web::router(AppState::new(Arc::clone(&store), Arc::clone(&tails)));

    info!(addr = %listener.local_addr()?, "http listening");
    let http_shutdown = CancellationToken::new();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(http_shutdown.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });

    let outcome = tokio::select! {
        _ = shutdown => Outcome::Shutdown,
        fatal = stopped.wait() => match fatal {
            Some(err) => Outcome::Fatal(err),
            None => Outcome::Shutdown,
        },
        exited = &mut server => Outcome::ServerExited(match exited {
            Ok(res) => res.context("http server failed"),
            Err(e) => Err(anyhow!("http server task failed: {e}")),
        }),
    };

    info!("shutting down");
    tails.shutdown();
    http_shutdown.cancel();

    if let Err(e) = ingest.stop().await {
        warn!(error = %e, "ingestion loop did not stop cleanly");
    }

    let (fatal, server_result) = match outcome {
        Outcome::Fatal(err) => (Some(err), join_server(server).await),
        Outcome::ServerExited(res) => (None, Some(res)),
        Outcome::Shutdown => (None, join_server(server).await),
    };

    if let Err(e) = store.stop().await {
        warn!(error = %e, "failed to flush the store");
    }

    if let Some(err) = fatal {
        error!(error = %err, "exiting after fatal ingestion error");
        return Err(anyhow!(err).context("ingestion loop stopped"));
    }
    if let Some(res) = server_result {
        res?;
    }
    info!("shutdown complete");
    Ok(())
}

/// Waits for the drained server. `None` means it exited cleanly.
async fn join_server(server: JoinHandle<std::io::Result<()>>) -> Option<anyhow::Result<()>> {
    match server.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(Err(anyhow!(e).context("http server failed"))),
        Err(e) => Some(Err(anyhow!("http server task failed: {e}"))),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
