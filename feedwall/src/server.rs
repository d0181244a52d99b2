//! Server lifecycle management
//!
//! Starts the HTTP server and both upstream loops, then waits for a
//! shutdown signal or for a source whose failure policy stops the process.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use feedwall_api::{create_router, AppState};
use feedwall_core::Config;
use feedwall_hub::{
    run_chat_source, run_stream_source, ChatConnector, FanoutHub, RestartReceivers, SourceOptions,
    StreamConnector,
};
use feedwall_upstream::{FilterStreamConnector, IrcConnector};

const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FeedwallServer {
    config: Config,
    hub: Arc<FanoutHub>,
    receivers: RestartReceivers,
    shutdown: CancellationToken,
}

impl FeedwallServer {
    pub fn new(config: Config) -> Self {
        let (hub, receivers) = FanoutHub::new(&config.hub);
        Self {
            config,
            hub: Arc::new(hub),
            receivers,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start all components and wait for shutdown
    pub async fn start(self) -> anyhow::Result<()> {
        let Self {
            config,
            hub,
            receivers,
            shutdown,
        } = self;

        let mut http_handle = start_http_server(&config, hub.clone(), shutdown.clone()).await?;
        let mut sources = start_sources(&config, &hub, receivers, &shutdown)?;

        info!("All components started");

        let (outcome, http_running) = tokio::select! {
            joined = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                let result = flatten(joined)
                    .and_then(|()| Err(anyhow::anyhow!("HTTP server stopped unexpectedly")));
                (result, false)
            }
            err = wait_for_fatal(&mut sources) => {
                error!("Upstream source stopped the server: {}", err);
                (Err(err), true)
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                (Ok(()), true)
            }
        };

        shutdown.cancel();
        stop_sources(sources).await;
        if http_running {
            if let Err(e) = flatten(http_handle.await) {
                warn!("HTTP server error during shutdown: {}", e);
            }
        }

        info!("feedwall stopped");
        outcome
    }
}

/// Bind the listener and serve the router until the token is cancelled
async fn start_http_server(
    config: &Config,
    hub: Arc<FanoutHub>,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let http_address = config.http_address();
    let listener = tokio::net::TcpListener::bind(&http_address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
    info!("HTTP server listening on {}", http_address);

    let state = AppState::new(
        hub,
        shutdown.clone(),
        Duration::from_secs(config.server.keep_alive_secs.max(1)),
    );
    let router = create_router(state);

    let handle = tokio::spawn(async move {
        // Event streams end on the same token, so the drain does not hang on them.
        let graceful = shutdown.clone().cancelled_owned();
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .into_future();

        tokio::select! {
            result = serve => {
                result?;
            }
            () = async {
                shutdown.cancelled().await;
                tokio::time::sleep(HTTP_DRAIN_TIMEOUT).await;
            } => {
                warn!("HTTP drain timeout reached, dropping remaining connections");
            }
        }

        info!("HTTP server shut down gracefully");
        Ok::<(), anyhow::Error>(())
    });

    Ok(handle)
}

fn start_sources(
    config: &Config,
    hub: &Arc<FanoutHub>,
    receivers: RestartReceivers,
    shutdown: &CancellationToken,
) -> anyhow::Result<JoinSet<feedwall_core::Result<()>>> {
    let RestartReceivers { chat, stream } = receivers;

    let chat_connector: Arc<dyn ChatConnector> = Arc::new(IrcConnector::new(&config.chat)?);
    let stream_connector: Arc<dyn StreamConnector> =
        Arc::new(FilterStreamConnector::new(&config.stream)?);

    let mut sources = JoinSet::new();
    sources.spawn(run_chat_source(
        hub.clone(),
        chat_connector,
        chat,
        SourceOptions::from_config(&config.upstream, config.chat.on_connect_failure),
        shutdown.child_token(),
    ));
    sources.spawn(run_stream_source(
        hub.clone(),
        stream_connector,
        stream,
        SourceOptions::from_config(&config.upstream, config.stream.on_connect_failure),
        shutdown.child_token(),
    ));

    info!(
        channel = %hub.settings().channel,
        keyword = %hub.settings().keyword,
        "Upstream sources started"
    );
    Ok(sources)
}

fn flatten(joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    joined.map_err(|e| anyhow::anyhow!("HTTP server task failed: {e}"))?
}

/// Resolve with the first error a source returns; sources that stop
/// cleanly (degraded) leave the server running.
async fn wait_for_fatal(sources: &mut JoinSet<feedwall_core::Result<()>>) -> anyhow::Error {
    while let Some(joined) = sources.join_next().await {
        match joined {
            Ok(Ok(())) => info!("Upstream source finished"),
            Ok(Err(e)) => return e.into(),
            Err(e) => return anyhow::anyhow!("Upstream source task failed: {e}"),
        }
    }

    warn!("No upstream sources left running, still serving subscribers");
    std::future::pending().await
}

/// Give the source loops a moment to leave their channel or close the stream
async fn stop_sources(mut sources: JoinSet<feedwall_core::Result<()>>) {
    let drained = tokio::time::timeout(SOURCE_STOP_TIMEOUT, async {
        while let Some(joined) = sources.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!("Upstream source error during shutdown: {}", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!("Upstream sources did not stop in time, aborting");
        sources.abort_all();
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
