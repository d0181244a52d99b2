//! Upstream consumer loops
//!
//! Each loop owns one upstream connection at a time. It relays messages into
//! the hub until a restart request, the end of the connection or shutdown,
//! then retires the connection and, for restarts, acknowledges the request
//! before connecting again with the current filter.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use feedwall_core::config::{FailurePolicy, UpstreamConfig};
use feedwall_core::metrics;
use feedwall_core::models::Platform;
use feedwall_core::{Error, Result};

use crate::hub::{FanoutHub, RestartRequest};
use crate::source::{ChatConnector, StreamConnector};

/// Connect retry and failure behaviour for one upstream source
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Total connect attempts before the failure policy applies
    pub connect_attempts: usize,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub on_connect_failure: FailurePolicy,
}

impl SourceOptions {
    #[must_use]
    pub fn from_config(upstream: &UpstreamConfig, on_connect_failure: FailurePolicy) -> Self {
        Self {
            connect_attempts: upstream.connect_attempts.max(1),
            backoff_min: Duration::from_millis(upstream.backoff_min_ms),
            backoff_max: Duration::from_millis(upstream.backoff_max_ms),
            on_connect_failure,
        }
    }

    /// Delays before each attempt, the first one immediate
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.backoff_min)
            .with_max_delay(self.backoff_max)
            .with_max_times(self.connect_attempts.saturating_sub(1))
            .with_jitter()
            .build();

        std::iter::once(Duration::ZERO).chain(backoff)
    }
}

/// A connection that lasted this long counts as healthy even if it relayed
/// nothing, so the next drop starts over from the minimum delay.
const STABLE_CONNECTION: Duration = Duration::from_secs(30);

/// Floor for reconnect delays, so a zero `backoff_min` still paces retries
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Delay before reconnecting after a connection ended on its own.
///
/// Grows while connections keep dropping without relaying anything and
/// starts over once one has proved healthy.
struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    delays: ExponentialBackoff,
}

impl ReconnectBackoff {
    fn new(options: &SourceOptions) -> Self {
        let min = options.backoff_min.max(MIN_RECONNECT_DELAY);
        let max = options.backoff_max.max(min);
        Self {
            min,
            max,
            delays: Self::build(min, max),
        }
    }

    fn build(min: Duration, max: Duration) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(min)
            .with_max_delay(max)
            .without_max_times()
            .with_jitter()
            .build()
    }

    fn next_delay(&mut self) -> Duration {
        self.delays.next().unwrap_or(self.max).max(self.min)
    }

    fn reset(&mut self) {
        self.delays = Self::build(self.min, self.max);
    }

    /// Delay for a connection that ended after `uptime`, having relayed
    /// something or not
    fn after_drop(&mut self, relayed: bool, uptime: Duration) -> Duration {
        if relayed || uptime >= STABLE_CONNECTION {
            self.reset();
        }
        self.next_delay()
    }
}

enum Connect<T> {
    Connected(T),
    Shutdown,
    Exhausted(Error),
}

/// Why a relay stopped
enum Relay {
    Restart(RestartRequest),
    Ended,
    Shutdown,
}

async fn connect_with_backoff<T, F, Fut>(
    platform: Platform,
    filter: &str,
    options: &SourceOptions,
    shutdown: &CancellationToken,
    mut connect: F,
) -> Connect<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for delay in options.delays() {
        if delay > Duration::ZERO {
            tokio::select! {
                () = shutdown.cancelled() => return Connect::Shutdown,
                () = tokio::time::sleep(delay) => {}
            }
        }

        let attempt = tokio::select! {
            () = shutdown.cancelled() => return Connect::Shutdown,
            result = connect() => result,
        };

        match attempt {
            Ok(connection) => return Connect::Connected(connection),
            Err(e) => {
                metrics::UPSTREAM_CONNECT_FAILURES
                    .with_label_values(&[platform.as_str()])
                    .inc();
                warn!(
                    platform = %platform,
                    filter = %filter,
                    error = %e,
                    "Upstream connect failed"
                );
                last_err = Some(e);
            }
        }
    }

    Connect::Exhausted(
        last_err.unwrap_or_else(|| Error::connect(platform, "no connect attempt was made")),
    )
}

fn give_up(platform: Platform, policy: FailurePolicy, err: Error) -> Result<()> {
    match policy {
        FailurePolicy::Degrade => {
            error!(
                platform = %platform,
                error = %err,
                "Upstream retries exhausted, source disabled"
            );
            Ok(())
        }
        FailurePolicy::Exit => Err(Error::SourceFatal {
            platform,
            message: err.to_string(),
        }),
    }
}

fn record_restart(platform: Platform, request: RestartRequest) {
    metrics::UPSTREAM_RESTARTS
        .with_label_values(&[platform.as_str()])
        .inc();
    request.acknowledge();
}

/// Wait out `delay` before reconnecting.
///
/// No connection is open meanwhile, so restart requests are acknowledged at
/// once; the reconnect reads the latest filter. Returns `false` on shutdown.
async fn pause_before_reconnect(
    platform: Platform,
    delay: Duration,
    restarts: &mut mpsc::Receiver<RestartRequest>,
    shutdown: &CancellationToken,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return false,
            () = &mut sleep => return true,
            request = restarts.recv() => match request {
                Some(request) => record_restart(platform, request),
                None => return false,
            },
        }
    }
}

/// Drive the chat source until shutdown or until its connect retries are
/// exhausted.
///
/// Returns an error only when the failure policy is
/// [`FailurePolicy::Exit`].
pub async fn run_chat_source(
    hub: Arc<FanoutHub>,
    connector: Arc<dyn ChatConnector>,
    mut restarts: mpsc::Receiver<RestartRequest>,
    options: SourceOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    let platform = Platform::Chat;
    let mut reconnect = ReconnectBackoff::new(&options);

    loop {
        let channel = hub.settings().channel;
        info!(platform = %platform, channel = %channel, "Connecting chat source");

        let client = &*connector;
        let target = channel.as_str();
        let mut connection = match connect_with_backoff(platform, target, &options, &shutdown, move || {
            client.connect(target)
        })
        .await
        {
            Connect::Connected(connection) => connection,
            Connect::Shutdown => return Ok(()),
            Connect::Exhausted(err) => return give_up(platform, options.on_connect_failure, err),
        };

        info!(platform = %platform, channel = %channel, "Chat source joined");
        let connected_at = Instant::now();
        let mut relayed = false;

        let relay = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Relay::Shutdown,
                request = restarts.recv() => match request {
                    Some(request) if hub.settings().channel == channel => {
                        debug!(platform = %platform, channel = %channel, "Already on requested channel");
                        request.acknowledge();
                    }
                    Some(request) => break Relay::Restart(request),
                    None => break Relay::Shutdown,
                },
                message = connection.next_message() => match message {
                    Some(Ok(message)) => {
                        relayed = true;
                        hub.ingest_chat(message);
                    }
                    Some(Err(e)) => {
                        warn!(platform = %platform, channel = %channel, error = %e, "Chat connection failed");
                        break Relay::Ended;
                    }
                    None => break Relay::Ended,
                },
            }
        };

        match relay {
            Relay::Shutdown => {
                connection.quit().await;
                info!(platform = %platform, "Chat source stopped");
                return Ok(());
            }
            Relay::Ended => {
                drop(connection);
                let delay = reconnect.after_drop(relayed, connected_at.elapsed());
                warn!(
                    platform = %platform,
                    channel = %channel,
                    delay = ?delay,
                    "Chat connection ended, reconnecting"
                );
                if !pause_before_reconnect(platform, delay, &mut restarts, &shutdown).await {
                    info!(platform = %platform, "Chat source stopped");
                    return Ok(());
                }
            }
            Relay::Restart(request) => {
                connection.quit().await;
                info!(platform = %platform, channel = %channel, "Left chat channel for restart");
                record_restart(platform, request);
                reconnect.reset();
            }
        }
    }
}

/// Drive the stream source until shutdown or until its connect retries are
/// exhausted.
///
/// Returns an error only when the failure policy is
/// [`FailurePolicy::Exit`].
pub async fn run_stream_source(
    hub: Arc<FanoutHub>,
    connector: Arc<dyn StreamConnector>,
    mut restarts: mpsc::Receiver<RestartRequest>,
    options: SourceOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    let platform = Platform::Stream;
    let mut reconnect = ReconnectBackoff::new(&options);

    loop {
        let keyword = hub.settings().keyword;
        info!(platform = %platform, keyword = %keyword, "Opening stream source");

        let client = &*connector;
        let target = keyword.as_str();
        let mut connection = match connect_with_backoff(platform, target, &options, &shutdown, move || {
            client.open(target)
        })
        .await
        {
            Connect::Connected(connection) => connection,
            Connect::Shutdown => return Ok(()),
            Connect::Exhausted(err) => return give_up(platform, options.on_connect_failure, err),
        };

        info!(platform = %platform, keyword = %keyword, "Stream source open");
        let connected_at = Instant::now();
        let mut relayed = false;

        let relay = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Relay::Shutdown,
                request = restarts.recv() => match request {
                    Some(request) if hub.settings().keyword == keyword => {
                        debug!(platform = %platform, keyword = %keyword, "Already tracking requested keyword");
                        request.acknowledge();
                    }
                    Some(request) => break Relay::Restart(request),
                    None => break Relay::Shutdown,
                },
                item = connection.next_item() => match item {
                    Some(Ok(item)) => {
                        relayed = true;
                        hub.ingest_stream(item);
                    }
                    Some(Err(e)) => {
                        warn!(platform = %platform, keyword = %keyword, error = %e, "Stream connection failed");
                        break Relay::Ended;
                    }
                    None => break Relay::Ended,
                },
            }
        };

        match relay {
            Relay::Shutdown => {
                connection.stop().await;
                info!(platform = %platform, "Stream source stopped");
                return Ok(());
            }
            Relay::Ended => {
                drop(connection);
                let delay = reconnect.after_drop(relayed, connected_at.elapsed());
                warn!(
                    platform = %platform,
                    keyword = %keyword,
                    delay = ?delay,
                    "Stream ended, reopening"
                );
                if !pause_before_reconnect(platform, delay, &mut restarts, &shutdown).await {
                    info!(platform = %platform, "Stream source stopped");
                    return Ok(());
                }
            }
            Relay::Restart(request) => {
                connection.stop().await;
                info!(platform = %platform, keyword = %keyword, "Closed stream for restart");
                record_restart(platform, request);
                reconnect.reset();
            }
        }
    }
}
