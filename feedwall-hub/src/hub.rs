use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use feedwall_core::config::HubConfig;
use feedwall_core::metrics;
use feedwall_core::models::{ChatMessage, FilterSettings, NormalizedEvent, Platform, StreamItem};

use crate::registry::{BroadcastReport, SubscriberRegistry};
use crate::session::SubscriberSession;

/// Ask an upstream loop to drop its connection and reconnect with the
/// current filter
#[derive(Debug)]
pub struct RestartRequest {
    ack: Option<oneshot::Sender<()>>,
}

impl RestartRequest {
    /// Tell the requester the old connection is gone
    pub fn acknowledge(self) {
        if let Some(ack) = self.ack {
            // The requester may have given up waiting.
            let _ = ack.send(());
        }
    }
}

/// Receiving ends of the restart channels, one per upstream loop
#[derive(Debug)]
pub struct RestartReceivers {
    pub chat: mpsc::Receiver<RestartRequest>,
    pub stream: mpsc::Receiver<RestartRequest>,
}

/// What a filter change did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// New value equals the current one, nothing happened
    Unchanged,
    /// Value stored and the upstream loop retired its old connection
    Restarted,
    /// Value stored, but no upstream loop is running to pick it up now
    SourceNotRunning,
}

/// Shared state between the HTTP layer and the two upstream loops.
///
/// Holds the runtime filters, the subscriber registry and one restart
/// channel per upstream source. Filter changes are serialized; a change to
/// the channel or keyword does not return until the matching loop has torn
/// down the connection that used the old value.
pub struct FanoutHub {
    registry: SubscriberRegistry,
    settings: RwLock<FilterSettings>,
    chat_restart: mpsc::Sender<RestartRequest>,
    stream_restart: mpsc::Sender<RestartRequest>,
    change_lock: Mutex<()>,
}

impl FanoutHub {
    /// Build a hub from configuration.
    ///
    /// The returned receivers belong to the upstream loops. Dropping one
    /// makes changes for that source report [`ChangeOutcome::SourceNotRunning`].
    #[must_use]
    pub fn new(config: &HubConfig) -> (Self, RestartReceivers) {
        // One pending request is enough: the loop always reads the latest value.
        let (chat_tx, chat_rx) = mpsc::channel(1);
        let (stream_tx, stream_rx) = mpsc::channel(1);

        let hub = Self {
            registry: SubscriberRegistry::new(config.subscriber_buffer),
            settings: RwLock::new(FilterSettings::from(config)),
            chat_restart: chat_tx,
            stream_restart: stream_tx,
            change_lock: Mutex::new(()),
        };

        (
            hub,
            RestartReceivers {
                chat: chat_rx,
                stream: stream_rx,
            },
        )
    }

    /// Snapshot of the current filters
    #[must_use]
    pub fn settings(&self) -> FilterSettings {
        self.settings.read().clone()
    }

    #[must_use]
    pub const fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Switch the chat source to `channel` and wait until the old
    /// connection is retired
    pub async fn set_channel(&self, channel: &str) -> ChangeOutcome {
        let _guard = self.change_lock.lock().await;

        {
            let mut settings = self.settings.write();
            if settings.channel == channel {
                return ChangeOutcome::Unchanged;
            }
            info!(
                platform = %Platform::Chat,
                from = %settings.channel,
                to = %channel,
                "Chat channel changed"
            );
            settings.channel = channel.to_string();
        }

        Self::restart(Platform::Chat, &self.chat_restart).await
    }

    /// Switch the stream source to `keyword` and wait until the old
    /// connection is retired
    pub async fn set_keyword(&self, keyword: &str) -> ChangeOutcome {
        let _guard = self.change_lock.lock().await;

        {
            let mut settings = self.settings.write();
            if settings.keyword == keyword {
                return ChangeOutcome::Unchanged;
            }
            info!(
                platform = %Platform::Stream,
                from = %settings.keyword,
                to = %keyword,
                "Stream keyword changed"
            );
            settings.keyword = keyword.to_string();
        }

        Self::restart(Platform::Stream, &self.stream_restart).await
    }

    /// Toggle delivery of reshares. Takes effect on the next stream item.
    ///
    /// Returns whether the value changed.
    pub fn set_show_reshares(&self, show: bool) -> bool {
        let mut settings = self.settings.write();
        if settings.show_reshares == show {
            return false;
        }
        info!(show_reshares = show, "Reshare display changed");
        settings.show_reshares = show;
        true
    }

    /// Store a new channel and queue a restart without waiting for it.
    ///
    /// Returns whether the value changed. A request already queued is
    /// reused, since the loop reads the latest value when it reconnects.
    pub fn request_channel(&self, channel: &str) -> bool {
        {
            let mut settings = self.settings.write();
            if settings.channel == channel {
                return false;
            }
            settings.channel = channel.to_string();
        }
        Self::queue_restart(Platform::Chat, &self.chat_restart);
        true
    }

    /// Store a new keyword and queue a restart without waiting for it
    pub fn request_keyword(&self, keyword: &str) -> bool {
        {
            let mut settings = self.settings.write();
            if settings.keyword == keyword {
                return false;
            }
            settings.keyword = keyword.to_string();
        }
        Self::queue_restart(Platform::Stream, &self.stream_restart);
        true
    }

    async fn restart(platform: Platform, sender: &mpsc::Sender<RestartRequest>) -> ChangeOutcome {
        let (ack_tx, ack_rx) = oneshot::channel();

        if sender
            .send(RestartRequest { ack: Some(ack_tx) })
            .await
            .is_err()
        {
            warn!(platform = %platform, "Upstream loop not running, change stored only");
            return ChangeOutcome::SourceNotRunning;
        }

        match ack_rx.await {
            Ok(()) => ChangeOutcome::Restarted,
            Err(_) => {
                warn!(platform = %platform, "Upstream loop stopped before restarting");
                ChangeOutcome::SourceNotRunning
            }
        }
    }

    fn queue_restart(platform: Platform, sender: &mpsc::Sender<RestartRequest>) {
        match sender.try_send(RestartRequest { ack: None }) {
            Ok(()) => debug!(platform = %platform, "Restart queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(platform = %platform, "Restart already pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(platform = %platform, "Upstream loop not running, change stored only");
            }
        }
    }

    /// Normalize a chat message and broadcast it
    pub fn ingest_chat(&self, message: ChatMessage) -> BroadcastReport {
        let event = NormalizedEvent::from_chat(message);
        self.registry.broadcast_chat(&event)
    }

    /// Normalize a stream item and broadcast it.
    ///
    /// Returns `None` when the item is a reshare and reshares are hidden.
    pub fn ingest_stream(&self, item: StreamItem) -> Option<BroadcastReport> {
        if item.is_reshare && !self.settings.read().show_reshares {
            metrics::RESHARES_FILTERED.inc();
            debug!(author = %item.author, "Reshare filtered");
            return None;
        }

        let event = NormalizedEvent::from_stream(item);
        Some(self.registry.broadcast_stream(&event))
    }

    /// Register a subscriber and wrap it in a session that ends when
    /// `cancel` fires
    pub fn open_session(&self, cancel: CancellationToken) -> SubscriberSession {
        SubscriberSession::new(self.registry.register(), cancel)
    }
}
