use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use feedwall_core::metrics;
use feedwall_core::models::{NormalizedEvent, Platform};

/// Opaque handle of one subscriber, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Sending halves of a subscriber's two delivery channels
#[derive(Debug)]
struct DeliveryChannels {
    chat: mpsc::Sender<NormalizedEvent>,
    stream: mpsc::Sender<NormalizedEvent>,
}

impl DeliveryChannels {
    const fn for_platform(&self, platform: Platform) -> &mpsc::Sender<NormalizedEvent> {
        match platform {
            Platform::Chat => &self.chat,
            Platform::Stream => &self.stream,
        }
    }
}

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the event was queued for
    pub delivered: usize,
    /// Subscribers whose channel was full
    pub dropped: usize,
}

/// Registry of active subscribers and their delivery channels.
///
/// Channels are bounded; a subscriber that stops reading loses new events
/// instead of stalling the broadcast for everyone else.
#[derive(Clone)]
pub struct SubscriberRegistry {
    subscribers: Arc<DashMap<SubscriberId, DeliveryChannels>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl SubscriberRegistry {
    /// Create a registry whose per-subscriber channels hold `buffer` events
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Register a new subscriber.
    ///
    /// The returned [`Subscription`] owns the receiving halves and
    /// unregisters itself when dropped.
    pub fn register(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (chat_tx, chat_rx) = mpsc::channel(self.buffer);
        let (stream_tx, stream_rx) = mpsc::channel(self.buffer);

        self.subscribers.insert(
            id,
            DeliveryChannels {
                chat: chat_tx,
                stream: stream_tx,
            },
        );
        metrics::SUBSCRIBERS.inc();

        info!(
            subscriber_id = %id,
            subscribers = self.subscribers.len(),
            "Subscriber registered"
        );

        Subscription {
            id,
            chat: chat_rx,
            stream: stream_rx,
            registry: self.clone(),
        }
    }

    /// Remove a subscriber. Unknown handles are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            metrics::SUBSCRIBERS.dec();
            info!(
                subscriber_id = %id,
                subscribers = self.subscribers.len(),
                "Subscriber unregistered"
            );
        } else {
            debug!(subscriber_id = %id, "Subscriber already unregistered");
        }
    }

    /// Queue a chat event for every registered subscriber
    pub fn broadcast_chat(&self, event: &NormalizedEvent) -> BroadcastReport {
        self.broadcast_on(Platform::Chat, event)
    }

    /// Queue a stream event for every registered subscriber
    pub fn broadcast_stream(&self, event: &NormalizedEvent) -> BroadcastReport {
        self.broadcast_on(Platform::Stream, event)
    }

    fn broadcast_on(&self, platform: Platform, event: &NormalizedEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().for_platform(platform).try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    debug!(
                        subscriber_id = %entry.key(),
                        platform = %platform,
                        "Subscriber channel full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Removal has to wait until the iteration has released its shard locks.
        for id in closed {
            warn!(subscriber_id = %id, "Subscriber channel closed, removing");
            self.unregister(id);
        }

        metrics::EVENTS_BROADCAST
            .with_label_values(&[platform.as_str()])
            .inc_by(report.delivered as u64);
        if report.dropped > 0 {
            metrics::EVENTS_DROPPED
                .with_label_values(&[platform.as_str()])
                .inc_by(report.dropped as u64);
        }

        report
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }
}

/// A registered subscriber: its handle and the receiving halves of its
/// delivery channels
pub struct Subscription {
    id: SubscriberId,
    pub(crate) chat: mpsc::Receiver<NormalizedEvent>,
    pub(crate) stream: mpsc::Receiver<NormalizedEvent>,
    registry: SubscriberRegistry,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next queued chat event, `None` once the channel is closed
    pub async fn recv_chat(&mut self) -> Option<NormalizedEvent> {
        self.chat.recv().await
    }

    /// Next queued stream event, `None` once the channel is closed
    pub async fn recv_stream(&mut self) -> Option<NormalizedEvent> {
        self.stream.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedwall_core::models::{ChatMessage, StreamItem};
    use std::time::Duration;

    fn chat(user: &str, text: &str) -> NormalizedEvent {
        NormalizedEvent::from_chat(ChatMessage::new(user, text))
    }

    fn tweet(user: &str, text: &str) -> NormalizedEvent {
        NormalizedEvent::from_stream(StreamItem {
            author: user.to_string(),
            body: text.to_string(),
            is_reshare: false,
        })
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let registry = SubscriberRegistry::new(8);
        let mut sub = registry.register();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(sub.id()));

        let report = registry.broadcast_chat(&chat("bob", "hi"));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0 });

        let received = sub.recv_chat().await.unwrap();
        assert_eq!(received.user(), "bob");
        assert_eq!(received.text(), "hi");
    }

    #[tokio::test]
    async fn test_platforms_use_separate_channels() {
        let registry = SubscriberRegistry::new(8);
        let mut sub = registry.register();

        registry.broadcast_stream(&tweet("alice", "#mogra"));

        let received = sub.recv_stream().await.unwrap();
        assert_eq!(received.platform(), Platform::Stream);

        let nothing = tokio::time::timeout(Duration::from_millis(50), sub.recv_chat()).await;
        assert!(nothing.is_err(), "chat channel should be empty");
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let registry = SubscriberRegistry::new(8);
        let sub = registry.register();
        let id = sub.id();

        drop(sub);
        assert!(registry.is_empty());
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = SubscriberRegistry::new(8);
        let sub = registry.register();
        let id = sub.id();

        registry.unregister(id);
        registry.unregister(id);
        assert!(registry.is_empty());

        // Dropping afterwards is a no-op as well
        drop(sub);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let registry = SubscriberRegistry::new(8);
        let a = registry.register();
        let b = registry.register();
        let a_id = a.id();
        drop(a);
        let c = registry.register();

        assert_ne!(a_id, b.id());
        assert_ne!(a_id, c.id());
        assert_ne!(b.id(), c.id());
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let registry = SubscriberRegistry::new(2);
        let _stalled = registry.register();
        let mut active = registry.register();

        for i in 0..5 {
            let report = registry.broadcast_chat(&chat("bob", &i.to_string()));
            assert!(report.delivered >= 1);
            // Keep the active subscriber drained
            assert_eq!(active.recv_chat().await.unwrap().text(), i.to_string());
        }

        // The stalled subscriber kept only the first two, the rest were dropped
        let report = registry.broadcast_chat(&chat("bob", "last"));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_per_platform_order_is_preserved() {
        let registry = SubscriberRegistry::new(64);
        let mut sub = registry.register();

        for i in 0..20 {
            registry.broadcast_chat(&chat("bob", &i.to_string()));
        }
        for i in 0..20 {
            assert_eq!(sub.recv_chat().await.unwrap().text(), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_size_tracks_open_subscriptions() {
        let registry = SubscriberRegistry::new(4);
        let mut open: Vec<Subscription> = (0..10).map(|_| registry.register()).collect();
        assert_eq!(registry.len(), 10);

        // Close every other one
        let mut index = 0;
        open.retain(|_| {
            index += 1;
            index % 2 == 0
        });
        assert_eq!(registry.len(), open.len());

        open.push(registry.register());
        assert_eq!(registry.len(), open.len());

        open.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister_and_broadcast() {
        let registry = SubscriberRegistry::new(4);
        let mut tasks = tokio::task::JoinSet::new();

        for i in 0..64u64 {
            let registry = registry.clone();
            tasks.spawn(async move {
                let sub = registry.register();
                tokio::time::sleep(Duration::from_millis(i % 7)).await;
                registry.broadcast_chat(&chat("load", &i.to_string()));
                // Keep one in four alive past the task
                if i % 4 == 0 {
                    Some(sub)
                } else {
                    None
                }
            });
        }

        let mut kept = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Some(sub) = result.unwrap() {
                kept.push(sub);
            }
        }

        assert_eq!(registry.len(), kept.len());
        assert_eq!(kept.len(), 16);
        kept.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_closed_receiver_is_removed_on_broadcast() {
        let registry = SubscriberRegistry::new(4);
        let mut sub = registry.register();
        let id = sub.id();

        sub.chat.close();

        let report = registry.broadcast_chat(&chat("bob", "hi"));
        assert_eq!(report.delivered, 0);
        assert!(!registry.contains(id));

        drop(sub);
        assert!(registry.is_empty());
    }
}
