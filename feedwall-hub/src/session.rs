use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use feedwall_core::models::NormalizedEvent;

use crate::registry::{SubscriberId, Subscription};

/// Relay from one subscriber's delivery channels to its transport.
///
/// The subscriber is unregistered when the session is dropped, whichever
/// way the session ends.
pub struct SubscriberSession {
    subscription: Subscription,
    cancel: CancellationToken,
}

impl SubscriberSession {
    pub(crate) const fn new(subscription: Subscription, cancel: CancellationToken) -> Self {
        Self {
            subscription,
            cancel,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.subscription.id()
    }

    /// Wait for the next event from either platform.
    ///
    /// Returns `None` once the session is cancelled or a delivery channel
    /// is closed. Neither branch is preferred, so a busy platform cannot
    /// starve the other or hide a cancellation.
    pub async fn next_event(&mut self) -> Option<NormalizedEvent> {
        let Self {
            subscription,
            cancel,
        } = self;

        tokio::select! {
            () = cancel.cancelled() => {
                debug!(subscriber_id = %subscription.id(), "Session cancelled");
                None
            }
            event = subscription.chat.recv() => event,
            event = subscription.stream.recv() => event,
        }
    }

    /// Turn the session into a stream of events for the push transport
    pub fn into_stream(self) -> impl Stream<Item = NormalizedEvent> + Send + 'static {
        futures::stream::unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
    }
}
