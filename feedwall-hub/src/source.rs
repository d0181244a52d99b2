//! Seams between the hub's upstream loops and the real network clients
//!
//! A connection is a lazy sequence of messages for one filter value. It is
//! never re-targeted: changing the filter means retiring the connection and
//! opening a new one.

use feedwall_core::models::{ChatMessage, StreamItem};
use feedwall_core::Result;

/// Opens chat connections joined to one channel
#[async_trait::async_trait]
pub trait ChatConnector: Send + Sync {
    /// Connect, register and join `channel`
    async fn connect(&self, channel: &str) -> Result<Box<dyn ChatConnection>>;
}

/// A live chat connection
#[async_trait::async_trait]
pub trait ChatConnection: Send {
    /// Next message posted to the joined channel.
    ///
    /// `None` means the connection ended.
    async fn next_message(&mut self) -> Option<Result<ChatMessage>>;

    /// Leave gracefully and close the socket
    async fn quit(self: Box<Self>);
}

/// Opens filtered stream connections tracking one keyword
#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self, keyword: &str) -> Result<Box<dyn StreamConnection>>;
}

/// A live filtered stream
#[async_trait::async_trait]
pub trait StreamConnection: Send {
    /// Next item matching the tracked keyword, `None` once the stream ended
    async fn next_item(&mut self) -> Option<Result<StreamItem>>;

    async fn stop(self: Box<Self>);
}
