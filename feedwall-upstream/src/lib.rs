//! Network clients for the two upstream sources

pub mod chat;
pub mod error;
pub mod stream;

pub use chat::IrcConnector;
pub use error::UpstreamError;
pub use stream::FilterStreamConnector;
