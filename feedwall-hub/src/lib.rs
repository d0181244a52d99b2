//! Fan-out hub: subscriber registry, runtime filters and the upstream loops
//! that feed them

pub mod hub;
pub mod registry;
pub mod runner;
pub mod session;
pub mod source;

pub use hub::{ChangeOutcome, FanoutHub, RestartReceivers, RestartRequest};
pub use registry::{BroadcastReport, SubscriberId, SubscriberRegistry, Subscription};
pub use runner::{run_chat_source, run_stream_source, SourceOptions};
pub use session::SubscriberSession;
pub use source::{ChatConnection, ChatConnector, StreamConnection, StreamConnector};
