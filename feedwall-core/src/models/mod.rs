pub mod event;
pub mod settings;

pub use event::{ChatMessage, NormalizedEvent, Platform, StreamItem};
pub use settings::FilterSettings;
