//! Event shapes flowing from the upstream sources to subscribers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream platform an event originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    /// Chat-room protocol feed
    #[serde(rename = "twitch")]
    Chat,
    /// Keyword-filtered social stream
    #[serde(rename = "twitter")]
    Stream,
}

impl Platform {
    /// Name used on the wire and as a metric label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "twitch",
            Self::Stream => "twitter",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message from the chat source, as delivered by its client after join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub body: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
        }
    }
}

/// An item from the filtered stream source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamItem {
    pub author: String,
    pub body: String,
    /// Re-published copy of another item (a retweet)
    pub is_reshare: bool,
}

/// The common shape every subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    platform: Platform,
    user: String,
    text: String,
}

impl NormalizedEvent {
    /// Chat text is passed through verbatim.
    #[must_use]
    pub fn from_chat(message: ChatMessage) -> Self {
        Self {
            platform: Platform::Chat,
            user: message.sender,
            text: message.body,
        }
    }

    /// Stream text has its line breaks removed.
    #[must_use]
    pub fn from_stream(item: StreamItem) -> Self {
        Self {
            platform: Platform::Stream,
            user: item.author,
            text: strip_line_breaks(&item.body),
        }
    }

    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Render the SSE payload:
    /// `{"user": "<user>", "text": "<text>", "platform": "<platform>"}`
    ///
    /// Values are JSON-escaped; plain values come out byte-for-byte as the
    /// documented format.
    #[must_use]
    pub fn to_payload(&self) -> String {
        format!(
            "{{\"user\": {}, \"text\": {}, \"platform\": \"{}\"}}",
            json_string(&self.user),
            json_string(&self.text),
            self.platform.as_str()
        )
    }
}

fn strip_line_breaks(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

fn json_string(value: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_text_is_verbatim() {
        let event = NormalizedEvent::from_chat(ChatMessage::new("bob", "hi\r\nthere"));
        assert_eq!(event.platform(), Platform::Chat);
        assert_eq!(event.user(), "bob");
        assert_eq!(event.text(), "hi\r\nthere");
    }

    #[test]
    fn test_stream_text_strips_line_breaks() {
        let event = NormalizedEvent::from_stream(StreamItem {
            author: "alice".to_string(),
            body: "line one\nline two\r\n#mogra".to_string(),
            is_reshare: false,
        });
        assert_eq!(event.platform(), Platform::Stream);
        assert_eq!(event.text(), "line oneline two#mogra");
    }

    #[test]
    fn test_payload_format() {
        let event = NormalizedEvent::from_chat(ChatMessage::new("bob", "hi"));
        assert_eq!(
            event.to_payload(),
            r#"{"user": "bob", "text": "hi", "platform": "twitch"}"#
        );
    }

    #[test]
    fn test_payload_escapes_quotes() {
        let event = NormalizedEvent::from_chat(ChatMessage::new("bob", "say \"hi\""));
        let value: serde_json::Value = serde_json::from_str(&event.to_payload()).unwrap();
        assert_eq!(value["text"], "say \"hi\"");
        assert_eq!(value["platform"], "twitch");
    }

    #[test]
    fn test_platform_wire_names() {
        assert_eq!(serde_json::to_string(&Platform::Chat).unwrap(), "\"twitch\"");
        assert_eq!(serde_json::to_string(&Platform::Stream).unwrap(), "\"twitter\"");
    }
}
