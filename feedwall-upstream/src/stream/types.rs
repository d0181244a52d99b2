use serde::de::IgnoredAny;
use serde::Deserialize;

use feedwall_core::models::StreamItem;

use crate::error::UpstreamError;

/// Any message on the filtered stream. Statuses carry `text` and `user`;
/// control messages (`delete`, `limit`, `warning`, ...) carry neither.
#[derive(Debug, Deserialize)]
struct StreamMessage {
    text: Option<String>,
    user: Option<User>,
    retweeted_status: Option<IgnoredAny>,
}

#[derive(Debug, Deserialize)]
struct User {
    screen_name: String,
}

/// Parse one line of the stream.
///
/// Blank keep-alive lines and non-status messages yield `Ok(None)`.
pub fn parse_line(line: &[u8]) -> Result<Option<StreamItem>, UpstreamError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }

    let message: StreamMessage = serde_json::from_slice(line)?;
    let (Some(text), Some(user)) = (message.text, message.user) else {
        return Ok(None);
    };

    Ok(Some(StreamItem {
        author: user.screen_name,
        body: text,
        is_reshare: message.retweeted_status.is_some(),
    }))
}
