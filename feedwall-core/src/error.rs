use thiserror::Error;

use crate::models::Platform;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening (or re-opening) an upstream connection failed
    #[error("{platform} connect failed: {message}")]
    UpstreamConnect { platform: Platform, message: String },

    /// A live upstream connection produced something it should not have
    #[error("{platform} protocol error: {message}")]
    UpstreamProtocol { platform: Platform, message: String },

    /// An upstream source gave up and its failure policy is `exit`
    #[error("{platform} source stopped: {message}")]
    SourceFatal { platform: Platform, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn connect(platform: Platform, message: impl Into<String>) -> Self {
        Self::UpstreamConnect {
            platform,
            message: message.into(),
        }
    }

    pub fn protocol(platform: Platform, message: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            platform,
            message: message.into(),
        }
    }

    /// Whether the error aborts the process rather than a single source
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceFatal { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connect() {
        let err = Error::connect(Platform::Chat, "connection refused");
        assert_eq!(err.to_string(), "twitch connect failed: connection refused");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display_source_fatal() {
        let err = Error::SourceFatal {
            platform: Platform::Stream,
            message: "retries exhausted".to_string(),
        };
        assert_eq!(err.to_string(), "twitter source stopped: retries exhausted");
        assert!(err.is_fatal());
    }
}
