//! Error type shared by the upstream clients

use thiserror::Error;

use feedwall_core::models::Platform;

/// Longest single line accepted from an upstream connection (1 MB)
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: reqwest::StatusCode, url: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection closed during {0}")]
    Closed(&'static str),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Line exceeds {MAX_LINE_LENGTH} bytes")]
    LineTooLong,
}

impl UpstreamError {
    /// Report as a failed connect attempt for `platform`
    #[must_use]
    pub fn into_connect(self, platform: Platform) -> feedwall_core::Error {
        feedwall_core::Error::connect(platform, self.to_string())
    }

    /// Report as a failure of an established connection
    #[must_use]
    pub fn into_protocol(self, platform: Platform) -> feedwall_core::Error {
        feedwall_core::Error::protocol(platform, self.to_string())
    }
}

/// Check HTTP response status before reading the body
pub fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(UpstreamError::Auth(format!(
            "{} rejected the credentials",
            resp.url()
        )));
    }
    if status.is_client_error() || status.is_server_error() {
        return Err(UpstreamError::Http {
            status,
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<std::io::Error> for UpstreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<rustls::Error> for UpstreamError {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
