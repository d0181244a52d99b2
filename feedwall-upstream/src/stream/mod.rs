//! Stream source: keyword-filtered statuses over a long-lived HTTP response
//!
//! The request is a signed `POST` with `track=<keyword>`; the response body
//! is newline-delimited JSON that never ends on its own.

mod oauth;
mod types;

pub use oauth::OAuthCredentials;
pub use types::parse_line;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use tracing::{debug, info, warn};

use feedwall_core::config::StreamConfig;
use feedwall_core::models::{Platform, StreamItem};
use feedwall_hub::source::{StreamConnection, StreamConnector};

use crate::error::{check_response, UpstreamError, MAX_LINE_LENGTH};

const USER_AGENT: &str = concat!("feedwall/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// The server sends a keep-alive newline every ~30s; silence past this means a dead stream
const STALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Opens filtered stream connections
pub struct FilterStreamConnector {
    client: Client,
    endpoint: String,
    credentials: OAuthCredentials,
}

impl FilterStreamConnector {
    pub fn new(config: &StreamConfig) -> Result<Self, UpstreamError> {
        let credentials = OAuthCredentials::from_config(config);
        if !credentials.is_complete() {
            warn!("Stream credentials are incomplete, connects will be rejected");
        }

        // No overall timeout: the response body is meant to stay open.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            credentials,
        })
    }

    async fn connect(&self, keyword: &str) -> Result<FilterStreamConnection, UpstreamError> {
        let params = [("track", keyword)];
        let authorization = self
            .credentials
            .authorization_header("POST", &self.endpoint, &params)?;

        let request = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, authorization)
            .form(&params)
            .send();
        let response = tokio::time::timeout(STALL_TIMEOUT, request)
            .await
            .map_err(|_| UpstreamError::Timeout("stream response headers"))??;
        let response = check_response(response)?;

        Ok(FilterStreamConnection::new(response.bytes_stream()))
    }
}

#[async_trait]
impl StreamConnector for FilterStreamConnector {
    async fn open(&self, keyword: &str) -> feedwall_core::Result<Box<dyn StreamConnection>> {
        let connection = self
            .connect(keyword)
            .await
            .map_err(|e| e.into_connect(Platform::Stream))?;

        info!(endpoint = %self.endpoint, keyword = %keyword, "Filtered stream open");
        Ok(Box::new(connection))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// An open filtered stream, split into lines as chunks arrive
pub struct FilterStreamConnection {
    body: ByteStream,
    buffer: Vec<u8>,
    stall_timeout: Duration,
}

impl FilterStreamConnection {
    pub fn new(body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            body: Box::pin(body),
            buffer: Vec::new(),
            stall_timeout: STALL_TIMEOUT,
        }
    }

    /// Longest wait for the next chunk before the stream counts as dead
    #[must_use]
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        Some(self.buffer.drain(..=end).collect())
    }

    async fn read_item(&mut self) -> Option<Result<StreamItem, UpstreamError>> {
        loop {
            while let Some(line) = self.next_line() {
                match parse_line(&line) {
                    Ok(Some(item)) => return Some(Ok(item)),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping malformed stream line"),
                }
            }

            if self.buffer.len() > MAX_LINE_LENGTH {
                return Some(Err(UpstreamError::LineTooLong));
            }

            let Ok(next) = tokio::time::timeout(self.stall_timeout, self.body.next()).await else {
                return Some(Err(UpstreamError::Timeout("stream data")));
            };
            match next {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    // A final line without its newline still counts.
                    let rest = std::mem::take(&mut self.buffer);
                    return match parse_line(&rest) {
                        Ok(Some(item)) => Some(Ok(item)),
                        Ok(None) => None,
                        Err(e) => {
                            debug!(error = %e, "Discarding partial line at end of stream");
                            None
                        }
                    };
                }
            }
        }
    }
}

#[async_trait]
impl StreamConnection for FilterStreamConnection {
    async fn next_item(&mut self) -> Option<feedwall_core::Result<StreamItem>> {
        self.read_item()
            .await
            .map(|result| result.map_err(|e| e.into_protocol(Platform::Stream)))
    }

    async fn stop(self: Box<Self>) {
        debug!("Closing filtered stream");
        drop(self);
    }
}
