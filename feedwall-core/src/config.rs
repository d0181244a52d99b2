use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub hub: HubConfig,
    pub chat: ChatConfig,
    pub stream: StreamConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Interval between SSE keep-alive comments
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Fan-out hub settings and the initial upstream filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of each per-subscriber delivery channel
    pub subscriber_buffer: usize,
    pub default_channel: String,
    pub default_keyword: String,
    pub show_reshares: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            default_channel: "#mogra".to_string(),
            default_keyword: "#mogra".to_string(),
            show_reshares: false,
        }
    }
}

/// What an upstream source does once its connect retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and stop this source; the rest of the process keeps serving
    Degrade,
    /// Stop the whole process
    Exit,
}

/// Chat (IRC) source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// `host:port` of the IRC-over-TLS endpoint
    pub server: String,
    pub nick: String,
    pub password: String,
    /// Skip certificate verification for the chat network's TLS endpoint
    pub accept_invalid_certs: bool,
    pub on_connect_failure: FailurePolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server: "irc.chat.twitch.tv:6697".to_string(),
            nick: String::new(),
            password: String::new(),
            accept_invalid_certs: true,
            on_connect_failure: FailurePolicy::Degrade,
        }
    }
}

/// Filtered stream source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub endpoint: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
    pub on_connect_failure: FailurePolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://stream.twitter.com/1.1/statuses/filter.json".to_string(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            access_token: String::new(),
            access_token_secret: String::new(),
            on_connect_failure: FailurePolicy::Exit,
        }
    }
}

/// Reconnect behaviour shared by both upstream sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub connect_attempts: usize,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            backoff_min_ms: 500,
            backoff_max_ms: 10_000,
        }
    }
}

/// Environment variables understood for compatibility with older deployments
const LEGACY_ENV: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("TWITCH_NICK", "chat.nick"),
    ("TWITCH_PASSWORD", "chat.password"),
    ("TWITTER_CONSUMER_KEY", "stream.consumer_key"),
    ("TWITTER_CONSUMER_SECRET", "stream.consumer_secret"),
    ("TWITTER_ACCESS_TOKEN", "stream.access_token"),
    ("TWITTER_ACCESS_TOKEN_SECRET", "stream.access_token_secret"),
];

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Legacy environment variables (`PORT`, `TWITCH_NICK`, ...)
    /// 2. `FEEDWALL_*` environment variables
    /// 3. Config file (if provided; a missing file is an error)
    /// 4. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // FEEDWALL_SERVER__PORT, FEEDWALL_CHAT__NICK, ...
        builder = builder.add_source(
            Environment::with_prefix("FEEDWALL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// Missing upstream credentials are reported with a `warning:` prefix;
    /// the caller decides whether those are fatal.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.hub.subscriber_buffer == 0 {
            errors.push("hub.subscriber_buffer must be at least 1".to_string());
        }
        if self.upstream.connect_attempts == 0 {
            errors.push("upstream.connect_attempts must be at least 1".to_string());
        }
        if self.upstream.backoff_min_ms > self.upstream.backoff_max_ms {
            errors.push("upstream.backoff_min_ms must not exceed upstream.backoff_max_ms".to_string());
        }
        if !self.chat.server.contains(':') {
            errors.push(format!("chat.server '{}' must be host:port", self.chat.server));
        }
        if self.chat.nick.is_empty() {
            errors.push("warning: chat.nick is empty (TWITCH_NICK)".to_string());
        }
        if self.stream.consumer_key.is_empty() || self.stream.access_token.is_empty() {
            errors.push("warning: stream credentials are incomplete (TWITTER_*)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
