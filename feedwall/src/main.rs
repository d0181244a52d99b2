mod server;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use feedwall_core::{logging, metrics, Config};

use server::FeedwallServer;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Parser)]
#[command(
    name = "feedwall",
    version,
    about = "Relays live chat and filtered stream posts to server-sent event subscribers"
)]
struct Cli {
    /// Path to a YAML/TOML/JSON config file
    #[arg(short, long, env = "FEEDWALL_CONFIG_PATH")]
    config: Option<String>,

    /// HTTP port, overrides the configured one
    #[arg(short, long)]
    port: Option<u16>,
}

/// Load configuration: `--config` / `FEEDWALL_CONFIG_PATH` > `./config.yaml` > env only
fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().or_else(|| {
        Path::new(DEFAULT_CONFIG_PATH)
            .exists()
            .then(|| DEFAULT_CONFIG_PATH.to_string())
    });

    let mut config = match path {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path)?
        }
        None => Config::from_env()?,
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }

    Ok(config)
}

/// Split validation messages into fatal errors and `warning:` entries
fn split_validation(errors: Vec<String>) -> (Vec<String>, Vec<String>) {
    errors.into_iter().partition(|e| !e.starts_with("warning:"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = load_config(&cli)?;

    // 2. Validate configuration (fail fast on misconfigurations)
    let warnings = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => {
            let (fatal, warnings) = split_validation(errors);
            if !fatal.is_empty() {
                for e in &fatal {
                    eprintln!("Config validation error: {e}");
                }
                return Err(anyhow::anyhow!(
                    "Configuration validation failed with {} error(s)",
                    fatal.len()
                ));
            }
            warnings
        }
    };

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    metrics::init_metrics();
    for w in &warnings {
        warn!("Config {w}");
    }
    info!("feedwall starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Run until a shutdown signal or a fatal source error
    FeedwallServer::new(config).start().await
}
