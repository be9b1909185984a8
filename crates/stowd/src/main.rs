//! stowd: the stow gateway daemon
//!
//! Usage:
//!   stowd [--config ~/.config/stow/stow.toml] [--listen 127.0.0.1:4719]
//!
//! Exposes upload/download/archive routes over HTTP so any client — a
//! browser, a media player, a sync tool — can read and write files stored
//! across third-party image hosts.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "stowd", version, about = "stow gateway daemon")]
struct Cli {
    /// Path to stow.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "STOW_CONFIG",
        default_value = "~/.config/stow/stow.toml"
    )]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(long, env = "STOW_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "STOW_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "STOW_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "stowd starting"
    );

    let mut config = load_config(&expand_home(&cli.config)).await?;
    if let Some(listen) = cli.listen {
        config.gateway.listen = listen;
    }
    config.data.dir = expand_home(&config.data.dir);

    stowd::server::run(config).await
}

async fn load_config(path: &PathBuf) -> Result<stow_core::config::StowConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(stow_core::config::StowConfig::default())
    }
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
