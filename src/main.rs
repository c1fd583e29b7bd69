//! Edgeline CLI - Keep a tunnel connected to the edge
//!
//! Runs several edge connections that retry with exponential backoff and fall
//! back to older transport protocols when the preferred one keeps failing.

use anyhow::{Context, Result};
use clap::Parser;
use edgeline_client::{
    Credentials, PercentageSource, TcpEdgeConnector, TunnelClient, TunnelConfig, TunnelError,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Edgeline - persistent tunnel client with protocol fallback
#[derive(Parser, Debug)]
#[command(name = "edgeline")]
#[command(about = "Keep a tunnel connected to the edge", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML config file; flags override its values
    #[arg(short, long, env = "EDGELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Edge address (host:port)
    #[arg(short, long, env = "EDGELINE_EDGE")]
    edge: Option<String>,

    /// Account tag of the named tunnel
    #[arg(long, env = "EDGELINE_ACCOUNT_TAG")]
    account_tag: Option<String>,

    /// Transport protocol (quic, http2, h2mux or auto)
    #[arg(short, long, env = "EDGELINE_PROTOCOL")]
    protocol: Option<String>,

    /// Number of concurrent edge connections
    #[arg(long)]
    ha_connections: Option<u8>,

    /// Retries per protocol before falling back
    #[arg(long)]
    retries: Option<u32>,

    /// Fixed rollout percentage (0-100)
    #[arg(long, conflicts_with = "percentage_url")]
    percentage: Option<i32>,

    /// URL returning the rollout percentage
    #[arg(long, env = "EDGELINE_PERCENTAGE_URL")]
    percentage_url: Option<String>,

    /// Seconds a fetched rollout percentage stays valid
    #[arg(long)]
    resolve_ttl: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn tunnel_config(&self) -> Result<TunnelConfig> {
        let mut config = match &self.config {
            Some(path) => TunnelConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => TunnelConfig::default(),
        };

        if let Some(edge) = &self.edge {
            config.edge_addr = edge.clone();
        }
        if let Some(tag) = &self.account_tag {
            config.credentials = Some(Credentials::new(tag.clone()));
        }
        if let Some(protocol) = &self.protocol {
            config.protocol = Some(protocol.clone());
        }
        if let Some(count) = self.ha_connections {
            config.ha_connections = count;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(percentage) = self.percentage {
            config.percentage = PercentageSource::Static { percentage };
        }
        if let Some(url) = &self.percentage_url {
            config.percentage = PercentageSource::Http { url: url.clone() };
        }
        if let Some(ttl) = self.resolve_ttl {
            config.resolve_ttl = Duration::from_secs(ttl);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = cli.tunnel_config()?;
    info!(
        "Connecting to {} with {} connection(s)",
        config.edge_addr, config.ha_connections
    );

    let connector = TcpEdgeConnector::from_config(&config);
    let client = TunnelClient::new(config, connector)
        .await
        .context("Failed to start tunnel client")?;

    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down tunnel...");
        shutdown.cancel();
    });

    match client.run().await {
        Ok(()) => {
            info!("Tunnel stopped");
            Ok(())
        }
        Err(e @ TunnelError::NonRecoverable { .. }) => {
            error!("🚫 Non-recoverable error, not retrying: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("❌ Tunnel failed: {}", e);
            Err(e.into())
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
