//! Client configuration

use crate::percentage::HttpPercentageFetcher;
use edgeline_connection::{BackoffHandler, PercentageFetcher, StaticPercentage};
use edgeline_proto::{Credentials, NamedTunnelConfig, Protocol, ProtocolParseError, AUTO_SELECT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on concurrent connection slots
pub const MAX_HA_CONNECTIONS: u8 = 16;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("edge_addr is required")]
    MissingEdgeAddr,

    #[error("ha_connections must be between 1 and 16, got {0}")]
    InvalidHaConnections(u8),

    #[error(transparent)]
    InvalidProtocol(#[from] ProtocolParseError),

    #[error("Invalid percentage URL {url}: {reason}")]
    InvalidPercentageUrl { url: String, reason: String },

    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Where the rollout percentage comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum PercentageSource {
    /// Fixed percentage, never changes
    Static { percentage: i32 },
    /// Fetched with `GET url`
    Http { url: String },
}

impl Default for PercentageSource {
    fn default() -> Self {
        PercentageSource::Static { percentage: 0 }
    }
}

/// Tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Edge address (host:port)
    pub edge_addr: String,
    /// Named tunnel credentials; classic tunnels have none
    pub credentials: Option<Credentials>,
    /// Explicit protocol, or `auto`
    pub protocol: Option<String>,
    /// Number of concurrent connection slots
    pub ha_connections: u8,
    /// Retries per protocol before falling back
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_backoff: Duration,
    pub retry_forever: bool,
    /// How long a fetched rollout percentage stays valid
    #[serde(with = "duration_secs")]
    pub resolve_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    pub percentage: PercentageSource,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Helper module for serializing Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            edge_addr: String::new(),
            credentials: None,
            protocol: None,
            ha_connections: 4,
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            retry_forever: false,
            resolve_ttl: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(15),
            percentage: PercentageSource::default(),
        }
    }
}

impl TunnelConfig {
    pub fn builder() -> TunnelConfigBuilder {
        TunnelConfigBuilder::default()
    }

    /// Load and validate a YAML config file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TunnelConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edge_addr.trim().is_empty() {
            return Err(ConfigError::MissingEdgeAddr);
        }
        if self.ha_connections == 0 || self.ha_connections > MAX_HA_CONNECTIONS {
            return Err(ConfigError::InvalidHaConnections(self.ha_connections));
        }
        if let Some(protocol) = self.explicit_protocol() {
            protocol.parse::<Protocol>()?;
        }
        if let PercentageSource::Http { url } = &self.percentage {
            parse_url(url)?;
        }
        Ok(())
    }

    /// Explicit protocol override, `None` when selection is automatic
    pub fn explicit_protocol(&self) -> Option<&str> {
        self.protocol
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case(AUTO_SELECT))
    }

    pub fn named_tunnel(&self) -> Option<NamedTunnelConfig> {
        self.credentials.clone().map(NamedTunnelConfig::new)
    }

    /// Fresh backoff policy for one connection slot
    pub fn backoff(&self) -> BackoffHandler {
        BackoffHandler::new(self.max_retries, self.base_backoff).with_retry_forever(self.retry_forever)
    }

    pub fn percentage_fetcher(&self) -> Result<Arc<dyn PercentageFetcher>, ConfigError> {
        match &self.percentage {
            PercentageSource::Static { percentage } => Ok(Arc::new(StaticPercentage(*percentage))),
            PercentageSource::Http { url } => {
                let fetcher = HttpPercentageFetcher::new(parse_url(url)?, self.connect_timeout)
                    .map_err(|e| ConfigError::InvalidPercentageUrl {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Arc::new(fetcher))
            }
        }
    }
}

fn parse_url(url: &str) -> Result<url::Url, ConfigError> {
    let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidPercentageUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ConfigError::InvalidPercentageUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {}", scheme),
        }),
    }
}

/// Builder for TunnelConfig
#[derive(Default)]
pub struct TunnelConfigBuilder {
    config: TunnelConfig,
}

impl TunnelConfigBuilder {
    pub fn edge_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.edge_addr = addr.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocol = Some(protocol.into());
        self
    }

    pub fn ha_connections(mut self, count: u8) -> Self {
        self.config.ha_connections = count;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn base_backoff(mut self, delay: Duration) -> Self {
        self.config.base_backoff = delay;
        self
    }

    pub fn retry_forever(mut self, enabled: bool) -> Self {
        self.config.retry_forever = enabled;
        self
    }

    pub fn resolve_ttl(mut self, ttl: Duration) -> Self {
        self.config.resolve_ttl = ttl;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn percentage(mut self, source: PercentageSource) -> Self {
        self.config.percentage = source;
        self
    }

    pub fn build(self) -> Result<TunnelConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
