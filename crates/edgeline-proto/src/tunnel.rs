//! Named tunnel identity

use serde::{Deserialize, Serialize};

/// Credentials issued for a named tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account the tunnel belongs to; drives rollout bucketing
    pub account_tag: String,
    /// Tunnel identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,
    /// Shared secret presented at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_secret: Option<String>,
}

impl Credentials {
    pub fn new(account_tag: impl Into<String>) -> Self {
        Self {
            account_tag: account_tag.into(),
            tunnel_id: None,
            tunnel_secret: None,
        }
    }

    pub fn with_tunnel_id(mut self, id: impl Into<String>) -> Self {
        self.tunnel_id = Some(id.into());
        self
    }

    pub fn with_tunnel_secret(mut self, secret: impl Into<String>) -> Self {
        self.tunnel_secret = Some(secret.into());
        self
    }
}

/// Configuration of a named tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedTunnelConfig {
    pub credentials: Credentials,
}

impl NamedTunnelConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn account_tag(&self) -> &str {
        &self.credentials.account_tag
    }
}
