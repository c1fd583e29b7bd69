//! Transport protocols for edge connections
//!
//! A tunnel connection reaches the edge over one of these protocols. When the
//! preferred one keeps failing, the connection walks down the priority order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keyword that asks for percentage-driven protocol selection
pub const AUTO_SELECT: &str = "auto";

/// Every known protocol, most preferred first
pub const PROTOCOL_LIST: [Protocol; 3] = [Protocol::Quic, Protocol::Http2, Protocol::H2mux];

/// Error returned when a protocol name is not recognized
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown protocol {name}, available protocols: quic, http2, h2mux or auto")]
pub struct ProtocolParseError {
    pub name: String,
}

/// Transport protocol used to reach the edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Legacy stream multiplexing over a single TLS connection
    H2mux,
    /// HTTP/2 multiplexed framing over TLS
    Http2,
    /// QUIC streams over UDP
    Quic,
}

impl Protocol {
    /// Returns priority for selection (higher = try first)
    pub fn priority(&self) -> u8 {
        match self {
            Protocol::Quic => 100,
            Protocol::Http2 => 50,
            Protocol::H2mux => 10,
        }
    }

    /// TLS server name presented to the edge for this protocol
    pub fn server_name(&self) -> &'static str {
        match self {
            Protocol::Quic => "quic.edge.edgeline.dev",
            Protocol::Http2 => "h2.edge.edgeline.dev",
            Protocol::H2mux => "edge.edgeline.dev",
        }
    }

    /// Protocols of strictly lower priority, most preferred first.
    ///
    /// Never contains `self` and never contains duplicates.
    pub fn fallback_chain(&self) -> Vec<Protocol> {
        PROTOCOL_LIST
            .iter()
            .copied()
            .filter(|p| p.priority() < self.priority())
            .collect()
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Quic => write!(f, "quic"),
            Protocol::Http2 => write!(f, "http2"),
            Protocol::H2mux => write!(f, "h2mux"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quic" => Ok(Protocol::Quic),
            "http2" | "h2" => Ok(Protocol::Http2),
            "h2mux" => Ok(Protocol::H2mux),
            _ => Err(ProtocolParseError {
                name: s.to_string(),
            }),
        }
    }
}
