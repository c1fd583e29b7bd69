//! Edge tunnel client library - Public API
//!
//! Runs a fixed number of connection slots against the edge, each retrying
//! with backoff and protocol fallback until the client is shut down.

pub mod client;
pub mod config;
pub mod connector;
pub mod percentage;

pub use client::{TunnelClient, TunnelError};
pub use config::{ConfigError, PercentageSource, TunnelConfig, TunnelConfigBuilder};
pub use connector::TcpEdgeConnector;
pub use percentage::HttpPercentageFetcher;

pub use edgeline_connection::{
    EdgeConnection, EdgeConnector, FetchError, PercentageFetcher, ProtocolSelector,
    ReconnectError, TransportError,
};
pub use edgeline_proto::{Credentials, NamedTunnelConfig, Protocol};
