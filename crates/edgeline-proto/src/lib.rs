//! Edge tunnel protocol definitions
//!
//! This crate defines the transport protocols a tunnel connection can use to
//! reach the edge, and the named-tunnel identity used to pick between them.

pub mod protocol;
pub mod tunnel;

pub use protocol::{Protocol, ProtocolParseError, AUTO_SELECT, PROTOCOL_LIST};
pub use tunnel::{Credentials, NamedTunnelConfig};
