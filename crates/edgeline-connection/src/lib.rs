//! Edge connection management
//!
//! Backoff policy, process-wide protocol selection and the per-connection
//! fallback state machine that decides how a failed connection is retried.

pub mod backoff;
pub mod fetcher;
pub mod reconnect;
pub mod selector;
pub mod transport;

pub use backoff::BackoffHandler;
pub use fetcher::{FetchError, PercentageFetcher, StaticPercentage};
pub use reconnect::{wait_for_backoff, ProtocolFallback, ReconnectError};
pub use selector::{
    new_protocol_selector, switch_threshold, AutoProtocolSelector, ProtocolSelector,
    SelectorError, StaticProtocolSelector,
};
pub use transport::{EdgeConnection, EdgeConnector, TransportError, TransportResult};
