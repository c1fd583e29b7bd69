//! Transport traits for edge connections

use async_trait::async_trait;
use edgeline_proto::Protocol;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Edge rejected connection: {0}")]
    Rejected(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl TransportError {
    /// Errors that retrying cannot fix
    pub fn is_non_recoverable(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Establishes connections to the edge over a given protocol
#[async_trait]
pub trait EdgeConnector: Send + Sync + 'static {
    /// Connect and register with the edge. Returns once the edge has
    /// accepted the connection.
    async fn connect(
        &self,
        protocol: Protocol,
        conn_index: u8,
    ) -> TransportResult<Box<dyn EdgeConnection>>;
}

/// A registered edge connection
#[async_trait]
pub trait EdgeConnection: Send {
    /// Serve the connection until it drops
    async fn serve(&mut self) -> TransportResult<()>;

    /// Protocol this connection speaks
    fn protocol(&self) -> Protocol;
}
