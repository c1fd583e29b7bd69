//! TCP reachability connector
//!
//! Dials the edge address and holds the socket open until the peer closes
//! it. The protocol only decides what gets logged; it stands in for the real
//! per-protocol transports.

use async_trait::async_trait;
use edgeline_connection::{EdgeConnection, EdgeConnector, TransportError, TransportResult};
use edgeline_proto::Protocol;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::TunnelConfig;

#[derive(Debug, Clone)]
pub struct TcpEdgeConnector {
    edge_addr: String,
    timeout: Duration,
}

impl TcpEdgeConnector {
    pub fn new(edge_addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            edge_addr: edge_addr.into(),
            timeout,
        }
    }

    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(config.edge_addr.clone(), config.connect_timeout)
    }
}

#[async_trait]
impl EdgeConnector for TcpEdgeConnector {
    async fn connect(
        &self,
        protocol: Protocol,
        conn_index: u8,
    ) -> TransportResult<Box<dyn EdgeConnection>> {
        debug!(
            "Connection {} dialing {} for {} (sni {})",
            conn_index,
            self.edge_addr,
            protocol,
            protocol.server_name()
        );

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.edge_addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Box::new(TcpEdgeConnection { stream, protocol }))
    }
}

struct TcpEdgeConnection {
    stream: TcpStream,
    protocol: Protocol,
}

#[async_trait]
impl EdgeConnection for TcpEdgeConnection {
    async fn serve(&mut self) -> TransportResult<()> {
        let mut buf = [0u8; 4096];
        loop {
            if self.stream.read(&mut buf).await? == 0 {
                return Ok(());
            }
        }
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }
}
