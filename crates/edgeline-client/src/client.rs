//! Tunnel client - runs the connection slots
//!
//! Every slot loops connect → serve → reconnect on its own task. Slots share
//! the protocol selector and one cancellation token; nothing else.

use crate::config::{ConfigError, TunnelConfig};
use edgeline_connection::{
    new_protocol_selector, wait_for_backoff, EdgeConnector, ProtocolFallback, ProtocolSelector,
    ReconnectError, SelectorError, TransportError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Tunnel client errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol selection failed: {0}")]
    Selector(#[from] SelectorError),

    #[error("Connection {index} gave up: {source}")]
    Slot {
        index: u8,
        #[source]
        source: ReconnectError,
    },

    #[error("Connection {index} failed permanently: {source}")]
    NonRecoverable {
        index: u8,
        #[source]
        source: TransportError,
    },

    #[error("Connection task failed: {0}")]
    TaskFailed(String),
}

/// Supervises `ha_connections` edge connections
pub struct TunnelClient<C: EdgeConnector> {
    config: TunnelConfig,
    connector: Arc<C>,
    selector: Arc<dyn ProtocolSelector>,
    cancel: CancellationToken,
}

impl<C: EdgeConnector> TunnelClient<C> {
    /// Validate the config and build the protocol selector
    pub async fn new(config: TunnelConfig, connector: C) -> Result<Self, TunnelError> {
        config.validate()?;

        let fetcher = config.percentage_fetcher()?;
        let named_tunnel = config.named_tunnel();
        let selector = new_protocol_selector(
            config.protocol.as_deref(),
            named_tunnel.as_ref(),
            fetcher,
            config.resolve_ttl,
        )
        .await?;

        Ok(Self::with_selector(config, connector, selector))
    }

    /// Use an already built selector
    pub fn with_selector(
        config: TunnelConfig,
        connector: C,
        selector: Arc<dyn ProtocolSelector>,
    ) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            selector,
            cancel: CancellationToken::new(),
        }
    }

    pub fn selector(&self) -> &Arc<dyn ProtocolSelector> {
        &self.selector
    }

    /// Token that stops every slot when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until shutdown or until a slot fails for good.
    ///
    /// The first fatal slot error cancels the remaining slots and is returned.
    pub async fn run(self) -> Result<(), TunnelError> {
        let mut slots = JoinSet::new();

        for index in 0..self.config.ha_connections {
            let slot = ConnectionSlot {
                index,
                connector: self.connector.clone(),
                selector: self.selector.clone(),
                cancel: self.cancel.clone(),
                state: ProtocolFallback::new(self.config.backoff(), self.selector.current()),
            };
            slots.spawn(slot.run());
        }

        info!(
            "Started {} edge connection(s), default protocol {}",
            self.config.ha_connections,
            self.selector.current()
        );

        let mut first_error = None;
        while let Some(joined) = slots.join_next().await {
            let result = joined
                .map_err(|e| TunnelError::TaskFailed(e.to_string()))
                .and_then(|r| r);

            if let Err(e) = result {
                error!("{}", e);
                if first_error.is_none() {
                    self.cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("All edge connections stopped");
                Ok(())
            }
        }
    }
}

struct ConnectionSlot<C: EdgeConnector> {
    index: u8,
    connector: Arc<C>,
    selector: Arc<dyn ProtocolSelector>,
    cancel: CancellationToken,
    state: ProtocolFallback,
}

impl<C: EdgeConnector> ConnectionSlot<C> {
    async fn run(mut self) -> Result<(), TunnelError> {
        loop {
            let protocol = self.state.protocol();
            debug!("Connection {} connecting with {}", self.index, protocol);

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                result = self.connector.connect(protocol, self.index) => result,
            };

            let err = match attempt {
                Ok(mut connection) => {
                    info!(
                        "Connection {} registered with edge using {}",
                        self.index,
                        connection.protocol()
                    );
                    self.state.reset(self.selector.as_ref());

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(()),
                        result = connection.serve() => match result {
                            Ok(()) => TransportError::ConnectionClosed,
                            Err(e) => e,
                        },
                    }
                }
                Err(e) => e,
            };

            if err.is_non_recoverable() {
                return Err(TunnelError::NonRecoverable {
                    index: self.index,
                    source: err,
                });
            }

            match wait_for_backoff(
                &self.cancel,
                &mut self.state,
                self.selector.as_ref(),
                self.index,
                err,
            )
            .await
            {
                Ok(()) => {}
                Err(ReconnectError::Cancelled) => {
                    debug!("Connection {} stopped", self.index);
                    return Ok(());
                }
                Err(source) => {
                    return Err(TunnelError::Slot {
                        index: self.index,
                        source,
                    });
                }
            }
        }
    }
}
