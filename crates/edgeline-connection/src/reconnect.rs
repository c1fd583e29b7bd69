//! Reconnection with exponential backoff and protocol fallback
//!
//! Each connection slot owns a [`ProtocolFallback`] and hands it to
//! [`wait_for_backoff`] after every failed attempt. The slot keeps retrying
//! its protocol until the backoff budget is spent, then moves to the next
//! protocol of the shared fallback chain with a fresh budget. When the chain
//! is drained the failure becomes fatal for the slot.

use crate::backoff::BackoffHandler;
use crate::selector::ProtocolSelector;
use crate::transport::TransportError;
use edgeline_proto::Protocol;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconnection errors
#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("No protocol left to fall back to after {protocol} failed: {source}")]
    FallbackExhausted {
        protocol: Protocol,
        #[source]
        source: TransportError,
    },

    #[error("Reconnection cancelled")]
    Cancelled,
}

impl ReconnectError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReconnectError::Cancelled)
    }
}

/// Per-connection retry state
#[derive(Debug, Clone)]
pub struct ProtocolFallback {
    backoff: BackoffHandler,
    protocol: Protocol,
    in_fallback: bool,
}

impl ProtocolFallback {
    pub fn new(backoff: BackoffHandler, protocol: Protocol) -> Self {
        Self {
            backoff,
            protocol,
            in_fallback: false,
        }
    }

    /// Protocol the next attempt should use
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether this connection moved away from the default protocol
    pub fn in_fallback(&self) -> bool {
        self.in_fallback
    }

    pub fn backoff(&self) -> &BackoffHandler {
        &self.backoff
    }

    /// Return to the selector's present default with a full retry budget.
    ///
    /// Call after a connection attempt succeeds.
    pub fn reset(&mut self, selector: &dyn ProtocolSelector) {
        self.backoff.reset();
        self.protocol = selector.current();
        self.in_fallback = false;
    }

    fn fallback(&mut self, protocol: Protocol) {
        self.backoff.reset();
        self.protocol = protocol;
        self.in_fallback = true;
    }
}

/// Decide how a failed connection is retried.
///
/// Sleeps for the next backoff delay while the budget lasts, otherwise
/// switches `state` to the next fallback protocol without sleeping. Returns
/// `Ok(())` when the caller should attempt again with `state.protocol()`.
pub async fn wait_for_backoff(
    cancel: &CancellationToken,
    state: &mut ProtocolFallback,
    selector: &dyn ProtocolSelector,
    conn_index: u8,
    err: TransportError,
) -> Result<(), ReconnectError> {
    if cancel.is_cancelled() {
        return Err(ReconnectError::Cancelled);
    }

    if let Some(delay) = state.backoff.compute_backoff() {
        info!(
            "Connection {} ({}) failed: {}. Retrying in {:?} (attempt {}/{})",
            conn_index,
            state.protocol,
            err,
            delay,
            state.backoff.retries(),
            state.backoff.max_retries
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Connection {} backoff interrupted by shutdown", conn_index);
                return Err(ReconnectError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if !state.in_fallback {
            let current = selector.current();
            if current != state.protocol {
                info!(
                    "Connection {} changing protocol from {} to {}",
                    conn_index, state.protocol, current
                );
                state.protocol = current;
            }
        }
        return Ok(());
    }

    // Budget spent on this protocol, move down the shared chain
    while let Some(next) = selector.fallback() {
        if next == state.protocol {
            debug!(
                "Connection {} already using {}, skipping fallback entry",
                conn_index, next
            );
            continue;
        }

        warn!(
            "Connection {} exhausted {} retries on {}, falling back to {}",
            conn_index, state.backoff.max_retries, state.protocol, next
        );
        state.fallback(next);
        return Ok(());
    }

    warn!(
        "Connection {} has no protocol left to fall back to after {}",
        conn_index, state.protocol
    );
    Err(ReconnectError::FallbackExhausted {
        protocol: state.protocol,
        source: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::StaticProtocolSelector;
    use std::collections::VecDeque;
    use std::error::Error as _;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockSelector {
        current: Mutex<Protocol>,
        chain: Mutex<VecDeque<Protocol>>,
    }

    impl MockSelector {
        fn new(current: Protocol, chain: &[Protocol]) -> Self {
            Self {
                current: Mutex::new(current),
                chain: Mutex::new(chain.iter().copied().collect()),
            }
        }

        fn set_current(&self, protocol: Protocol) {
            *self.current.lock().unwrap() = protocol;
        }
    }

    impl ProtocolSelector for MockSelector {
        fn current(&self) -> Protocol {
            *self.current.lock().unwrap()
        }

        fn fallback(&self) -> Option<Protocol> {
            self.chain.lock().unwrap().pop_front()
        }
    }

    fn some_error() -> TransportError {
        TransportError::ConnectionFailed("Some error".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_then_fallback_then_exhausted() {
        let cancel = CancellationToken::new();
        let selector = StaticProtocolSelector::new(Protocol::Http2);
        let mut state = ProtocolFallback::new(
            BackoffHandler::new(3, Duration::from_millis(10)),
            selector.current(),
        );

        for _ in 0..3 {
            wait_for_backoff(&cancel, &mut state, &selector, 1, some_error())
                .await
                .unwrap();
            assert_eq!(state.protocol(), Protocol::Http2);
            assert!(!state.in_fallback());
        }

        wait_for_backoff(&cancel, &mut state, &selector, 1, some_error())
            .await
            .unwrap();
        assert_eq!(state.protocol(), Protocol::H2mux);
        assert!(state.in_fallback());
        assert_eq!(state.backoff().retries(), 0);

        for _ in 0..3 {
            wait_for_backoff(&cancel, &mut state, &selector, 1, some_error())
                .await
                .unwrap();
            assert_eq!(state.protocol(), Protocol::H2mux);
        }

        let err = wait_for_backoff(&cancel, &mut state, &selector, 1, some_error())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconnectError::FallbackExhausted {
                protocol: Protocol::H2mux,
                ..
            }
        ));
        assert_eq!(selector.current(), Protocol::Http2);

        state.reset(&selector);
        assert_eq!(state.protocol(), Protocol::Http2);
        assert!(!state.in_fallback());

        wait_for_backoff(&cancel, &mut state, &selector, 1, some_error())
            .await
            .unwrap();
        assert_eq!(state.protocol(), Protocol::Http2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_for_granted_delay() {
        let cancel = CancellationToken::new();
        let selector = MockSelector::new(Protocol::Quic, &[]);
        let mut state = ProtocolFallback::new(
            BackoffHandler::new(2, Duration::from_secs(1)),
            Protocol::Quic,
        );

        let start = tokio::time::Instant::now();
        wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap();
        wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        // Switching protocols does not wait
        let start = tokio::time::Instant::now();
        assert!(wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let cancel = CancellationToken::new();
        let selector = MockSelector::new(Protocol::Http2, &[Protocol::H2mux]);
        let mut state = ProtocolFallback::new(
            BackoffHandler::new(3, Duration::from_secs(30)),
            Protocol::Http2,
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let err = wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_fallback() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let selector = MockSelector::new(Protocol::Http2, &[Protocol::H2mux]);
        let mut state =
            ProtocolFallback::new(BackoffHandler::new(0, Duration::from_secs(1)), Protocol::Http2);

        let err = wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(state.protocol(), Protocol::Http2);
        assert_eq!(selector.fallback(), Some(Protocol::H2mux));
    }

    #[tokio::test]
    async fn test_exhausted_error_preserves_cause() {
        let cancel = CancellationToken::new();
        let selector = MockSelector::new(Protocol::H2mux, &[]);
        let mut state =
            ProtocolFallback::new(BackoffHandler::new(0, Duration::from_millis(1)), Protocol::H2mux);

        let err = wait_for_backoff(
            &cancel,
            &mut state,
            &selector,
            2,
            TransportError::Rejected("edge draining".to_string()),
        )
        .await
        .unwrap_err();

        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("edge draining"));
        assert!(err
            .source()
            .is_some_and(|source| source.to_string().contains("edge draining")));
    }

    #[tokio::test]
    async fn test_fallback_skips_protocol_in_use() {
        let cancel = CancellationToken::new();
        let selector = MockSelector::new(Protocol::Quic, &[Protocol::Http2, Protocol::H2mux]);
        let mut state =
            ProtocolFallback::new(BackoffHandler::new(0, Duration::from_millis(1)), Protocol::Http2);

        wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap();
        assert_eq!(state.protocol(), Protocol::H2mux);
        assert!(state.in_fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_selector_until_in_fallback() {
        let cancel = CancellationToken::new();
        let selector = MockSelector::new(Protocol::Http2, &[Protocol::H2mux]);
        let mut state = ProtocolFallback::new(
            BackoffHandler::new(2, Duration::from_millis(10)),
            Protocol::Http2,
        );

        selector.set_current(Protocol::Quic);
        wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap();
        assert_eq!(state.protocol(), Protocol::Quic);

        // Spend the budget and fall back; the fallback protocol stays pinned
        wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap();
        wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap();
        assert_eq!(state.protocol(), Protocol::H2mux);

        wait_for_backoff(&cancel, &mut state, &selector, 0, some_error())
            .await
            .unwrap();
        assert_eq!(state.protocol(), Protocol::H2mux);
        assert!(state.in_fallback());
    }

    #[test]
    fn test_reset_adopts_present_default() {
        let selector = MockSelector::new(Protocol::Http2, &[]);
        let mut state =
            ProtocolFallback::new(BackoffHandler::new(3, Duration::from_millis(1)), Protocol::Http2);
        state.fallback(Protocol::H2mux);

        selector.set_current(Protocol::Quic);
        state.reset(&selector);

        assert_eq!(state.protocol(), Protocol::Quic);
        assert!(!state.in_fallback());
        assert_eq!(state.backoff().retries(), 0);
    }
}
