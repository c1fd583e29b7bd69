//! Process-wide protocol selection
//!
//! Every connection slot asks the same selector which protocol to use and,
//! once its retry budget is spent, which protocol to fall back to. The
//! fallback chain is shared: once it is drained, every slot sees exhaustion.
//!
//! With automatic selection the default protocol is decided by a rollout
//! percentage fetched from a remote source. The account tag is hashed into a
//! bucket in `0..100`; accounts whose bucket is below the percentage default
//! to the rollout protocol.

use crate::fetcher::{self, FetchError, PercentageFetcher};
use arc_swap::ArcSwap;
use edgeline_proto::{NamedTunnelConfig, Protocol, ProtocolParseError, AUTO_SELECT};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Protocol assigned to accounts inside the rollout percentage
const ROLLOUT_PROTOCOL: Protocol = Protocol::Quic;

/// Protocol assigned to everyone else
const BASELINE_PROTOCOL: Protocol = Protocol::Http2;

/// Refresh deadline used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Selector construction errors
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error(transparent)]
    UnknownProtocol(#[from] ProtocolParseError),

    #[error("Failed to fetch initial rollout percentage: {0}")]
    InitialFetch(#[source] FetchError),
}

/// Shared authority on the default protocol and the fallback order
pub trait ProtocolSelector: Send + Sync {
    /// Present default protocol
    fn current(&self) -> Protocol;

    /// Take the next protocol from the shared fallback chain
    fn fallback(&self) -> Option<Protocol>;
}

/// Ordered fallback protocols with a shared cursor
#[derive(Debug)]
struct FallbackChain {
    protocols: Vec<Protocol>,
    cursor: AtomicUsize,
}

impl FallbackChain {
    fn below(protocol: Protocol) -> Self {
        Self {
            protocols: protocol.fallback_chain(),
            cursor: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Option<Protocol> {
        let len = self.protocols.len();
        self.cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                (i < len).then_some(i + 1)
            })
            .ok()
            .map(|i| self.protocols[i])
    }

    fn remaining(&self) -> usize {
        self.protocols
            .len()
            .saturating_sub(self.cursor.load(Ordering::Acquire))
    }
}

/// Selector pinned to one protocol
#[derive(Debug)]
pub struct StaticProtocolSelector {
    current: Protocol,
    chain: FallbackChain,
}

impl StaticProtocolSelector {
    /// Pin `current` and fall back through every lower-priority protocol
    pub fn new(current: Protocol) -> Self {
        Self {
            current,
            chain: FallbackChain::below(current),
        }
    }

    /// Pin `current` without any fallback
    pub fn without_fallback(current: Protocol) -> Self {
        Self {
            current,
            chain: FallbackChain {
                protocols: Vec::new(),
                cursor: AtomicUsize::new(0),
            },
        }
    }

    /// Fallback protocols not yet handed out
    pub fn remaining_fallbacks(&self) -> usize {
        self.chain.remaining()
    }
}

impl ProtocolSelector for StaticProtocolSelector {
    fn current(&self) -> Protocol {
        self.current
    }

    fn fallback(&self) -> Option<Protocol> {
        self.chain.next()
    }
}

/// Immutable view published by the auto selector
#[derive(Debug)]
struct Snapshot {
    current: Protocol,
    percentage: i32,
    chain: Arc<FallbackChain>,
    refresh_after: Instant,
}

struct AutoInner {
    snapshot: ArcSwap<Snapshot>,
    threshold: i32,
    fetcher: Arc<dyn PercentageFetcher>,
    ttl: Duration,
    refreshing: AtomicBool,
}

/// Selector driven by a periodically refreshed rollout percentage
#[derive(Clone)]
pub struct AutoProtocolSelector {
    inner: Arc<AutoInner>,
}

impl AutoProtocolSelector {
    fn new(
        percentage: i32,
        threshold: i32,
        fetcher: Arc<dyn PercentageFetcher>,
        ttl: Duration,
    ) -> Self {
        let current = select_protocol(threshold, percentage);
        let snapshot = Snapshot {
            current,
            percentage,
            chain: Arc::new(FallbackChain::below(current)),
            refresh_after: refresh_deadline(ttl),
        };

        Self {
            inner: Arc::new(AutoInner {
                snapshot: ArcSwap::from_pointee(snapshot),
                threshold,
                fetcher,
                ttl,
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// Last known good rollout percentage
    pub fn percentage(&self) -> i32 {
        self.inner.snapshot.load().percentage
    }

    /// Fallback protocols not yet handed out
    pub fn remaining_fallbacks(&self) -> usize {
        self.inner.snapshot.load().chain.remaining()
    }

    fn schedule_refresh(&self) {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.inner.clone().refresh());
            }
            Err(_) => {
                debug!("No async runtime available, skipping protocol refresh");
                self.inner.refreshing.store(false, Ordering::Release);
            }
        }
    }
}

impl AutoInner {
    async fn refresh(self: Arc<Self>) {
        let result = self.fetcher.fetch().await.and_then(fetcher::validate);
        let previous = self.snapshot.load_full();
        let refresh_after = refresh_deadline(self.ttl);

        let next = match result {
            Ok(percentage) => {
                let current = select_protocol(self.threshold, percentage);
                let chain = if current == previous.current {
                    previous.chain.clone()
                } else {
                    info!(
                        "Rollout percentage changed to {}, switching default protocol from {} to {}",
                        percentage, previous.current, current
                    );
                    Arc::new(FallbackChain::below(current))
                };
                debug!("Refreshed rollout percentage: {}", percentage);
                Snapshot {
                    current,
                    percentage,
                    chain,
                    refresh_after,
                }
            }
            Err(e) => {
                warn!(
                    "Failed to refresh protocol percentage, keeping {}%: {}",
                    previous.percentage, e
                );
                Snapshot {
                    current: previous.current,
                    percentage: previous.percentage,
                    chain: previous.chain.clone(),
                    refresh_after,
                }
            }
        };

        self.snapshot.store(Arc::new(next));
        self.refreshing.store(false, Ordering::Release);
    }
}

impl ProtocolSelector for AutoProtocolSelector {
    fn current(&self) -> Protocol {
        let snapshot = self.inner.snapshot.load();
        if Instant::now() >= snapshot.refresh_after {
            self.schedule_refresh();
        }
        snapshot.current
    }

    fn fallback(&self) -> Option<Protocol> {
        self.inner.snapshot.load().chain.next()
    }
}

impl std::fmt::Debug for AutoProtocolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.snapshot.load();
        f.debug_struct("AutoProtocolSelector")
            .field("current", &snapshot.current)
            .field("percentage", &snapshot.percentage)
            .field("threshold", &self.inner.threshold)
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

/// Build the process-wide selector.
///
/// `protocol` is the explicit override from configuration: a protocol name
/// pins the selector, `auto` (or `None`) selects by rollout percentage. The
/// fetcher is called once here; a failure is a startup error.
pub async fn new_protocol_selector(
    protocol: Option<&str>,
    named_tunnel: Option<&NamedTunnelConfig>,
    fetcher: Arc<dyn PercentageFetcher>,
    resolve_ttl: Duration,
) -> Result<Arc<dyn ProtocolSelector>, SelectorError> {
    let explicit = match protocol.map(str::trim) {
        None => None,
        Some(name) if name.is_empty() || name.eq_ignore_ascii_case(AUTO_SELECT) => None,
        Some(name) => Some(name.parse::<Protocol>()?),
    };

    let Some(named_tunnel) = named_tunnel else {
        if explicit.is_some_and(|p| p != Protocol::H2mux) {
            warn!("Tunnels without credentials only support h2mux, ignoring protocol override");
        }
        return Ok(Arc::new(StaticProtocolSelector::without_fallback(
            Protocol::H2mux,
        )));
    };

    if let Some(protocol) = explicit {
        info!("Using explicitly configured protocol {}", protocol);
        return Ok(Arc::new(StaticProtocolSelector::new(protocol)));
    }

    let percentage = fetcher
        .fetch()
        .await
        .and_then(fetcher::validate)
        .map_err(SelectorError::InitialFetch)?;
    let threshold = switch_threshold(named_tunnel.account_tag());
    let selector = AutoProtocolSelector::new(percentage, threshold, fetcher, resolve_ttl);

    info!(
        "Auto-selected protocol {} (rollout {}%, account bucket {})",
        select_protocol(threshold, percentage),
        percentage,
        threshold
    );

    Ok(Arc::new(selector))
}

/// Hash an account tag into a rollout bucket in `0..100` (FNV-1a, 32 bit)
pub fn switch_threshold(account_tag: &str) -> i32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let hash = account_tag
        .bytes()
        .fold(OFFSET_BASIS, |h, b| (h ^ u32::from(b)).wrapping_mul(PRIME));
    (hash % 100) as i32
}

fn refresh_deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl).unwrap_or(now + FAR_FUTURE)
}

fn select_protocol(threshold: i32, percentage: i32) -> Protocol {
    if threshold < percentage {
        ROLLOUT_PROTOCOL
    } else {
        BASELINE_PROTOCOL
    }
}
