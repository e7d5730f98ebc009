//! Per-peer circuit breaker.
//!
//! One breaker guards each coordinator → seller channel. All state lives
//! in atomics; there is no lock on the call path.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use common::SellerId;

/// Error returned when a call is refused because the breaker is open.
///
/// The retry engine classifies this as terminal: the current attempt is
/// surfaced to the caller immediately instead of being retried.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker for {peer} is open")]
pub struct BreakerOpen {
    /// The peer whose breaker refused the call.
    pub peer: SellerId,
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,

    /// Failing fast until the open timeout elapses.
    Open,

    /// Probing recovery; limited calls allowed.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "Closed"),
            BreakerState::Open => write!(f, "Open"),
            BreakerState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Breaker thresholds and timing.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,

    /// Consecutive successes that close it again from half-open.
    pub success_threshold: u32,

    /// How long an open breaker refuses calls before probing.
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Lock-free circuit breaker for one peer channel.
///
/// Transitions:
/// - Closed → Open when consecutive failures reach the threshold.
/// - Open → HalfOpen on the first acquire after the open timeout.
/// - HalfOpen → Closed after enough consecutive successes.
/// - HalfOpen → Open on any failure; the timer restarts.
pub struct CircuitBreaker {
    peer: SellerId,
    config: BreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    /// Millis since epoch of the most recent failure.
    last_failure_ms: AtomicI64,
    total_trips: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field(
                "consecutive_failures",
                &self.consecutive_failures.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a breaker for the given peer.
    pub fn new(peer: SellerId, config: BreakerConfig) -> Self {
        Self {
            peer,
            config,
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            last_failure_ms: AtomicI64::new(0),
            total_trips: AtomicU64::new(0),
        }
    }

    /// Asks permission to attempt a call.
    ///
    /// While open, performs the Open → HalfOpen transition once the open
    /// timeout has elapsed since the last failure; otherwise fails fast.
    pub fn try_acquire(&self) -> Result<(), BreakerOpen> {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => {
                if self.open_timeout_elapsed() {
                    if self
                        .state
                        .compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.half_open_successes.store(0, Ordering::Release);
                        tracing::info!(peer = %self.peer, "circuit breaker half-open, probing");
                    }
                    // Another caller may have won the race; probing is
                    // allowed either way.
                    Ok(())
                } else {
                    Err(BreakerOpen {
                        peer: self.peer.clone(),
                    })
                }
            }
            _ => Ok(()),
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);

        if self.state.load(Ordering::Acquire) == STATE_HALF_OPEN {
            let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
            if successes >= self.config.success_threshold
                && self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                tracing::info!(
                    peer = %self.peer,
                    successes,
                    "circuit breaker closed after recovery"
                );
            }
        }
    }

    /// Records a failed call, opening the breaker when the threshold is hit.
    pub fn record_failure(&self) {
        self.last_failure_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);

        if self.state.load(Ordering::Acquire) == STATE_HALF_OPEN {
            // A single failure while probing re-opens immediately.
            self.trip();
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(
            peer = %self.peer,
            failures,
            threshold = self.config.failure_threshold,
            "circuit breaker recorded failure"
        );
        if failures >= self.config.failure_threshold {
            self.trip();
        }
    }

    fn trip(&self) {
        if self.state.swap(STATE_OPEN, Ordering::AcqRel) != STATE_OPEN {
            self.total_trips.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("breaker_open_total").increment(1);
            tracing::warn!(peer = %self.peer, "circuit breaker opened");
        }
    }

    fn open_timeout_elapsed(&self) -> bool {
        let last = self.last_failure_ms.load(Ordering::Acquire);
        let elapsed = Utc::now().timestamp_millis() - last;
        elapsed >= self.config.open_timeout.as_millis() as i64
    }

    /// Returns the current state.
    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Returns the peer this breaker guards.
    pub fn peer(&self) -> &SellerId {
        &self.peer
    }

    /// Returns the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Returns how many times the breaker has opened.
    pub fn trip_count(&self) -> u64 {
        self.total_trips.load(Ordering::Relaxed)
    }
}

/// Registry handing out one breaker per peer.
#[derive(Clone)]
pub struct BreakerRegistry {
    breakers: Arc<DashMap<SellerId, Arc<CircuitBreaker>>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    /// Creates a registry that builds breakers with the given config.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Returns the breaker for a peer, creating it on first use.
    pub fn breaker_for(&self, peer: &SellerId) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(peer.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(peer.clone(), self.config.clone()))
            })
            .clone()
    }

    /// Returns `(peer, state, failures)` for every known breaker.
    pub fn stats(&self) -> Vec<(SellerId, BreakerState, u32)> {
        self.breakers
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().state(),
                    entry.value().failure_count(),
                )
            })
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
