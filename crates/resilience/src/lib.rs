//! Fault-tolerance building blocks for peer communication.
//!
//! Three concerns live here, each usable on its own:
//! - per-peer circuit breakers that fail fast while a peer is unhealthy,
//! - a retry engine with exponential backoff and jitter,
//! - an idempotency cache that deduplicates replayed requests.

pub mod breaker;
pub mod idempotency;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerOpen, BreakerRegistry, BreakerState, CircuitBreaker};
pub use idempotency::IdempotencyCache;
pub use retry::{RetryPolicy, Retryable};
