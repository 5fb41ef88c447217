//! Environment abstraction for deterministic testing.
//!
//! The engine never reads the wall clock or sleeps directly. The auction
//! timer goes through `Environment`, so a simulation can drive it on virtual
//! time while production uses Tokio.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Time source and sleep primitive.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// Subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
