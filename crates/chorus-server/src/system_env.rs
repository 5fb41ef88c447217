//! Wall-clock [`Environment`] for a running replica.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use chorus_core::Environment;

/// Real time, with sleeps on the Tokio timer.
///
/// Remembers when the replica started so the auction timer can report how
/// long it actually ran.
#[derive(Debug, Clone, Copy)]
pub struct SystemEnv {
    started: Instant,
}

impl SystemEnv {
    /// Environment whose uptime counts from now.
    #[must_use]
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }

    /// Time since the replica started.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for SystemEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
