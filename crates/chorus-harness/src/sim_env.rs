//! Virtual-time environment.
//!
//! Inside a turmoil simulation every host runs on a paused Tokio clock that
//! the simulator advances, so reading and sleeping on Tokio time is already
//! deterministic.

use std::time::{Duration, Instant};

use chorus_core::Environment;

/// Environment backed by the simulator's virtual clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEnv;

impl SimEnv {
    /// Create a simulation environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_advances_virtual_time() {
        let mut sim =
            turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();

        sim.client("sleeper", async {
            let env = SimEnv::new();
            let start = env.now();
            env.sleep(Duration::from_secs(30)).await;
            assert!(env.now() - start >= Duration::from_secs(30));
            Ok(())
        });

        sim.run().unwrap();
    }
}
