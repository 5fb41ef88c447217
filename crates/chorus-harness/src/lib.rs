//! Deterministic simulation harness for Chorus.
//!
//! Turmoil-based implementations of the `Environment` and `ReplicaLink`
//! seams. Replicas and clients run the production engine, stream RPC and
//! fan-out unchanged; only the byte transport and the clock are simulated.
//!
//! # Scenarios
//!
//! The `scenario` module scripts whole runs (replica count, offline or
//! stopped replicas, timed publishes per participant) and checks the result
//! with oracles.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use scenario::{
    Oracle, ParticipantScript, ParticipantTrace, PublishSummary, Scenario, ScenarioError, World,
    replica_host,
};
pub use sim_env::SimEnv;
pub use sim_transport::{REPLICA_PORT, SimLink, SimReplica};
