//! Chorus client: one participant, many replicas.
//!
//! ## Architecture
//!
//! ```text
//! chorus-client
//!   ├─ ReplicaFanout   (local Lamport clock, join/publish to every replica)
//!   ├─ ReplicaLink     (per-replica seam: QuicLink, LocalLink, simulated links)
//!   └─ render          (input parsing, terminal formatting)
//! ```
//!
//! Replicas never coordinate. The client's merged clock is the only place
//! their streams meet, and it only guarantees that local time never goes
//! backwards.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod fanout;
pub mod link;
pub mod quic;
pub mod render;

use std::sync::Arc;

pub use error::ClientError;
pub use fanout::{ClientOutput, JoinReport, PublishReport, ReplicaFanout};
pub use link::{EventStream, LocalLink, ReplicaLink, StreamSubscription, join_over, publish_over};
pub use quic::{QuicLink, client_endpoint};

/// Default number of replicas a client dials.
pub const DEFAULT_REPLICA_COUNT: u16 = 3;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Participant identity shown to everyone.
    pub participant_id: String,
    /// Replica addresses to join.
    pub replicas: Vec<String>,
    /// Starting Lamport time.
    pub initial_time: u64,
    /// TLS server name presented when dialing.
    pub server_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            participant_id: "default".to_string(),
            replicas: (0..DEFAULT_REPLICA_COUNT).map(chorus_proto::replica_address).collect(),
            initial_time: 0,
            server_name: "localhost".to_string(),
        }
    }
}

impl ClientConfig {
    /// Build QUIC links for every configured replica, sharing one endpoint.
    ///
    /// Addresses are resolved when each link dials, so an unresolvable entry
    /// only shows up as that replica being unavailable.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn quic_links(&self) -> Result<Vec<Arc<dyn ReplicaLink>>, ClientError> {
        let endpoint = client_endpoint()?;
        Ok(self
            .replicas
            .iter()
            .map(|address| {
                Arc::new(QuicLink::new(endpoint.clone(), address, self.server_name.clone()))
                    as Arc<dyn ReplicaLink>
            })
            .collect())
    }
}
