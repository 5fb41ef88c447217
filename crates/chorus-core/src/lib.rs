//! Chorus replica core.
//!
//! Everything a replica decides lives here; transports only move bytes.
//!
//! ## Architecture
//!
//! ```text
//! chorus-core
//!   ├─ LogicalClock       (Lamport send/receive rules)
//!   ├─ SessionRegistry    (participant → bounded outbound queue)
//!   ├─ BroadcastEngine    (chat/auction policy, fan-out, auction close)
//!   ├─ Environment        (time + sleep, swappable for simulation)
//!   └─ rpc                (Join/Publish over any byte stream)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod engine;
pub mod env;
mod error;
pub mod registry;
pub mod rpc;

pub use clock::LogicalClock;
pub use engine::{AuctionState, BidOutcome, BroadcastEngine, EngineConfig, EngineMode};
pub use env::Environment;
pub use error::{EngineError, RegistryError, RpcError};
pub use registry::{
    BroadcastReport, DeliveryFailure, SessionId, SessionInfo, SessionRegistry, Subscription,
};
pub use rpc::{RemoteSubscription, call_join, call_publish, read_frame, serve_stream, write_frame};
