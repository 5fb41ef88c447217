//! Broadcast engine.
//!
//! Per-replica decision logic, invoked once per Join and once per Publish.
//!
//! ## Responsibilities
//!
//! - Join: admit a session through the [`SessionRegistry`] and hand the
//!   subscription to the transport
//! - Chat publish: run the event's stamp through the replica's Lamport clock,
//!   restamp it, broadcast
//! - Auction publish: apply the bid or query against [`AuctionState`],
//!   broadcast new highest bids, answer everything else privately
//! - Auction close: one-shot transition driven by [`BroadcastEngine::run_auction_timer`]
//!
//! ## Ordering
//!
//! Clock and auction state live behind one mutex that is held across the
//! fan-out, so two publishes on the same replica never interleave their
//! read-modify-write and sessions see events in clock order. Replicas share
//! nothing; two replicas may close their auctions at slightly different
//! moments.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chorus_proto::{Ack, Event, EventKind, Notice};

use crate::{
    clock::LogicalClock,
    env::Environment,
    error::EngineError,
    registry::{SessionInfo, SessionRegistry, Subscription},
};

/// Which event policy a replica runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Lamport-stamped chat relay.
    #[default]
    Chat,
    /// Single ascending-bid auction.
    Auction,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Auction => write!(f, "auction"),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Event policy.
    pub mode: EngineMode,
    /// Time from replica start until the auction closes.
    pub auction_duration: Duration,
    /// Events buffered per session before it is evicted as too slow.
    pub session_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Chat,
            auction_duration: Duration::from_secs(120),
            session_queue_capacity: 256,
        }
    }
}

/// Result of applying one bid to [`AuctionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidOutcome {
    /// Bid is the new highest.
    Accepted,
    /// Bid did not exceed the current highest; nothing changed.
    Rejected {
        /// Highest bid that was not beaten.
        current_highest: u64,
    },
    /// Auction is over; nothing changed.
    Closed,
}

/// Auction state of one replica.
///
/// `current_highest_bid` only grows while open; `closed` flips once and
/// freezes everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuctionState {
    current_highest_bid: u64,
    highest_bidder: Option<String>,
    closed: bool,
}

impl AuctionState {
    /// Open auction with no bids.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest accepted bid (0 before any bid).
    pub fn current_highest_bid(&self) -> u64 {
        self.current_highest_bid
    }

    /// Participant holding the highest bid.
    pub fn highest_bidder(&self) -> Option<&str> {
        self.highest_bidder.as_deref()
    }

    /// Whether the auction has closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Apply a bid.
    pub fn place_bid(&mut self, bidder: &str, amount: u64) -> BidOutcome {
        if self.closed {
            return BidOutcome::Closed;
        }
        if amount <= self.current_highest_bid {
            return BidOutcome::Rejected { current_highest: self.current_highest_bid };
        }
        self.current_highest_bid = amount;
        self.highest_bidder = Some(bidder.to_string());
        BidOutcome::Accepted
    }

    /// Close the auction. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    /// Announcement sent for every request after close.
    pub fn closing_notice(&self) -> Notice {
        Notice::AuctionClosed {
            winner: self.highest_bidder.clone(),
            amount: self.current_highest_bid,
        }
    }

    /// Answer to a result query.
    pub fn result_notice(&self) -> Notice {
        if self.closed {
            self.closing_notice()
        } else {
            Notice::CurrentResult {
                amount: self.current_highest_bid,
                leader: self.highest_bidder.clone(),
            }
        }
    }
}

struct EngineState {
    clock: LogicalClock,
    auction: AuctionState,
}

/// Per-replica broadcast engine.
pub struct BroadcastEngine {
    config: EngineConfig,
    registry: SessionRegistry,
    state: Mutex<EngineState>,
}

impl BroadcastEngine {
    /// Create an engine with an empty registry and a zero clock.
    pub fn new(config: EngineConfig) -> Self {
        let registry = SessionRegistry::new(config.session_queue_capacity);
        Self {
            config,
            registry,
            state: Mutex::new(EngineState {
                clock: LogicalClock::new(),
                auction: AuctionState::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replica mode.
    pub fn mode(&self) -> EngineMode {
        self.config.mode
    }

    /// Session registry of this replica.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Current value of the replica's Lamport clock.
    pub fn clock_time(&self) -> u64 {
        self.state().clock.time()
    }

    /// Snapshot of the auction state.
    pub fn auction(&self) -> AuctionState {
        self.state().auction.clone()
    }

    /// Stamp for a replica-originated event (chat mode only).
    fn system_stamp(&self, state: &mut EngineState) -> Option<u64> {
        match self.config.mode {
            EngineMode::Chat => Some(state.clock.tick_for_send()),
            EngineMode::Auction => None,
        }
    }

    /// Admit `participant_id` and return the subscription to stream from.
    ///
    /// The subscription ends when the session is removed, replaced or
    /// evicted. The transport must call [`Self::on_leave`] once it stops
    /// streaming.
    pub fn on_join(&self, participant_id: &str) -> Result<Subscription, EngineError> {
        if participant_id.trim().is_empty() {
            return Err(EngineError::InvalidParticipant(participant_id.to_string()));
        }

        let mut state = self.state();
        let stamp = self.system_stamp(&mut state);
        let welcome =
            Event::system(Notice::Welcome { participant: participant_id.to_string() }, stamp);
        let subscription = self.registry.open(participant_id, welcome)?;

        tracing::info!(
            participant = participant_id,
            session_id = subscription.info().session_id,
            sessions = self.registry.len(),
            "participant joined"
        );

        Ok(subscription)
    }

    /// Release a finished subscription.
    ///
    /// If it was still the current session for its participant, the mapping
    /// is dropped and the remaining sessions are told. Returns whether the
    /// mapping was dropped.
    pub fn on_leave(&self, info: &SessionInfo) -> bool {
        let mut state = self.state();
        if !self.registry.release(info) {
            tracing::debug!(
                participant = %info.participant_id,
                session_id = info.session_id,
                "subscription ended after its session was already gone"
            );
            return false;
        }

        tracing::info!(
            participant = %info.participant_id,
            session_id = info.session_id,
            "participant disconnected"
        );

        let stamp = self.system_stamp(&mut state);
        let departed =
            Event::system(Notice::Departed { participant: info.participant_id.clone() }, stamp);
        self.registry.broadcast(&departed);
        true
    }

    /// Apply one published event.
    pub fn on_publish(&self, event: Event) -> Result<Ack, EngineError> {
        match (self.config.mode, event.kind) {
            (EngineMode::Chat, EventKind::Chat) => Ok(self.publish_chat(event)),
            (EngineMode::Auction, EventKind::Bid) => self.publish_bid(&event),
            (EngineMode::Auction, EventKind::ResultQuery) => Ok(self.publish_result_query(&event)),
            (mode, kind) => Err(EngineError::UnsupportedKind { kind, mode }),
        }
    }

    fn publish_chat(&self, event: Event) -> Ack {
        let mut state = self.state();
        let incoming = event.logical_time.unwrap_or(0);
        let time = state.clock.merge_on_receive(incoming);
        let stamped = event.with_logical_time(time);

        let report = self.registry.broadcast(&stamped);
        tracing::debug!(
            sender = %stamped.sender_id,
            incoming,
            time,
            delivered = report.delivered,
            failed = report.failed.len(),
            "chat event broadcast"
        );

        Ack::ACCEPTED
    }

    fn publish_bid(&self, event: &Event) -> Result<Ack, EngineError> {
        let amount = event.bid_amount().ok_or(EngineError::InvalidEvent("bid without amount"))?;
        let mut state = self.state();

        match state.auction.place_bid(&event.sender_id, amount) {
            BidOutcome::Accepted => {
                tracing::info!(bidder = %event.sender_id, amount, "new highest bid");
                let notice = Notice::HighestBid { bidder: event.sender_id.clone(), amount };
                self.registry.broadcast(&Event::system(notice, None));
                Ok(Ack::ACCEPTED)
            },
            BidOutcome::Rejected { current_highest } => {
                tracing::debug!(bidder = %event.sender_id, amount, current_highest, "bid rejected");
                self.notify(&event.sender_id, Notice::BidRejected { current_highest });
                Ok(Ack::REJECTED)
            },
            BidOutcome::Closed => {
                self.notify(&event.sender_id, state.auction.closing_notice());
                Ok(Ack::REJECTED)
            },
        }
    }

    fn publish_result_query(&self, event: &Event) -> Ack {
        let notice = self.state().auction.result_notice();
        self.notify(&event.sender_id, notice);
        Ack::ACCEPTED
    }

    /// Private answer to one participant; a missing session is tolerated.
    fn notify(&self, participant_id: &str, notice: Notice) {
        if let Err(e) = self.registry.unicast(participant_id, Event::system(notice, None)) {
            tracing::warn!(participant = participant_id, "private notice not delivered: {}", e);
        }
    }

    /// Close the auction now. Returns `true` on the first call.
    ///
    /// Every admitted session is told the outcome once.
    pub fn close_auction(&self) -> bool {
        let mut state = self.state();
        if !state.auction.close() {
            return false;
        }

        let notice = state.auction.closing_notice();
        tracing::info!(
            winner = ?state.auction.highest_bidder(),
            amount = state.auction.current_highest_bid(),
            "auction has ended"
        );
        self.registry.broadcast(&Event::system(notice, None));
        true
    }

    /// Sleep for the configured auction duration, then close the auction.
    ///
    /// Returns immediately for chat replicas.
    pub async fn run_auction_timer<E: Environment>(&self, env: &E) {
        if self.config.mode != EngineMode::Auction {
            return;
        }

        let started = env.now();
        env.sleep(self.config.auction_duration).await;
        tracing::debug!(elapsed = ?env.now().saturating_duration_since(started), "auction timer fired");
        self.close_auction();
    }
}

impl fmt::Debug for BroadcastEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastEngine")
            .field("mode", &self.config.mode)
            .field("registry", &self.registry)
            .field("clock", &self.clock_time())
            .finish()
    }
}
