//! Event value types.
//!
//! An [`Event`] is the unit a replica fans out to its sessions. Events are
//! plain values: they are cloned freely and never mutated after a replica has
//! stamped them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Sender id used for events originated by a replica.
pub const SERVER_SENDER: &str = "Server";

/// Kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum EventKind {
    /// Free-form chat line, carries a Lamport time.
    Chat = 1,
    /// Auction bid, carries an amount.
    Bid = 2,
    /// Request for the current auction result.
    ResultQuery = 3,
    /// Replica-originated notice.
    System = 4,
}

/// Announcements produced by a replica.
///
/// Every variant that talks about money carries the amount itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    /// Sent to a participant right after its session is admitted.
    Welcome {
        /// Newly admitted participant.
        participant: String,
    },
    /// A participant's subscription ended.
    Departed {
        /// Participant that left.
        participant: String,
    },
    /// A bid raised the highest bid.
    HighestBid {
        /// Participant holding the new highest bid.
        bidder: String,
        /// New highest amount.
        amount: u64,
    },
    /// A bid did not exceed the highest bid. Only the bidder sees this.
    BidRejected {
        /// Highest bid at the time of rejection.
        current_highest: u64,
    },
    /// Answer to a result query while the auction is open.
    CurrentResult {
        /// Highest bid so far.
        amount: u64,
        /// Participant holding it, if anyone has bid.
        leader: Option<String>,
    },
    /// The auction is over.
    AuctionClosed {
        /// Winning participant, if anyone bid.
        winner: Option<String>,
        /// Final price.
        amount: u64,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome { participant } => write!(f, "Welcome {participant}!"),
            Self::Departed { participant } => write!(f, "{participant} has left"),
            Self::HighestBid { bidder, amount } => {
                write!(f, "A new highest bid has been set by {bidder} with a value of {amount}")
            },
            Self::BidRejected { current_highest } => {
                write!(f, "Your bid is not greater than the current highest bid of {current_highest}")
            },
            Self::CurrentResult { amount, leader: Some(leader) } => {
                write!(f, "The current result is {amount}, held by {leader}")
            },
            Self::CurrentResult { amount, leader: None } => {
                write!(f, "The current result is {amount}, no bids yet")
            },
            Self::AuctionClosed { winner: Some(winner), amount } => {
                write!(f, "The auction is over, and was won by {winner} at the price of {amount}")
            },
            Self::AuctionClosed { winner: None, amount } => {
                write!(f, "The auction is over without any bids (final price {amount})")
            },
        }
    }
}

/// Kind-dependent event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Chat text.
    Text(String),
    /// Bid amount.
    Amount(u64),
    /// Replica notice.
    Notice(Notice),
    /// No body (result queries).
    Empty,
}

/// The unit broadcast to sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Participant (or [`SERVER_SENDER`]) that produced the event.
    pub sender_id: String,
    /// Event kind.
    pub kind: EventKind,
    /// Kind-dependent body.
    pub payload: Payload,
    /// Lamport time. Present on chat-mode events only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub logical_time: Option<u64>,
}

impl Event {
    /// Chat line stamped with the sender's clock.
    pub fn chat(sender_id: impl Into<String>, text: impl Into<String>, logical_time: u64) -> Self {
        Self {
            sender_id: sender_id.into(),
            kind: EventKind::Chat,
            payload: Payload::Text(text.into()),
            logical_time: Some(logical_time),
        }
    }

    /// Auction bid.
    pub fn bid(sender_id: impl Into<String>, amount: u64) -> Self {
        Self {
            sender_id: sender_id.into(),
            kind: EventKind::Bid,
            payload: Payload::Amount(amount),
            logical_time: None,
        }
    }

    /// Result query.
    pub fn result_query(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            kind: EventKind::ResultQuery,
            payload: Payload::Empty,
            logical_time: None,
        }
    }

    /// Replica notice, optionally stamped with the replica's clock.
    pub fn system(notice: Notice, logical_time: Option<u64>) -> Self {
        Self {
            sender_id: SERVER_SENDER.to_string(),
            kind: EventKind::System,
            payload: Payload::Notice(notice),
            logical_time,
        }
    }

    /// Bid amount, if this is a bid.
    pub fn bid_amount(&self) -> Option<u64> {
        match (&self.kind, &self.payload) {
            (EventKind::Bid, Payload::Amount(amount)) => Some(*amount),
            _ => None,
        }
    }

    /// Notice carried by a system event.
    pub fn notice(&self) -> Option<&Notice> {
        match &self.payload {
            Payload::Notice(notice) => Some(notice),
            _ => None,
        }
    }

    /// Replace the stamped Lamport time.
    #[must_use]
    pub fn with_logical_time(mut self, time: u64) -> Self {
        self.logical_time = Some(time);
        self
    }
}
