//! Fuzz target for [`BroadcastEngine`] operation sequences
//!
//! # Strategy
//!
//! - A small pool of participants joins, leaves, rejoins and publishes in
//!   arbitrary order
//! - Tiny session queues so eviction on a full queue is exercised
//! - Both chat and auction replicas, with events of the wrong kind mixed in
//!
//! # Invariants
//!
//! - Replica clock never goes backwards
//! - Highest bid never decreases and only changes on an accepted bid
//! - After close, the auction state is frozen
//! - At most one session per participant
//! - A stale subscription's leave never drops the current session
//! - NEVER panic on any sequence

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use chorus_core::{BroadcastEngine, EngineConfig, EngineMode, Subscription};
use chorus_proto::{Event, EventKind, Payload};
use libfuzzer_sys::fuzz_target;

const PARTICIPANTS: [&str; 4] = ["alice", "bob", "carol", "dave"];

#[derive(Debug, Arbitrary)]
enum Op {
    Join(u8),
    Leave(u8),
    Chat { who: u8, logical_time: Option<u64> },
    Bid { who: u8, amount: u64 },
    Query(u8),
    Raw { who: u8, kind: u8, amount: Option<u64> },
    Close,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    auction: bool,
    queue_capacity: u8,
    ops: Vec<Op>,
}

fn who(index: u8) -> &'static str {
    PARTICIPANTS[usize::from(index) % PARTICIPANTS.len()]
}

fuzz_target!(|input: FuzzInput| {
    let mode = if input.auction { EngineMode::Auction } else { EngineMode::Chat };
    let engine = BroadcastEngine::new(EngineConfig {
        mode,
        auction_duration: Duration::from_secs(1),
        session_queue_capacity: usize::from(input.queue_capacity % 8),
    });

    // Every subscription ever opened, current or stale.
    let mut subscriptions: Vec<Subscription> = Vec::new();
    let mut last_clock = engine.clock_time();

    for op in input.ops {
        let before = engine.auction();

        match op {
            Op::Join(i) => {
                if let Ok(subscription) = engine.on_join(who(i)) {
                    assert!(engine.registry().is_active(subscription.info()));
                    subscriptions.push(subscription);
                }
            },
            Op::Leave(i) => {
                if subscriptions.is_empty() {
                    continue;
                }
                let subscription = subscriptions.remove(usize::from(i) % subscriptions.len());
                let info = subscription.info().clone();
                let was_active = engine.registry().is_active(&info);
                let dropped = engine.on_leave(&info);
                assert_eq!(dropped, was_active, "leave of {info:?}");
                assert!(!engine.registry().is_active(&info));
            },
            Op::Chat { who: i, logical_time } => {
                let mut event = Event::chat(who(i), "x", 0);
                event.logical_time = logical_time;
                let _ = engine.on_publish(event);
                if mode == EngineMode::Chat {
                    assert!(engine.clock_time() > last_clock || last_clock == u64::MAX);
                }
            },
            Op::Bid { who: i, amount } => {
                let result = engine.on_publish(Event::bid(who(i), amount));
                let after = engine.auction();
                if let Ok(ack) = result {
                    let raised = after.current_highest_bid() != before.current_highest_bid();
                    assert_eq!(ack.accepted, raised);
                    if ack.accepted {
                        assert_eq!(after.current_highest_bid(), amount);
                        assert_eq!(after.highest_bidder(), Some(who(i)));
                    }
                }
            },
            Op::Query(i) => {
                let _ = engine.on_publish(Event::result_query(who(i)));
            },
            Op::Raw { who: i, kind, amount } => {
                let kind = match kind % 4 {
                    0 => EventKind::Chat,
                    1 => EventKind::Bid,
                    2 => EventKind::ResultQuery,
                    _ => EventKind::System,
                };
                let mut event = Event::result_query(who(i));
                event.kind = kind;
                event.payload = amount.map_or(Payload::Empty, Payload::Amount);
                let _ = engine.on_publish(event);
            },
            Op::Close => {
                let first = engine.close_auction();
                assert_eq!(first, !before.is_closed());
            },
        }

        let after = engine.auction();
        assert!(after.current_highest_bid() >= before.current_highest_bid());
        if before.is_closed() {
            assert!(after.is_closed());
            assert_eq!(after.current_highest_bid(), before.current_highest_bid());
            assert_eq!(after.highest_bidder(), before.highest_bidder());
        }

        let clock = engine.clock_time();
        assert!(clock >= last_clock, "replica clock went backwards");
        last_clock = clock;

        assert!(engine.registry().len() <= PARTICIPANTS.len());
    }
});
