//! Lamport clock.
//!
//! Two update paths are kept separate so an event is never counted twice:
//!
//! - [`LogicalClock::tick_for_send`] for events this process originates
//! - [`LogicalClock::merge_on_receive`] for every event observed from a peer
//!
//! # Invariants
//!
//! - Monotonicity: `time` never decreases
//! - After `merge_on_receive(t)`, `time > t`

/// Monotonic logical counter for one replica or one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalClock {
    time: u64,
}

impl LogicalClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock starting at `time`.
    pub fn starting_at(time: u64) -> Self {
        Self { time }
    }

    /// Current value.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Raise the clock to `incoming_time` without counting an event.
    pub fn observe(&mut self, incoming_time: u64) {
        self.time = self.time.max(incoming_time);
    }

    /// Advance for an outgoing event and return the stamp to put on it.
    pub fn tick_for_send(&mut self) -> u64 {
        self.time = self.time.saturating_add(1);
        self.time
    }

    /// Apply Lamport's receive rule and return the new value.
    ///
    /// If the incoming stamp is ahead, jump past it; otherwise count one
    /// local step.
    pub fn merge_on_receive(&mut self, incoming_time: u64) -> u64 {
        self.time = if incoming_time > self.time {
            incoming_time.saturating_add(1)
        } else {
            self.time.saturating_add(1)
        };
        self.time
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn tick_for_send_increments_by_one() {
        let mut clock = LogicalClock::new();
        assert_eq!(clock.tick_for_send(), 1);
        assert_eq!(clock.tick_for_send(), 2);
    }

    #[test]
    fn merge_jumps_past_larger_stamp() {
        let mut clock = LogicalClock::starting_at(3);
        assert_eq!(clock.merge_on_receive(10), 11);
    }

    #[test]
    fn merge_with_equal_stamp_counts_one_step() {
        let mut clock = LogicalClock::starting_at(5);
        assert_eq!(clock.merge_on_receive(5), 6);
    }

    #[test]
    fn observe_never_counts_an_event() {
        let mut clock = LogicalClock::starting_at(4);
        clock.observe(2);
        assert_eq!(clock.time(), 4);
        clock.observe(9);
        assert_eq!(clock.time(), 9);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let mut clock = LogicalClock::starting_at(u64::MAX);
        assert_eq!(clock.tick_for_send(), u64::MAX);
        assert_eq!(clock.merge_on_receive(u64::MAX), u64::MAX);
    }

    proptest! {
        #[test]
        fn prop_merge_exceeds_every_stamp_seen(stamps in prop::collection::vec(0u64..1_000_000, 1..64)) {
            let mut clock = LogicalClock::new();
            let mut max_seen = 0;
            for stamp in stamps {
                let before = clock.time();
                let after = clock.merge_on_receive(stamp);
                max_seen = max_seen.max(stamp);

                prop_assert!(after > before, "clock must strictly advance");
                prop_assert!(after > max_seen, "clock {} must exceed max stamp {}", after, max_seen);
            }
        }

        #[test]
        fn prop_smaller_stamp_yields_time_plus_one(start in 1u64..1_000_000, delta in 1u64..1_000) {
            let mut clock = LogicalClock::starting_at(start);
            let stamp = start.saturating_sub(delta);
            prop_assert_eq!(clock.merge_on_receive(stamp), start + 1);
        }

        #[test]
        fn prop_clock_never_decreases(ops in prop::collection::vec((any::<bool>(), 0u64..10_000), 0..64)) {
            let mut clock = LogicalClock::new();
            for (send, stamp) in ops {
                let before = clock.time();
                if send {
                    clock.tick_for_send();
                } else {
                    clock.observe(stamp);
                }
                prop_assert!(clock.time() >= before);
            }
        }
    }
}
