//! Property-based tests over random chat traffic.
//!
//! Every run draws its participants, starting clocks and publish times from
//! the seed, so failures shrink to a reproducible seed.

use std::collections::HashMap;

use chorus_harness::Scenario;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_local_clock_advances_on_every_receipt(
        seed in any::<u64>(),
        replicas in 1usize..=3,
        participants in 1usize..=3,
        messages_each in 1usize..=3,
    ) {
        let world = Scenario::random_chat(seed, replicas, participants, messages_each).run();
        prop_assert!(world.is_ok(), "scenario failed: {:?}", world.err());
        let world = world.unwrap();

        for trace in world.traces() {
            let times = trace.local_times();
            prop_assert!(
                times.windows(2).all(|w| w[0] < w[1]),
                "{}: local times not strictly increasing: {:?}", trace.name, times
            );

            for (replica, event, local) in trace.chat_events() {
                let stamp = event.logical_time.unwrap_or(0);
                prop_assert!(local > stamp, "{} from {}: local {} <= stamp {}", trace.name, replica, local, stamp);
            }

            prop_assert!(trace.final_clock >= times.last().copied().unwrap_or(0));
        }
    }

    #[test]
    fn prop_every_line_reaches_everyone_through_every_replica(
        seed in any::<u64>(),
        replicas in 1usize..=3,
        participants in 1usize..=3,
        messages_each in 1usize..=3,
    ) {
        let world = Scenario::random_chat(seed, replicas, participants, messages_each).run();
        prop_assert!(world.is_ok(), "scenario failed: {:?}", world.err());
        let world = world.unwrap();

        prop_assert_eq!(world.traces().len(), participants);
        for trace in world.traces() {
            prop_assert_eq!(trace.joined.len(), replicas);
            prop_assert!(trace.publishes.iter().all(|p| p.accepted == replicas));
            prop_assert_eq!(trace.chat_events().len(), replicas * participants * messages_each);
        }
    }

    #[test]
    fn prop_replica_stamps_increase_per_subscription(
        seed in any::<u64>(),
        replicas in 1usize..=3,
        participants in 2usize..=3,
    ) {
        let world = Scenario::random_chat(seed, replicas, participants, 2).run();
        prop_assert!(world.is_ok(), "scenario failed: {:?}", world.err());
        let world = world.unwrap();

        for trace in world.traces() {
            let mut last: HashMap<&str, u64> = HashMap::new();
            for output in &trace.outputs {
                if let chorus_client::ClientOutput::Event { replica, event, .. } = output {
                    let stamp = event.logical_time;
                    prop_assert!(stamp.is_some(), "unstamped event in chat mode: {:?}", event);
                    let stamp = stamp.unwrap_or(0);
                    if let Some(previous) = last.insert(replica.as_str(), stamp) {
                        prop_assert!(previous < stamp, "{} via {}: {} then {}", trace.name, replica, previous, stamp);
                    }
                }
            }
        }
    }
}
