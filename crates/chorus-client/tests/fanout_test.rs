//! Replica fan-out tests over in-process replicas

use std::{sync::Arc, time::Duration};

use chorus_client::{ClientError, ClientOutput, LocalLink, ReplicaFanout, ReplicaLink};
use chorus_core::{BroadcastEngine, EngineConfig, EngineMode};
use chorus_proto::{Event, EventKind, Notice, Payload};
use tokio::sync::mpsc;

fn engine(mode: EngineMode) -> Arc<BroadcastEngine> {
    Arc::new(BroadcastEngine::new(EngineConfig { mode, ..Default::default() }))
}

fn links(engines: &[Arc<BroadcastEngine>]) -> Vec<Arc<LocalLink>> {
    engines
        .iter()
        .enumerate()
        .map(|(i, engine)| Arc::new(LocalLink::new(format!("replica-{i}"), Arc::clone(engine))))
        .collect()
}

fn as_dyn(links: &[Arc<LocalLink>]) -> Vec<Arc<dyn ReplicaLink>> {
    links.iter().map(|link| Arc::clone(link) as Arc<dyn ReplicaLink>).collect()
}

/// Helper: collect outputs until none arrive for a short while
async fn drain(rx: &mut mpsc::Receiver<ClientOutput>) -> Vec<ClientOutput> {
    let mut outputs = Vec::new();
    while let Ok(Some(output)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        outputs.push(output);
    }
    outputs
}

fn chat_lines(outputs: &[ClientOutput]) -> Vec<(String, String, u64)> {
    outputs
        .iter()
        .filter_map(|output| match output {
            ClientOutput::Event { replica, event, local_time } if event.kind == EventKind::Chat => {
                let Payload::Text(text) = &event.payload else { return None };
                Some((replica.clone(), text.clone(), *local_time))
            },
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn joins_every_replica_and_receives_welcomes() {
    let engines = [engine(EngineMode::Chat), engine(EngineMode::Chat)];
    let links = links(&engines);
    let (mut alice, mut rx) = ReplicaFanout::new("alice", 0, as_dyn(&links));

    let report = alice.join_all().await;

    assert_eq!(report.joined.len(), 2);
    assert!(report.failed.is_empty());
    let welcomes = drain(&mut rx)
        .await
        .into_iter()
        .filter(|o| matches!(o, ClientOutput::Event { event, .. } if event.notice() == Some(&Notice::Welcome { participant: "alice".into() })))
        .count();
    assert_eq!(welcomes, 2);
    for engine in &engines {
        assert!(engine.registry().contains("alice"));
    }
}

#[tokio::test]
async fn chat_publish_reaches_other_client_through_every_replica() {
    let engines = [engine(EngineMode::Chat), engine(EngineMode::Chat)];
    let links = links(&engines);
    let (mut alice, mut alice_rx) = ReplicaFanout::new("alice", 0, as_dyn(&links));
    let (mut bob, mut bob_rx) = ReplicaFanout::new("bob", 0, as_dyn(&links));
    alice.join_all().await;
    bob.join_all().await;
    drain(&mut alice_rx).await;
    drain(&mut bob_rx).await;

    let before = alice.clock_time();
    let report = alice.publish_all(Payload::Text("hello".into())).await;
    assert_eq!(report.event.logical_time, Some(before + 1));
    assert_eq!(report.acks.len(), 2);
    assert!(report.acks.iter().all(|(_, ack)| ack.accepted));

    let lines = chat_lines(&drain(&mut bob_rx).await);
    assert_eq!(lines.len(), 2, "one copy per replica");
    assert!(lines.iter().all(|(_, text, _)| text == "hello"));

    // Replica time is at least 2, so bob's merged clock passes it.
    assert!(bob.clock_time() >= 3);
    let mut times: Vec<u64> = lines.iter().map(|(_, _, t)| *t).collect();
    times.sort_unstable();
    times.dedup();
    assert_eq!(times.len(), 2, "each delivery advances the local clock");

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn unreachable_replica_does_not_stop_the_client() {
    let engines = [engine(EngineMode::Chat), engine(EngineMode::Chat)];
    let links = links(&engines);
    links[1].set_online(false);

    let (mut alice, mut rx) = ReplicaFanout::new("alice", 0, as_dyn(&links));
    let report = alice.join_all().await;

    assert_eq!(report.joined, vec!["replica-0".to_string()]);
    assert!(matches!(report.failed.as_slice(), [ClientError::ConnectionUnavailable { .. }]));

    let before = alice.clock_time();
    let publish = alice.publish_all(Payload::Text("still here".into())).await;
    assert_eq!(publish.acks.len(), 1);
    assert_eq!(publish.failed.len(), 1);
    assert_eq!(publish.event.logical_time, Some(before + 1));
    assert!(alice.clock_time() > before, "failed submission does not roll the clock back");

    let outputs = drain(&mut rx).await;
    assert!(outputs.iter().any(|o| matches!(o, ClientOutput::ReplicaDown { replica, .. } if replica == "replica-1")));
    assert_eq!(chat_lines(&outputs).len(), 1);
}

#[tokio::test]
async fn losing_a_replica_mid_session_is_surfaced() {
    let engines = [engine(EngineMode::Chat), engine(EngineMode::Chat)];
    let links = links(&engines);
    let (mut alice, mut rx) = ReplicaFanout::new("alice", 0, as_dyn(&links));
    alice.join_all().await;
    drain(&mut rx).await;

    assert!(engines[0].registry().remove("alice"));
    links[0].set_online(false);

    let outputs = drain(&mut rx).await;
    assert!(outputs.iter().any(|o| matches!(o, ClientOutput::ReplicaDown { replica, .. } if replica == "replica-0")));

    alice.publish_all(Payload::Text("via the other one".into())).await;
    let lines = chat_lines(&drain(&mut rx).await);
    assert_eq!(lines, vec![("replica-1".to_string(), "via the other one".to_string(), lines[0].2)]);
}

#[tokio::test]
async fn merged_clock_never_goes_backwards() {
    let (alice, mut rx) = ReplicaFanout::new("alice", 10, Vec::new());

    let mut last = alice.clock_time();
    for stamp in [3, 50, 1, 50, 49, 200, 0] {
        alice.on_event_from_replica("r", Event::chat("bob", "m", stamp)).await;
        let now = alice.clock_time();
        assert!(now > last, "{now} <= {last}");
        assert!(now > stamp);
        last = now;
    }
    assert_eq!(drain(&mut rx).await.len(), 7);
}

#[tokio::test]
async fn auction_through_two_replicas() {
    let engines = [engine(EngineMode::Auction), engine(EngineMode::Auction)];
    let links = links(&engines);
    let (mut bidder, mut bidder_rx) = ReplicaFanout::new("bidder", 0, as_dyn(&links));
    let (mut second, mut second_rx) = ReplicaFanout::new("second", 0, as_dyn(&links));
    bidder.join_all().await;
    second.join_all().await;
    drain(&mut bidder_rx).await;
    drain(&mut second_rx).await;

    let first = bidder.publish_all(Payload::Amount(50)).await;
    assert!(first.acks.iter().all(|(_, ack)| ack.accepted));

    let low = second.publish_all(Payload::Amount(30)).await;
    assert_eq!(low.acks.len(), 2);
    assert!(!low.any_accepted());

    let notices: Vec<Notice> = drain(&mut second_rx)
        .await
        .into_iter()
        .filter_map(|o| match o {
            ClientOutput::Event { event, .. } => event.notice().cloned(),
            ClientOutput::ReplicaDown { .. } => None,
        })
        .collect();
    assert_eq!(notices.iter().filter(|n| matches!(n, Notice::HighestBid { amount: 50, .. })).count(), 2);
    assert_eq!(notices.iter().filter(|n| **n == Notice::BidRejected { current_highest: 50 }).count(), 2);

    for engine in &engines {
        assert_eq!(engine.auction().current_highest_bid(), 50);
        assert_eq!(engine.auction().highest_bidder(), Some("bidder"));
    }
}
