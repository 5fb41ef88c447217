//! One clock, many replicas.
//!
//! `ReplicaFanout` joins every configured replica, merges whatever they send
//! into a single local Lamport clock and a single output stream, and submits
//! every outgoing event to all of them. Replicas are never coordinated: a
//! replica that is down or refuses is logged and skipped.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chorus_core::LogicalClock;
use chorus_proto::{Ack, Event, EventKind, Payload};
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};

use crate::{
    error::ClientError,
    link::{EventStream, ReplicaLink},
};

/// Buffered presentation items before receive loops wait on the consumer.
const OUTPUT_CAPACITY: usize = 1024;

/// How long [`ReplicaFanout::shutdown`] waits for subscriptions to close.
pub const LEAVE_GRACE: Duration = Duration::from_secs(2);

/// Something for the user to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutput {
    /// Event received from a replica, with the local clock after merging it.
    Event {
        /// Replica that delivered it.
        replica: String,
        /// The event as received.
        event: Event,
        /// Local clock value after the merge.
        local_time: u64,
    },
    /// A replica stopped serving us.
    ReplicaDown {
        /// Replica label.
        replica: String,
        /// What happened.
        reason: String,
    },
}

/// Outcome of [`ReplicaFanout::join_all`].
#[derive(Debug, Default)]
pub struct JoinReport {
    /// Replicas now streaming to us.
    pub joined: Vec<String>,
    /// Replicas that could not be joined.
    pub failed: Vec<ClientError>,
}

/// Outcome of [`ReplicaFanout::publish_all`].
#[derive(Debug)]
pub struct PublishReport {
    /// The event as submitted.
    pub event: Event,
    /// Acknowledgements, per replica.
    pub acks: Vec<(String, Ack)>,
    /// Replicas that did not answer with an acknowledgement.
    pub failed: Vec<ClientError>,
}

impl PublishReport {
    /// True if at least one replica accepted the event.
    pub fn any_accepted(&self) -> bool {
        self.acks.iter().any(|(_, ack)| ack.accepted)
    }
}

/// Merge an inbound event into the local clock.
///
/// Events that carry a logical time go through the receive rule exactly once;
/// unstamped auction events leave the clock alone.
fn merge_inbound(clock: &Mutex<LogicalClock>, event: &Event) -> u64 {
    let mut clock = clock.lock().unwrap_or_else(PoisonError::into_inner);
    match event.logical_time {
        Some(time) => clock.merge_on_receive(time),
        None => clock.time(),
    }
}

/// Client fan-out over N replicas.
pub struct ReplicaFanout {
    participant_id: String,
    clock: Arc<Mutex<LogicalClock>>,
    links: Vec<Arc<dyn ReplicaLink>>,
    output: mpsc::Sender<ClientOutput>,
    shutdown: watch::Sender<bool>,
    receivers: JoinSet<()>,
}

impl ReplicaFanout {
    /// Create a fan-out. The receiver yields everything to present to the user.
    pub fn new(
        participant_id: impl Into<String>,
        initial_time: u64,
        links: Vec<Arc<dyn ReplicaLink>>,
    ) -> (Self, mpsc::Receiver<ClientOutput>) {
        let (output, rx) = mpsc::channel(OUTPUT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let fanout = Self {
            participant_id: participant_id.into(),
            clock: Arc::new(Mutex::new(LogicalClock::starting_at(initial_time))),
            links,
            output,
            shutdown,
            receivers: JoinSet::new(),
        };
        (fanout, rx)
    }

    /// Our participant identity.
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Current local clock value.
    pub fn clock_time(&self) -> u64 {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner).time()
    }

    /// Labels of every configured replica.
    pub fn replicas(&self) -> Vec<&str> {
        self.links.iter().map(|link| link.label()).collect()
    }

    /// Join every replica concurrently and start one receive loop per
    /// successful subscription.
    pub async fn join_all(&mut self) -> JoinReport {
        let mut attempts = JoinSet::new();
        for link in &self.links {
            let link = Arc::clone(link);
            let participant = self.participant_id.clone();
            attempts.spawn(async move {
                let result = link.join(&participant).await;
                (link.label().to_string(), result)
            });
        }

        let mut report = JoinReport::default();
        while let Some(attempt) = attempts.join_next().await {
            let (replica, result) = match attempt {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("join task failed: {}", e);
                    continue;
                },
            };

            match result {
                Ok(stream) => {
                    tracing::info!(replica = %replica, participant = %self.participant_id, "Joined");
                    self.spawn_receiver(replica.clone(), stream);
                    report.joined.push(replica);
                },
                Err(e) => {
                    tracing::warn!(replica = %replica, "join failed: {}", e);
                    let _ = self
                        .output
                        .send(ClientOutput::ReplicaDown { replica, reason: e.to_string() })
                        .await;
                    report.failed.push(e);
                },
            }
        }

        report
    }

    fn spawn_receiver(&mut self, replica: String, stream: Box<dyn EventStream>) {
        let clock = Arc::clone(&self.clock);
        let output = self.output.clone();
        let shutdown = self.shutdown.subscribe();
        self.receivers.spawn(receive_loop(replica, stream, clock, output, shutdown));
    }

    /// Merge one inbound event and hand it to the presentation stream.
    pub async fn on_event_from_replica(&self, replica: &str, event: Event) {
        deliver(&self.clock, &self.output, replica, event).await;
    }

    /// Stamp one event and submit it to every replica.
    ///
    /// The clock ticks once, before any submission, and is not rolled back if
    /// some or all replicas fail.
    pub async fn publish_all(&self, payload: Payload) -> PublishReport {
        let time = self.clock.lock().unwrap_or_else(PoisonError::into_inner).tick_for_send();
        let event = outgoing_event(&self.participant_id, payload, time);

        let mut submissions = JoinSet::new();
        for link in &self.links {
            let link = Arc::clone(link);
            let event = event.clone();
            submissions.spawn(async move {
                let result = link.publish(&event).await;
                (link.label().to_string(), result)
            });
        }

        let mut report = PublishReport { event, acks: Vec::new(), failed: Vec::new() };
        while let Some(submission) = submissions.join_next().await {
            match submission {
                Ok((replica, Ok(ack))) => {
                    tracing::debug!(replica = %replica, accepted = ack.accepted, time, "Published");
                    report.acks.push((replica, ack));
                },
                Ok((replica, Err(e))) => {
                    tracing::warn!(replica = %replica, time, "publish failed: {}", e);
                    report.failed.push(e);
                },
                Err(e) => tracing::error!("publish task failed: {}", e),
            }
        }

        report
    }

    /// Leave every replica and wait for the receive loops to finish.
    ///
    /// Loops still stuck after [`LEAVE_GRACE`] (for example on a full output
    /// channel nobody reads) are aborted.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);

        let drain = async {
            while let Some(result) = self.receivers.join_next().await {
                if let Err(e) = result {
                    tracing::debug!("receive loop ended abnormally: {}", e);
                }
            }
        };
        if tokio::time::timeout(LEAVE_GRACE, drain).await.is_err() {
            tracing::warn!("receive loops did not stop in time, aborting");
            self.receivers.abort_all();
        }

        tracing::info!(participant = %self.participant_id, "Left all replicas");
    }
}

/// Build an outgoing event whose kind matches its payload.
fn outgoing_event(sender_id: &str, payload: Payload, time: u64) -> Event {
    let kind = match &payload {
        Payload::Text(_) => EventKind::Chat,
        Payload::Amount(_) => EventKind::Bid,
        Payload::Empty => EventKind::ResultQuery,
        Payload::Notice(_) => EventKind::System,
    };
    Event { sender_id: sender_id.to_string(), kind, payload, logical_time: Some(time) }
}

async fn deliver(
    clock: &Mutex<LogicalClock>,
    output: &mpsc::Sender<ClientOutput>,
    replica: &str,
    event: Event,
) {
    let local_time = merge_inbound(clock, &event);
    tracing::debug!(replica = %replica, sender = %event.sender_id, local_time, "Received");

    let item = ClientOutput::Event { replica: replica.to_string(), event, local_time };
    if output.send(item).await.is_err() {
        tracing::debug!(replica = %replica, "output closed, dropping event");
    }
}

async fn receive_loop(
    replica: String,
    mut stream: Box<dyn EventStream>,
    clock: Arc<Mutex<LogicalClock>>,
    output: mpsc::Sender<ClientOutput>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Err(e) = stream.close().await {
                    tracing::debug!(replica = %replica, "leave failed: {}", e);
                }
                return;
            },
            next = stream.next_event() => match next {
                Ok(Some(event)) => deliver(&clock, &output, &replica, event).await,
                Ok(None) => {
                    tracing::warn!(replica = %replica, "subscription ended by replica");
                    let reason = ClientError::StreamTerminated { replica: replica.clone() }.to_string();
                    let _ = output.send(ClientOutput::ReplicaDown { replica, reason }).await;
                    return;
                },
                Err(e) => {
                    tracing::warn!(replica = %replica, "subscription failed: {}", e);
                    let _ = output.send(ClientOutput::ReplicaDown { replica, reason: e.to_string() }).await;
                    return;
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chorus_proto::Notice;
    use proptest::prelude::*;

    use super::*;

    /// One step seen by the local clock: an inbound event (stamped or not)
    /// or a send.
    #[derive(Debug, Clone)]
    enum Step {
        Receive(Option<u64>),
        Send,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            proptest::option::of(0u64..1_000).prop_map(Step::Receive),
            Just(Step::Send),
        ]
    }

    proptest! {
        #[test]
        fn prop_merged_clock_never_decreases(
            start in 0u64..100,
            steps in proptest::collection::vec(step(), 0..64),
        ) {
            let clock = Mutex::new(LogicalClock::starting_at(start));
            let mut last = start;

            for step in steps {
                let now = match step {
                    Step::Receive(stamp) => {
                        let event = Event::system(Notice::Departed { participant: "x".into() }, stamp);
                        let now = merge_inbound(&clock, &event);
                        if let Some(stamp) = stamp {
                            prop_assert!(now > stamp);
                            prop_assert!(now > last);
                        }
                        now
                    },
                    Step::Send => {
                        let now = clock.lock().unwrap().tick_for_send();
                        prop_assert_eq!(now, last + 1);
                        now
                    },
                };
                prop_assert!(now >= last);
                last = now;
            }
        }
    }

    #[test]
    fn merge_follows_receive_rule() {
        let clock = Mutex::new(LogicalClock::starting_at(3));

        assert_eq!(merge_inbound(&clock, &Event::chat("a", "x", 10)), 11);
        assert_eq!(merge_inbound(&clock, &Event::chat("a", "x", 2)), 12);
    }

    #[test]
    fn unstamped_events_leave_clock_alone() {
        let clock = Mutex::new(LogicalClock::starting_at(4));
        let notice = Event::system(Notice::BidRejected { current_highest: 9 }, None);

        assert_eq!(merge_inbound(&clock, &notice), 4);
    }

    #[test]
    fn payload_picks_kind() {
        assert_eq!(outgoing_event("me", Payload::Amount(5), 1).kind, EventKind::Bid);
        assert_eq!(outgoing_event("me", Payload::Text("hi".into()), 1).kind, EventKind::Chat);
        assert_eq!(outgoing_event("me", Payload::Empty, 1).kind, EventKind::ResultQuery);
        assert_eq!(outgoing_event("me", Payload::Empty, 9).logical_time, Some(9));
    }

    #[tokio::test]
    async fn publish_with_no_replicas_still_ticks() {
        let (fanout, _rx) = ReplicaFanout::new("solo", 7, Vec::new());

        let report = fanout.publish_all(Payload::Text("anyone?".into())).await;

        assert_eq!(report.event.logical_time, Some(8));
        assert!(!report.any_accepted());
        assert_eq!(fanout.clock_time(), 8);
    }

    #[tokio::test]
    async fn on_event_from_replica_merges_and_forwards() {
        let (fanout, mut rx) = ReplicaFanout::new("me", 0, Vec::new());

        fanout.on_event_from_replica("r0", Event::chat("you", "hi", 5)).await;

        let Some(ClientOutput::Event { replica, local_time, .. }) = rx.recv().await else {
            unreachable!("expected an event");
        };
        assert_eq!(replica, "r0");
        assert_eq!(local_time, 6);
    }
}
