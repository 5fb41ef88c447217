//! Scripted multi-replica simulations.
//!
//! A [`Scenario`] describes replicas (some offline, some stopped mid-run) and
//! participants with timed publishes. [`Scenario::run`] plays it on turmoil,
//! records what every participant saw, and hands the resulting [`World`] to
//! each oracle.
//!
//! ```rust,ignore
//! let world = Scenario::new()
//!     .replicas(2)
//!     .participant(ParticipantScript::new("alice").say(Duration::from_secs(1), "hello"))
//!     .participant(ParticipantScript::new("bob"))
//!     .run()?;
//! assert_eq!(world.trace("bob").unwrap().chat_events().len(), 2);
//! ```

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chorus_client::{ClientOutput, PublishReport, ReplicaFanout, ReplicaLink};
use chorus_core::{BroadcastEngine, EngineConfig, EngineMode};
use chorus_proto::{Event, EventKind, Notice, Payload};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::{sync::mpsc, time::Instant};

use crate::sim_transport::{REPLICA_PORT, SimLink, SimReplica};

/// Host name of the replica at `index`.
pub fn replica_host(index: usize) -> String {
    format!("replica{index}")
}

/// Check run against the finished world.
pub type Oracle = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Why a scenario failed.
#[derive(Debug)]
pub enum ScenarioError {
    /// The simulator reported an error (a host failed or time ran out).
    Simulation(String),
    /// An oracle rejected the outcome.
    Oracle(String),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation(msg) => write!(f, "simulation failed: {msg}"),
            Self::Oracle(msg) => write!(f, "oracle failed: {msg}"),
        }
    }
}

impl std::error::Error for ScenarioError {}

#[derive(Debug, Clone)]
struct Step {
    at: Duration,
    payload: Payload,
}

/// What one participant does, relative to simulation start.
#[derive(Debug, Clone)]
pub struct ParticipantScript {
    name: String,
    initial_time: u64,
    steps: Vec<Step>,
    listen_until: Duration,
}

impl ParticipantScript {
    /// Participant that joins every replica at start and listens for 10 s.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_time: 0,
            steps: Vec::new(),
            listen_until: Duration::from_secs(10),
        }
    }

    /// Start the local clock at `time`.
    #[must_use]
    pub fn starting_at(mut self, time: u64) -> Self {
        self.initial_time = time;
        self
    }

    /// Publish a chat line at `at`.
    #[must_use]
    pub fn say(self, at: Duration, text: impl Into<String>) -> Self {
        self.step(at, Payload::Text(text.into()))
    }

    /// Bid at `at`.
    #[must_use]
    pub fn bid(self, at: Duration, amount: u64) -> Self {
        self.step(at, Payload::Amount(amount))
    }

    /// Ask for the auction result at `at`.
    #[must_use]
    pub fn query(self, at: Duration) -> Self {
        self.step(at, Payload::Empty)
    }

    /// Keep collecting output until `at`, then leave.
    #[must_use]
    pub fn listen_until(mut self, at: Duration) -> Self {
        self.listen_until = at;
        self
    }

    fn step(mut self, at: Duration, payload: Payload) -> Self {
        self.steps.push(Step { at, payload });
        self
    }
}

/// Summary of one `publish_all` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    /// Event as submitted.
    pub event: Event,
    /// Replicas that acknowledged with `accepted = true`.
    pub accepted: usize,
    /// Replicas that acknowledged with `accepted = false`.
    pub rejected: usize,
    /// Replicas that did not acknowledge at all.
    pub failed: usize,
}

impl From<&PublishReport> for PublishSummary {
    fn from(report: &PublishReport) -> Self {
        let accepted = report.acks.iter().filter(|(_, ack)| ack.accepted).count();
        Self {
            event: report.event.clone(),
            accepted,
            rejected: report.acks.len() - accepted,
            failed: report.failed.len(),
        }
    }
}

/// Everything one participant observed.
#[derive(Debug, Clone, Default)]
pub struct ParticipantTrace {
    /// Participant identity.
    pub name: String,
    /// Replicas joined at start.
    pub joined: Vec<String>,
    /// Join failures, rendered.
    pub failed_joins: Vec<String>,
    /// Every publish, in order.
    pub publishes: Vec<PublishSummary>,
    /// Presentation stream, in arrival order.
    pub outputs: Vec<ClientOutput>,
    /// Local clock when the participant left.
    pub final_clock: u64,
}

impl ParticipantTrace {
    /// Received chat events as `(replica, event, local_time)`.
    pub fn chat_events(&self) -> Vec<(&str, &Event, u64)> {
        self.received().filter(|(_, event, _)| event.kind == EventKind::Chat).collect()
    }

    /// Every notice received, in order.
    pub fn notices(&self) -> Vec<&Notice> {
        self.received().filter_map(|(_, event, _)| event.notice()).collect()
    }

    /// Local clock after each received event.
    pub fn local_times(&self) -> Vec<u64> {
        self.received().map(|(_, _, time)| time).collect()
    }

    /// Replicas reported lost, in order.
    pub fn lost_replicas(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter_map(|output| match output {
                ClientOutput::ReplicaDown { replica, .. } => Some(replica.as_str()),
                ClientOutput::Event { .. } => None,
            })
            .collect()
    }

    fn received(&self) -> impl Iterator<Item = (&str, &Event, u64)> {
        self.outputs.iter().filter_map(|output| match output {
            ClientOutput::Event { replica, event, local_time } => {
                Some((replica.as_str(), event, *local_time))
            },
            ClientOutput::ReplicaDown { .. } => None,
        })
    }
}

/// Outcome of a scenario run.
pub struct World {
    replicas: Vec<Arc<SimReplica>>,
    traces: Vec<ParticipantTrace>,
}

impl World {
    /// Engine of the replica at `index`.
    pub fn engine(&self, index: usize) -> Option<&BroadcastEngine> {
        self.replicas.get(index).map(|replica| replica.engine().as_ref())
    }

    /// Number of replicas.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Trace of the named participant.
    pub fn trace(&self, name: &str) -> Option<&ParticipantTrace> {
        self.traces.iter().find(|trace| trace.name == name)
    }

    /// Every participant trace.
    pub fn traces(&self) -> &[ParticipantTrace] {
        &self.traces
    }
}

/// Builder for a simulated run.
pub struct Scenario {
    engine: EngineConfig,
    replicas: usize,
    offline: Vec<usize>,
    stops: Vec<(usize, Duration)>,
    participants: Vec<ParticipantScript>,
    seed: u64,
    latency: Option<Duration>,
    duration: Duration,
    oracles: Vec<Oracle>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario {
    /// One chat replica, no participants, 60 s of virtual time.
    pub fn new() -> Self {
        Self {
            engine: EngineConfig::default(),
            replicas: 1,
            offline: Vec::new(),
            stops: Vec::new(),
            participants: Vec::new(),
            seed: 0,
            latency: None,
            duration: Duration::from_secs(60),
            oracles: Vec::new(),
        }
    }

    /// Random chat traffic derived entirely from `seed`.
    pub fn random_chat(seed: u64, replicas: usize, participants: usize, messages_each: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut scenario = Self::new().replicas(replicas).seed(seed);

        for p in 0..participants {
            let mut script = ParticipantScript::new(format!("p{p}")).starting_at(rng.gen_range(0..20));
            for m in 0..messages_each {
                let at = Duration::from_millis(rng.gen_range(1_000..8_000));
                script = script.say(at, format!("p{p}-m{m}"));
            }
            scenario = scenario.participant(script);
        }

        scenario
    }

    /// Replica event policy.
    #[must_use]
    pub fn mode(mut self, mode: EngineMode) -> Self {
        self.engine.mode = mode;
        self
    }

    /// Full engine configuration for every replica.
    #[must_use]
    pub fn engine(mut self, config: EngineConfig) -> Self {
        self.engine = config;
        self
    }

    /// Number of replicas (`replica0`, `replica1`, ...).
    #[must_use]
    pub fn replicas(mut self, count: usize) -> Self {
        self.replicas = count;
        self
    }

    /// Replica `index` runs but never listens.
    #[must_use]
    pub fn offline(mut self, index: usize) -> Self {
        self.offline.push(index);
        self
    }

    /// Take replica `index` down at `at`.
    #[must_use]
    pub fn stop_replica(mut self, index: usize, at: Duration) -> Self {
        self.stops.push((index, at));
        self
    }

    /// Add a participant.
    #[must_use]
    pub fn participant(mut self, script: ParticipantScript) -> Self {
        self.participants.push(script);
        self
    }

    /// Simulator RNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fixed one-way latency on every link.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Virtual time limit for the whole run.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Add a check on the finished world.
    #[must_use]
    pub fn oracle(mut self, oracle: Oracle) -> Self {
        self.oracles.push(oracle);
        self
    }

    /// Play the scenario and run every oracle.
    pub fn run(self) -> Result<World, ScenarioError> {
        let mut builder = turmoil::Builder::new();
        builder.simulation_duration(self.duration).rng_seed(self.seed);
        if let Some(latency) = self.latency {
            builder.min_message_latency(latency).max_message_latency(latency);
        }
        let mut sim = builder.build();

        let replicas: Vec<Arc<SimReplica>> =
            (0..self.replicas).map(|_| Arc::new(SimReplica::new(self.engine.clone()))).collect();
        let hosts: Vec<String> = (0..self.replicas).map(replica_host).collect();

        for (index, replica) in replicas.iter().enumerate() {
            if self.offline.contains(&index) {
                sim.host(hosts[index].as_str(), || async {
                    std::future::pending::<()>().await;
                    Ok(())
                });
            } else {
                let replica = Arc::clone(replica);
                sim.host(hosts[index].as_str(), move || {
                    let replica = Arc::clone(&replica);
                    async move { replica.serve(REPLICA_PORT).await }
                });
            }
        }

        if !self.stops.is_empty() {
            let mut stops: Vec<(Arc<SimReplica>, Duration)> = self
                .stops
                .iter()
                .filter_map(|&(index, at)| replicas.get(index).map(|r| (Arc::clone(r), at)))
                .collect();
            stops.sort_by_key(|(_, at)| *at);

            sim.client("controller", async move {
                let start = Instant::now();
                for (replica, at) in stops {
                    tokio::time::sleep_until(start + at).await;
                    replica.stop();
                }
                Ok(())
            });
        }

        let traces = Arc::new(Mutex::new(Vec::new()));
        for script in self.participants {
            let traces = Arc::clone(&traces);
            let hosts = hosts.clone();
            sim.client(script.name.clone(), async move {
                let trace = run_participant(script, &hosts).await;
                traces.lock().unwrap_or_else(PoisonError::into_inner).push(trace);
                Ok(())
            });
        }

        sim.run().map_err(|e| ScenarioError::Simulation(e.to_string()))?;

        let traces = std::mem::take(&mut *traces.lock().unwrap_or_else(PoisonError::into_inner));
        let world = World { replicas, traces };
        for oracle in self.oracles {
            oracle(&world).map_err(ScenarioError::Oracle)?;
        }
        Ok(world)
    }
}

async fn run_participant(script: ParticipantScript, hosts: &[String]) -> ParticipantTrace {
    let start = Instant::now();
    let links: Vec<Arc<dyn ReplicaLink>> =
        hosts.iter().map(|host| Arc::new(SimLink::new(host)) as Arc<dyn ReplicaLink>).collect();
    let (mut fanout, mut rx) = ReplicaFanout::new(script.name.clone(), script.initial_time, links);

    let report = fanout.join_all().await;
    let mut trace = ParticipantTrace {
        name: script.name,
        joined: report.joined,
        failed_joins: report.failed.iter().map(ToString::to_string).collect(),
        ..Default::default()
    };

    let mut steps = script.steps;
    steps.sort_by_key(|step| step.at);
    for step in steps {
        collect_until(&mut rx, start + step.at, &mut trace.outputs).await;
        let report = fanout.publish_all(step.payload).await;
        trace.publishes.push(PublishSummary::from(&report));
    }

    collect_until(&mut rx, start + script.listen_until, &mut trace.outputs).await;
    trace.final_clock = fanout.clock_time();
    fanout.shutdown().await;
    trace
}

async fn collect_until(
    rx: &mut mpsc::Receiver<ClientOutput>,
    deadline: Instant,
    outputs: &mut Vec<ClientOutput>,
) {
    while let Ok(Some(output)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        outputs.push(output);
    }
}
