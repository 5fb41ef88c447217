//! Session registry.
//!
//! Maps participant identity to the outbound queue of its live subscription
//! on this replica. Every mutation happens under one mutex; the per-session
//! queue is bounded and written with `try_send`, so a slow participant can
//! never stall delivery to the others.
//!
//! # Session lifecycle
//!
//! ```text
//! admit ──► Active ──► Removed
//!             │          ▲
//!             └──────────┘  remove / release / delivery failure / replaced
//! ```
//!
//! A later `admit` under the same identity replaces the mapping. Each
//! admission gets a fresh [`SessionId`] so the replaced subscription's task
//! cannot tear down its successor when it releases.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use chorus_proto::Event;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::RegistryError;

/// Generation number of one admission.
pub type SessionId = u64;

/// Why a send to a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Receiving side is gone.
    Disconnected,
    /// Participant is not draining its queue.
    QueueFull,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "peer disconnected"),
            Self::QueueFull => write!(f, "session queue full"),
        }
    }
}

/// Identity of one admitted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Participant the session belongs to.
    pub participant_id: String,
    /// Admission generation.
    pub session_id: SessionId,
}

/// Receiving end of an admitted session.
///
/// `recv` yields `None` once the registry has dropped the session (removed,
/// replaced or failed) and every queued event has been drained.
#[derive(Debug)]
pub struct Subscription {
    info: SessionInfo,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Session identity.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Next event for this session.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions that received the event.
    pub delivered: usize,
    /// Sessions that failed and were removed.
    pub failed: Vec<RegistryError>,
}

struct SessionEntry {
    session_id: SessionId,
    tx: mpsc::Sender<Event>,
}

/// Per-replica map of participant to live subscription.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_session_id: AtomicU64,
    queue_capacity: usize,
}

impl SessionRegistry {
    /// Registry whose sessions buffer at most `queue_capacity` events.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a bounded queue, admit it and emit `welcome` on it.
    pub fn open(&self, participant_id: &str, welcome: Event) -> Result<Subscription, RegistryError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let info = self.admit(participant_id, tx, welcome)?;
        Ok(Subscription { info, rx })
    }

    /// Insert or replace the session for `participant_id`, then emit
    /// `welcome` on `channel`.
    ///
    /// If the welcome cannot be delivered the session is not kept.
    pub fn admit(
        &self,
        participant_id: &str,
        channel: mpsc::Sender<Event>,
        welcome: Event,
    ) -> Result<SessionInfo, RegistryError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = channel.try_send(welcome) {
            return Err(delivery_failed(participant_id, &e));
        }

        let replaced = self
            .sessions()
            .insert(participant_id.to_string(), SessionEntry { session_id, tx: channel });

        if let Some(old) = replaced {
            tracing::debug!(
                participant = participant_id,
                old_session = old.session_id,
                new_session = session_id,
                "session replaced"
            );
        }

        Ok(SessionInfo { participant_id: participant_id.to_string(), session_id })
    }

    /// Drop the mapping for `participant_id`. Returns whether one existed.
    pub fn remove(&self, participant_id: &str) -> bool {
        self.sessions().remove(participant_id).is_some()
    }

    /// Drop the mapping only if it still belongs to `info`'s admission.
    pub fn release(&self, info: &SessionInfo) -> bool {
        let mut sessions = self.sessions();
        match sessions.get(&info.participant_id) {
            Some(entry) if entry.session_id == info.session_id => {
                sessions.remove(&info.participant_id);
                true
            },
            _ => false,
        }
    }

    /// Deliver `event` to every admitted session.
    ///
    /// Sessions whose queue is closed or full are removed in the same
    /// critical section; the rest still receive the event.
    pub fn broadcast(&self, event: &Event) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut sessions = self.sessions();

        sessions.retain(|participant_id, entry| match entry.tx.try_send(event.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            },
            Err(e) => {
                let err = delivery_failed(participant_id, &e);
                tracing::warn!(participant = %participant_id, "removing session: {}", err);
                report.failed.push(err);
                false
            },
        });

        report
    }

    /// Deliver `event` to exactly one session.
    pub fn unicast(&self, participant_id: &str, event: Event) -> Result<(), RegistryError> {
        let mut sessions = self.sessions();
        let entry = sessions.get(participant_id).ok_or_else(|| RegistryError::NoSuchSession {
            participant_id: participant_id.to_string(),
        })?;

        match entry.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(e) => {
                sessions.remove(participant_id);
                Err(delivery_failed(participant_id, &e))
            },
        }
    }

    /// Whether `info` is still the current admission for its participant.
    pub fn is_active(&self, info: &SessionInfo) -> bool {
        self.sessions()
            .get(&info.participant_id)
            .is_some_and(|entry| entry.session_id == info.session_id)
    }

    /// Whether `participant_id` has a session.
    pub fn contains(&self, participant_id: &str) -> bool {
        self.sessions().contains_key(participant_id)
    }

    /// Number of admitted sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Whether no session is admitted.
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Admitted participants, sorted.
    pub fn participants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn delivery_failed<T>(participant_id: &str, err: &TrySendError<T>) -> RegistryError {
    let reason = match err {
        TrySendError::Full(_) => DeliveryFailure::QueueFull,
        TrySendError::Closed(_) => DeliveryFailure::Disconnected,
    };
    RegistryError::DeliveryFailed { participant_id: participant_id.to_string(), reason }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}
