//! Event fan-out to connected WebSocket sessions.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use panelcast_core::adapter::now_millis;
use panelcast_core::{DomainEvent, EventSink, SessionId};
use panelcast_telemetry::{names, MetricsCollector};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::session::{ClientSession, EnqueueOutcome};

/// Proof of registration, used to unregister.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    id: SessionId,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

/// Outcome of one [`EventBroadcaster::broadcast`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Live sessions in the registry snapshot.
    pub recipients: usize,
    /// Enqueued without evicting anything.
    pub delivered: usize,
    /// Enqueued after evicting the session's oldest envelope.
    pub dropped: usize,
    /// Session was closing and rejected the envelope.
    pub skipped: usize,
}

/// Registry of sessions plus the serialize-once fan-out.
///
/// The registry holds only `Weak` references; each session is owned by its
/// connection task. `broadcast` is synchronous and never blocks on a client.
pub struct EventBroadcaster {
    sessions: RwLock<HashMap<SessionId, Weak<ClientSession>>>,
    metrics: Arc<MetricsCollector>,
}

impl EventBroadcaster {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn register(&self, session: &Arc<ClientSession>) -> SessionHandle {
        let mut sessions = self.sessions.write();
        let _ = sessions.insert(session.id().clone(), Arc::downgrade(session));
        self.record_registered(sessions.len());
        debug!(session_id = %session.id(), "session registered");
        SessionHandle {
            id: session.id().clone(),
        }
    }

    /// Register unless `limit` sessions are already present.
    pub fn try_register(&self, session: &Arc<ClientSession>, limit: usize) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= limit {
            return None;
        }
        let _ = sessions.insert(session.id().clone(), Arc::downgrade(session));
        self.record_registered(sessions.len());
        debug!(session_id = %session.id(), "session registered");
        Some(SessionHandle {
            id: session.id().clone(),
        })
    }

    fn record_registered(&self, count: usize) {
        self.metrics.counter_inc(names::SESSIONS_OPENED_TOTAL, &[], 1);
        self.metrics
            .gauge_set(names::SESSIONS_CONNECTED, &[], count as f64);
    }

    /// Remove a session. Idempotent; returns whether it was present.
    pub fn unregister(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(&handle.id).is_some();
        if removed {
            self.metrics
                .gauge_set(names::SESSIONS_CONNECTED, &[], sessions.len() as f64);
            debug!(session_id = %handle.id, "session unregistered");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Serialize `event` once and offer it to every registered session.
    pub fn broadcast(&self, event: &DomainEvent) -> BroadcastReport {
        let kind = event.kind();
        self.metrics
            .counter_inc(names::EVENTS_BROADCAST_TOTAL, &[("type", kind.as_str())], 1);

        let envelope: Arc<str> = match event.to_wire() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(event_type = %kind, error = %e, "failed to serialize event");
                return BroadcastReport::default();
            }
        };

        let mut dead = Vec::new();
        let live: Vec<Arc<ClientSession>> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter_map(|(id, weak)| {
                    let upgraded = weak.upgrade();
                    if upgraded.is_none() {
                        dead.push(id.clone());
                    }
                    upgraded
                })
                .collect()
        };
        if !dead.is_empty() {
            self.prune(&dead);
        }

        let mut report = BroadcastReport {
            recipients: live.len(),
            ..BroadcastReport::default()
        };
        for session in &live {
            match session.enqueue(envelope.clone()) {
                EnqueueOutcome::Enqueued => report.delivered += 1,
                EnqueueOutcome::DroppedOldest => {
                    report.dropped += 1;
                    self.metrics
                        .counter_inc(names::ENVELOPES_DROPPED_TOTAL, &[], 1);
                    debug!(
                        session_id = %session.id(),
                        dropped_total = session.dropped_count(),
                        "session queue full, dropped oldest envelope"
                    );
                }
                EnqueueOutcome::Rejected => report.skipped += 1,
            }
        }

        debug!(
            event_type = %kind,
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            skipped = report.skipped,
            "broadcast event"
        );
        report
    }

    pub fn broadcast_chat(&self, player_name: &str, message: &str) -> BroadcastReport {
        self.broadcast(&DomainEvent::ChatMessage {
            player_name: player_name.to_owned(),
            message: message.to_owned(),
            timestamp: now_millis(),
        })
    }

    pub fn broadcast_join(&self, player_name: &str, player_id: &str) -> BroadcastReport {
        self.broadcast(&DomainEvent::PlayerJoin {
            player_name: player_name.to_owned(),
            player_id: player_id.to_owned(),
            timestamp: now_millis(),
        })
    }

    pub fn broadcast_leave(&self, player_name: &str, player_id: &str) -> BroadcastReport {
        self.broadcast(&DomainEvent::PlayerLeave {
            player_name: player_name.to_owned(),
            player_id: player_id.to_owned(),
            timestamp: now_millis(),
        })
    }

    /// Drop entries whose session has been freed without unregistering.
    fn prune(&self, ids: &[SessionId]) {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        for id in ids {
            if sessions.get(id).is_some_and(|w| w.strong_count() == 0) {
                let _ = sessions.remove(id);
            }
        }
        if sessions.len() != before {
            self.metrics
                .gauge_set(names::SESSIONS_CONNECTED, &[], sessions.len() as f64);
            debug!(pruned = before - sessions.len(), "pruned dead sessions");
        }
    }
}

impl EventSink for EventBroadcaster {
    fn publish(&self, event: &DomainEvent) {
        let _ = self.broadcast(event);
    }
}
