//! Boundary between host event objects and [`DomainEvent`].

use chrono::Utc;
use tracing::trace;

use crate::events::DomainEvent;
use crate::extract::{extract_message, extract_name, PayloadValue};

/// A player reference as the host hands it over.
pub struct HostPlayer {
    pub name: Box<dyn PayloadValue>,
    pub id: String,
}

impl HostPlayer {
    pub fn new(name: impl PayloadValue + 'static, id: impl Into<String>) -> Self {
        Self {
            name: Box::new(name),
            id: id.into(),
        }
    }
}

/// Events dispatched by the host game server.
pub enum HostEvent {
    PlayerReady(HostPlayer),
    PlayerDisconnect(HostPlayer),
    PlayerChat {
        sender: Box<dyn PayloadValue>,
        content: Box<dyn PayloadValue>,
    },
    /// Anything the panel does not stream.
    Other { kind: String },
}

impl HostEvent {
    pub fn chat(sender: impl PayloadValue + 'static, content: impl PayloadValue + 'static) -> Self {
        Self::PlayerChat {
            sender: Box::new(sender),
            content: Box::new(content),
        }
    }
}

/// Receiver of adapted events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DomainEvent);
}

/// Translates [`HostEvent`]s into [`DomainEvent`]s.
#[derive(Clone, Copy)]
pub struct EventAdapter {
    clock: fn() -> i64,
}

impl EventAdapter {
    pub fn new() -> Self {
        Self { clock: now_millis }
    }

    /// Adapter with a fixed time source.
    pub fn with_clock(clock: fn() -> i64) -> Self {
        Self { clock }
    }

    /// Returns `None` for host events the panel does not stream.
    pub fn adapt(&self, event: &HostEvent) -> Option<DomainEvent> {
        let timestamp = (self.clock)();
        match event {
            HostEvent::PlayerReady(player) => Some(DomainEvent::PlayerJoin {
                player_name: extract_name(player.name.as_ref()),
                player_id: player.id.clone(),
                timestamp,
            }),
            HostEvent::PlayerDisconnect(player) => Some(DomainEvent::PlayerLeave {
                player_name: extract_name(player.name.as_ref()),
                player_id: player.id.clone(),
                timestamp,
            }),
            HostEvent::PlayerChat { sender, content } => Some(DomainEvent::ChatMessage {
                player_name: extract_name(sender.as_ref()),
                message: extract_message(content.as_ref()),
                timestamp,
            }),
            HostEvent::Other { kind } => {
                trace!(kind = %kind, "ignoring host event");
                None
            }
        }
    }

    /// Adapt and publish. Returns whether an event was produced.
    pub fn forward(&self, event: &HostEvent, sink: &dyn EventSink) -> bool {
        match self.adapt(event) {
            Some(domain) => {
                sink.publish(&domain);
                true
            }
            None => false,
        }
    }
}

impl Default for EventAdapter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
