use serde::{Deserialize, Serialize};

/// Wire tag of a [`DomainEvent`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PlayerJoin,
    PlayerLeave,
    Chat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerJoin => "player_join",
            Self::PlayerLeave => "player_leave",
            Self::Chat => "chat",
        }
    }

    pub fn all() -> [EventKind; 3] {
        [Self::PlayerJoin, Self::PlayerLeave, Self::Chat]
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game activity streamed to panel clients.
///
/// Names and messages are already plain text here; resolution of host
/// payload wrappers happens in [`crate::adapter`] before construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    PlayerJoin {
        player_name: String,
        player_id: String,
        timestamp: i64,
    },
    PlayerLeave {
        player_name: String,
        player_id: String,
        timestamp: i64,
    },
    ChatMessage {
        player_name: String,
        message: String,
        timestamp: i64,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PlayerJoin { .. } => EventKind::PlayerJoin,
            Self::PlayerLeave { .. } => EventKind::PlayerLeave,
            Self::ChatMessage { .. } => EventKind::Chat,
        }
    }

    /// Epoch milliseconds at which the host observed the event.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::PlayerJoin { timestamp, .. }
            | Self::PlayerLeave { timestamp, .. }
            | Self::ChatMessage { timestamp, .. } => *timestamp,
        }
    }

    pub fn player_name(&self) -> &str {
        match self {
            Self::PlayerJoin { player_name, .. }
            | Self::PlayerLeave { player_name, .. }
            | Self::ChatMessage { player_name, .. } => player_name,
        }
    }

    /// Borrowed wire form of this event.
    pub fn envelope(&self) -> Envelope<'_> {
        let data = match self {
            Self::PlayerJoin {
                player_name,
                player_id,
                ..
            }
            | Self::PlayerLeave {
                player_name,
                player_id,
                ..
            } => EnvelopeData::Player {
                player_name,
                player_id,
            },
            Self::ChatMessage {
                player_name,
                message,
                ..
            } => EnvelopeData::Chat {
                player_name,
                message,
            },
        };
        Envelope {
            event_type: self.kind(),
            timestamp: self.timestamp(),
            data,
        }
    }

    /// Serialize to the JSON text sent in a single WebSocket frame.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.envelope())
    }
}

/// `{"type", "timestamp", "data"}` as sent to panel clients.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(rename = "type")]
    pub event_type: EventKind,
    pub timestamp: i64,
    pub data: EnvelopeData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EnvelopeData<'a> {
    #[serde(rename_all = "camelCase")]
    Player {
        player_name: &'a str,
        player_id: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        player_name: &'a str,
        message: &'a str,
    },
}
