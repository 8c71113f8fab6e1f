use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub name: String,
    pub id: String,
    pub world: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    pub name: String,
    pub player_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    pub name: String,
    pub version: String,
    pub online_players: u32,
    pub max_players: u32,
    pub uptime_secs: u64,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The host is not ready to answer (still starting, or shutting down).
    #[error("snapshot unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot query failed: {0}")]
    Failed(String),
}

impl SnapshotError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Failed(_) => "failed",
        }
    }
}

/// Point-in-time host state served by the REST endpoints.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn players(&self) -> Result<Vec<PlayerSnapshot>, SnapshotError>;
    async fn worlds(&self) -> Result<Vec<WorldSnapshot>, SnapshotError>;
    async fn server_info(&self) -> Result<ServerSnapshot, SnapshotError>;
}

/// Snapshot provider backed by values pushed in by the host.
pub struct InMemorySnapshotProvider {
    players: RwLock<Vec<PlayerSnapshot>>,
    worlds: RwLock<Vec<WorldSnapshot>>,
    server: RwLock<ServerSnapshot>,
}

impl InMemorySnapshotProvider {
    pub fn new(server: ServerSnapshot) -> Self {
        Self {
            players: RwLock::new(Vec::new()),
            worlds: RwLock::new(Vec::new()),
            server: RwLock::new(server),
        }
    }

    pub fn set_players(&self, players: Vec<PlayerSnapshot>) {
        let online = players.len() as u32;
        *self.players.write() = players;
        self.server.write().online_players = online;
    }

    pub fn set_worlds(&self, worlds: Vec<WorldSnapshot>) {
        *self.worlds.write() = worlds;
    }

    pub fn set_server(&self, server: ServerSnapshot) {
        *self.server.write() = server;
    }
}

#[async_trait]
impl SnapshotProvider for InMemorySnapshotProvider {
    async fn players(&self) -> Result<Vec<PlayerSnapshot>, SnapshotError> {
        Ok(self.players.read().clone())
    }

    async fn worlds(&self) -> Result<Vec<WorldSnapshot>, SnapshotError> {
        Ok(self.worlds.read().clone())
    }

    async fn server_info(&self) -> Result<ServerSnapshot, SnapshotError> {
        Ok(self.server.read().clone())
    }
}
