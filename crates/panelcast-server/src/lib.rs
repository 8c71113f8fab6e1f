//! HTTP + WebSocket serving for the game panel.
//!
//! - [`broadcast`]: session registry and serialize-once event fan-out
//! - [`session`]: per-connection queue, lifecycle and socket loops
//! - [`server`]: axum router, listener and graceful shutdown
//! - [`rest`]: snapshot endpoints backed by a [`panelcast_core::SnapshotProvider`]

pub mod broadcast;
pub mod config;
pub mod health;
pub mod rest;
pub mod server;
pub mod session;
pub mod shutdown;

pub use broadcast::{BroadcastReport, EventBroadcaster, SessionHandle};
pub use config::{ConfigError, ServerConfig};
pub use server::{PanelServer, ServerError, ServerHandle};
pub use session::{ClientSession, CloseReason, EnqueueOutcome, SessionState};
