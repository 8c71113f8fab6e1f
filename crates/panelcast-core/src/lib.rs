//! Domain types shared by the panelcast crates.
//!
//! - [`events`]: the closed set of game events and their wire envelope
//! - [`extract`]: defensive text extraction from opaque host payloads
//! - [`adapter`]: the single boundary where host events become [`events::DomainEvent`]s
//! - [`snapshot`]: point-in-time state served over REST

pub mod adapter;
pub mod events;
pub mod extract;
pub mod ids;
pub mod snapshot;

pub use adapter::{EventAdapter, EventSink, HostEvent, HostPlayer};
pub use events::{DomainEvent, EventKind};
pub use extract::{extract, extract_message, extract_name, PayloadValue, ProbeError};
pub use ids::SessionId;
pub use snapshot::{
    InMemorySnapshotProvider, PlayerSnapshot, ServerSnapshot, SnapshotError, SnapshotProvider,
    WorldSnapshot,
};
