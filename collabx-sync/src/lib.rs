//! # collabx-sync — Networking for CollabX
//!
//! WebSocket transport for document sessions, the task that drives a
//! session, and the relay that connects peers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    WebSocket     ┌─────────────┐    WebSocket     ┌───────────────┐
//! │ SessionRunner │ ◄──────────────► │ RelayServer │ ◄──────────────► │ SessionRunner │
//! │  + Transport- │   /ws/{doc_id}   │             │   /ws/{doc_id}   │  + Transport- │
//! │    Channel    │   binary frames  └──────┬──────┘   binary frames  │    Channel    │
//! └───────┬───────┘                         │                         └───────┬───────┘
//!         │                          ┌──────┴──────┐                          │
//!         ▼                          │ RoomManager │                          ▼
//! ┌───────────────┐                  │ (fan-out)   │                  ┌───────────────┐
//! │DocumentSession│                  └─────────────┘                  │DocumentSession│
//! └───────────────┘                                                   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`channel`] — Reconnecting WebSocket transport
//! - [`backoff`] — Reconnect delay schedule
//! - [`scheduled`] — Cancellable delayed tasks
//! - [`runner`] — Session event loop, UI commands and events
//! - [`broadcast`] — Room-based fan-out with backpressure
//! - [`relay`] — WebSocket relay server
//! - [`config`] — Client and relay settings

pub mod backoff;
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod relay;
pub mod runner;
pub mod scheduled;

// Re-exports for convenience
pub use backoff::{Backoff, ReconnectPolicy};
pub use broadcast::{BroadcastGroup, BroadcastStats, Join, RelayedFrame, RoomManager};
pub use channel::{TransportChannel, TransportError};
pub use config::{ClientConfig, ConfigError, RelayConfig};
pub use relay::{RelayError, RelayServer, RelayStats};
pub use runner::{
    MirrorWidget, SessionCommand, SessionError, SessionEvent, SessionHandle, SessionRunner,
    SpawnedSession,
};
pub use scheduled::ScheduledTask;
