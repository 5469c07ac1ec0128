//! # collabx-core — Client-side sync engine for CollabX
//!
//! Keeps a shared text document (plus forked zones) consistent between a
//! local text widget and any number of peers. Everything here is
//! synchronous and transport-agnostic; the async WebSocket plumbing lives
//! in `collabx-sync`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  input   ┌─────────────────┐  Local update  ┌───────────┐
//! │ TextWidget  │ ───────► │ DocumentSession │ ─────────────► │ Transport │
//! │ (UI)        │ ◄─────── │                 │ ◄───────────── │ (relay)   │
//! └─────────────┘  resync  └────────┬────────┘  Remote frame  └───────────┘
//!                                   │
//!                          ┌────────┴────────┐
//!                          │ SharedDocument  │
//!                          │ (Yrs Doc)       │
//!                          │ + ZoneRegistry  │
//!                          └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`diff`] — Minimal single-edit text diff
//! - [`document`] — Shared CRDT document with origin-tagged transactions
//! - [`zones`] — Zone forking and membership
//! - [`frame`] — Wire frames (bincode, LZ4 for large snapshots)
//! - [`session`] — Widget ⇄ document ⇄ transport wiring
//! - [`transport`] — The transport seam
//! - [`widget`] — The UI seam

pub mod diff;
pub mod document;
pub mod error;
pub mod frame;
pub mod session;
pub mod transport;
pub mod widget;
pub mod zones;

// Re-exports for convenience
pub use diff::{diff, TextEdit};
pub use document::{ChangeEvent, EditOrigin, ObserverId, SharedDocument, TextTarget};
pub use error::{DocumentError, FrameError, ZoneError};
pub use frame::{Frame, FrameKind};
pub use session::DocumentSession;
pub use transport::{ConnectionState, Transport};
pub use widget::{resync, BufferWidget, TextWidget};
pub use zones::{ZoneEntry, ZoneId, ZoneRegistry};
