//! What a session needs from its connection to the relay.

use serde::{Deserialize, Serialize};

/// Connection state as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Outbound half of a relay connection.
///
/// `send` is fire-and-forget: frames sent while not connected are dropped,
/// never queued. A reconnecting session resends its full state instead.
pub trait Transport {
    fn state(&self) -> ConnectionState;

    fn send(&self, frame: Vec<u8>);

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
