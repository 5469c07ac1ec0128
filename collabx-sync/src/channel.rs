//! WebSocket transport channel: one logical connection per document.
//!
//! ```text
//!             connect()                 open
//!  Disconnected ──────► Connecting ──────────► Connected
//!       ▲                   │                      │
//!       │   error + close   │        close         │
//!       └───────────────────┴──────────────────────┘
//!                 │
//!                 └── retry after backoff (1s, 2s, 4s, 8s, 10s, give up)
//! ```
//!
//! Every connection attempt gets a generation number. Events carrying an
//! older generation (a socket superseded by a newer `connect()`, or one torn
//! down by `disconnect()`) are ignored.
//!
//! An error only rejects a pending `connect()`; it is the close that drives
//! reconnection. A failed handshake is both.

use std::sync::{Arc, Mutex, MutexGuard};

use collabx_core::{ConnectionState, Transport};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::scheduled::ScheduledTask;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("connection closed before it opened")]
    Closed,
    #[error("superseded by a newer connect()")]
    Superseded,
    #[error("channel was disconnected and cannot be reused")]
    Disposed,
}

type MessageHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type OpenHandler = Arc<dyn Fn() + Send + Sync>;
type Waiter = oneshot::Sender<Result<(), TransportError>>;

/// Resilient connection to `<relay_url>/<document_id>`.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    state: watch::Sender<ConnectionState>,
    shared: Mutex<Shared>,
}

struct Shared {
    generation: u64,
    disposed: bool,
    backoff: Backoff,
    /// Feeds the writer of the live connection
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Stops the reader/writer of the live connection
    connection: Option<CancellationToken>,
    /// Caller of a `connect()` still waiting for the open
    pending: Option<Waiter>,
    reconnect: Option<ScheduledTask>,
    on_message: Option<MessageHandler>,
    on_open: Option<OpenHandler>,
}

impl TransportChannel {
    /// A channel for `url`. Nothing happens until [`connect`](Self::connect).
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                state,
                shared: Mutex::new(Shared {
                    generation: 0,
                    disposed: false,
                    backoff: Backoff::new(policy),
                    outgoing: None,
                    connection: None,
                    pending: None,
                    reconnect: None,
                    on_message: None,
                    on_open: None,
                }),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Open the connection.
    ///
    /// Resolves once the socket is open, or with the error that prevented
    /// it. Any earlier pending `connect()` resolves with
    /// [`TransportError::Superseded`] and its socket is dropped. An open
    /// connection is replaced.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (waiter, opened) = oneshot::channel();
        self.inner.start_attempt(Some(waiter))?;
        opened.await.unwrap_or(Err(TransportError::Superseded))
    }

    /// Send one binary frame. Dropped with a warning unless connected.
    pub fn send(&self, bytes: Vec<u8>) {
        let shared = self.inner.shared();
        let connected = *self.inner.state.borrow() == ConnectionState::Connected;
        match shared.outgoing.as_ref() {
            Some(outgoing) if connected => {
                if outgoing.send(bytes).is_err() {
                    log::warn!("Writer for {} is gone; frame dropped", self.inner.url);
                }
            }
            _ => log::warn!(
                "Not connected to {}; dropping {} byte frame",
                self.inner.url,
                bytes.len()
            ),
        }
    }

    /// Handler for every binary frame received, in arrival order.
    ///
    /// Replaces any earlier handler.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.inner.shared().on_message = Some(Arc::new(handler));
    }

    /// Handler called each time a connection opens, before any of its
    /// messages are delivered. Replaces any earlier handler.
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.shared().on_open = Some(Arc::new(handler));
    }

    /// Close the connection for good.
    ///
    /// Cancels any pending retry and disables reconnection. Idempotent.
    pub fn disconnect(&self) {
        let was_disposed = {
            let mut shared = self.inner.shared();
            let was_disposed = shared.disposed;
            shared.disposed = true;
            shared.generation += 1;
            shared.reconnect = None;
            shared.outgoing = None;
            if let Some(connection) = shared.connection.take() {
                connection.cancel();
            }
            if let Some(waiter) = shared.pending.take() {
                let _ = waiter.send(Err(TransportError::Disposed));
            }
            self.inner.state.send_replace(ConnectionState::Disconnected);
            was_disposed
        };

        if !was_disposed {
            log::info!("Disconnected from {}", self.inner.url);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether a retry is currently scheduled.
    pub fn reconnect_pending(&self) -> bool {
        self.inner.shared().reconnect.is_some()
    }
}

impl Transport for TransportChannel {
    fn state(&self) -> ConnectionState {
        TransportChannel::state(self)
    }

    fn send(&self, frame: Vec<u8>) {
        TransportChannel::send(self, frame)
    }
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin a new generation and spawn its connection task.
    ///
    /// `waiter` is `Some` for a caller's `connect()`, `None` for a retry.
    fn start_attempt(self: &Arc<Self>, waiter: Option<Waiter>) -> Result<(), TransportError> {
        let generation = {
            let mut shared = self.shared();
            if shared.disposed {
                return Err(TransportError::Disposed);
            }

            shared.generation += 1;
            shared.reconnect = None;
            shared.outgoing = None;
            if let Some(connection) = shared.connection.take() {
                connection.cancel();
            }
            if waiter.is_some() {
                // An explicit connect() gets a fresh retry budget
                shared.backoff.reset();
            }
            if let Some(previous) = std::mem::replace(&mut shared.pending, waiter) {
                let _ = previous.send(Err(TransportError::Superseded));
            }
            self.state.send_replace(ConnectionState::Connecting);
            shared.generation
        };

        log::info!("Connecting to {} (generation {generation})", self.url);
        tokio::spawn(Arc::clone(self).run_connection(generation));
        Ok(())
    }

    async fn run_connection(self: Arc<Self>, generation: u64) {
        let stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                log::error!("Connection to {} failed: {e}", self.url);
                self.handle_error(
                    generation,
                    TransportError::Connect {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    },
                );
                self.handle_close(generation);
                return;
            }
        };

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let cancel = CancellationToken::new();
        let on_open = {
            let mut shared = self.shared();
            if shared.generation != generation {
                log::debug!("Dropping superseded connection to {}", self.url);
                return;
            }
            shared.outgoing = Some(outgoing);
            shared.connection = Some(cancel.clone());
            shared.backoff.reset();
            self.state.send_replace(ConnectionState::Connected);
            if let Some(waiter) = shared.pending.take() {
                let _ = waiter.send(Ok(()));
            }
            shared.on_open.clone()
        };

        log::info!("Connected to {}", self.url);
        if let Some(on_open) = on_open {
            on_open();
        }

        let (mut writer, mut reader) = stream.split();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = writer.close().await;
                    break;
                }

                frame = outgoing_rx.recv() => match frame {
                    Some(bytes) => {
                        log::debug!("Sending {} byte frame to {}", bytes.len(), self.url);
                        if let Err(e) = writer.send(Message::Binary(bytes.into())).await {
                            log::error!("Send to {} failed: {e}", self.url);
                            break;
                        }
                    }
                    None => break,
                },

                msg = reader.next() => match msg {
                    Some(Ok(Message::Binary(data))) => self.deliver(generation, data.into()),
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection to {} closed", self.url);
                        break;
                    }
                    Some(Ok(Message::Text(_))) => {
                        log::debug!("Ignoring text frame from {}", self.url);
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {}: {e}", self.url);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        self.handle_close(generation);
    }

    fn deliver(&self, generation: u64, bytes: Vec<u8>) {
        let handler = {
            let shared = self.shared();
            if shared.generation != generation {
                return;
            }
            shared.on_message.clone()
        };

        match handler {
            Some(handler) => handler(bytes),
            None => log::debug!("No message handler; dropping {} byte frame", bytes.len()),
        }
    }

    fn handle_error(&self, generation: u64, error: TransportError) {
        let mut shared = self.shared();
        if shared.generation != generation {
            return;
        }
        if let Some(waiter) = shared.pending.take() {
            let _ = waiter.send(Err(error));
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        let mut shared = self.shared();
        if shared.generation != generation {
            return;
        }

        shared.outgoing = None;
        shared.connection = None;
        if let Some(waiter) = shared.pending.take() {
            let _ = waiter.send(Err(TransportError::Closed));
        }
        self.state.send_replace(ConnectionState::Disconnected);

        if shared.disposed {
            return;
        }

        match shared.backoff.next_delay() {
            Some(delay) => {
                log::info!(
                    "Reconnecting to {} in {delay:?} (attempt {}/{})",
                    self.url,
                    shared.backoff.attempt(),
                    shared.backoff.policy().max_attempts
                );
                let inner = Arc::clone(self);
                shared.reconnect = Some(ScheduledTask::after(delay, async move {
                    if let Err(e) = inner.start_attempt(None) {
                        log::debug!("Reconnect to {} skipped: {e}", inner.url);
                    }
                }));
            }
            None => log::warn!(
                "Giving up on {} after {} reconnect attempts",
                self.url,
                shared.backoff.attempt()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// A port nobody listens on.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn unreachable_channel(port: u16, policy: ReconnectPolicy) -> TransportChannel {
        TransportChannel::new(format!("ws://127.0.0.1:{port}/ws/doc"), policy)
    }

    fn quick_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            max_attempts: 2,
        }
    }

    #[test]
    fn test_new_channel_is_disconnected() {
        let channel = TransportChannel::new("ws://127.0.0.1:1/ws/doc", ReconnectPolicy::default());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.url(), "ws://127.0.0.1:1/ws/doc");
        assert!(!channel.reconnect_pending());
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let channel = TransportChannel::new("ws://127.0.0.1:1/ws/doc", ReconnectPolicy::default());
        channel.send(vec![1, 2, 3]);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_handshake_rejects_and_schedules_retry() {
        let port = closed_port().await;
        let slow = ReconnectPolicy {
            base_delay: Duration::from_secs(60),
            ..ReconnectPolicy::default()
        };
        let channel = unreachable_channel(port, slow);

        let result = channel.connect().await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.reconnect_pending());

        channel.disconnect();
    }

    #[tokio::test]
    async fn test_retries_give_up_after_max_attempts() {
        let port = closed_port().await;
        let channel = unreachable_channel(port, quick_policy());
        let _ = channel.connect().await;

        // two retries of at most 20ms each, then nothing
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(!channel.reconnect_pending());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_final() {
        let port = closed_port().await;
        let channel = unreachable_channel(port, quick_policy());
        let _ = channel.connect().await;

        channel.disconnect();
        channel.disconnect();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(!channel.reconnect_pending());
        assert_eq!(channel.connect().await, Err(TransportError::Disposed));
    }

    #[tokio::test]
    async fn test_state_subscription_sees_connecting() {
        let port = closed_port().await;
        let channel = unreachable_channel(port, quick_policy());
        let mut states = channel.subscribe_state();

        let _ = channel.connect().await;
        // Connecting was published before the failure
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
        channel.disconnect();
    }
}
