//! Session runner: the one task that owns a [`DocumentSession`].
//!
//! ```text
//!  UI ── SessionCommand ──►┐
//!                          │
//!  channel ── Inbound ────►├── select! ──► DocumentSession ──► TransportChannel
//!                          │                    │
//!  channel ── state ──────►┘                    └──► SessionEvent ──► UI
//! ```
//!
//! The UI never touches the document. It sends commands and renders the
//! events it gets back. Transport callbacks only push into an ordered
//! channel, so the open notification of a connection is always handled
//! before that connection's first message.

use std::collections::VecDeque;
use std::ops::Range;

use collabx_core::{
    ConnectionState, DocumentSession, SharedDocument, TextTarget, TextWidget, ZoneError, ZoneId,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::channel::TransportChannel;
use crate::config::{ClientConfig, ConfigError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Messages from the UI.
#[derive(Debug)]
pub enum SessionCommand {
    /// The user edited a widget. `revision` is the revision of the last
    /// [`SessionEvent::Render`] the widget showed.
    Input {
        target: TextTarget,
        text: String,
        cursor: usize,
        revision: u64,
    },
    /// Caret moved without an edit.
    Select { target: TextTarget, cursor: usize },
    /// Fork a char range of the main text into a new zone.
    CreateZone {
        range: Range<usize>,
        reply: oneshot::Sender<Result<ZoneId, ZoneError>>,
    },
    RemoveZone {
        zone_id: ZoneId,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    /// Start rendering a zone.
    OpenZone { zone_id: ZoneId },
    CloseZone { zone_id: ZoneId },
    Connect,
    Disconnect,
    Shutdown,
}

/// Messages to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Show `text` in the widget for `target`.
    Render {
        target: TextTarget,
        text: String,
        cursor: usize,
        revision: u64,
    },
    /// Zone membership changed; ids sorted.
    ZonesChanged(Vec<ZoneId>),
    Status(ConnectionState),
}

enum Inbound {
    Opened,
    Message(Vec<u8>),
}

/// Renders whose text is remembered for late input.
const RENDER_HISTORY: usize = 32;

/// How an `Input` relates to what the runner last rendered.
#[derive(Debug, PartialEq, Eq)]
enum Recorded {
    /// Typed against the latest render; the mirror now holds the input.
    Current,
    /// Typed against an older render that showed `base`.
    Stale { base: String, typed: String },
    /// Typed against a render too old to remember.
    Expired,
}

/// The runner's view of one UI widget.
///
/// Programmatic refreshes become [`SessionEvent::Render`]s, each with a new
/// revision. The mirror remembers what the UI showed at each recent
/// revision, so input typed before a render reached the UI can still be
/// replayed.
pub struct MirrorWidget {
    target: TextTarget,
    text: String,
    cursor: usize,
    revision: u64,
    /// (revision, text the UI shows at that revision), oldest first
    shown: VecDeque<(u64, String)>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl MirrorWidget {
    fn new(target: TextTarget, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            target,
            text: String::new(),
            cursor: 0,
            revision: 0,
            shown: VecDeque::from([(0, String::new())]),
            events,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Take over what the user typed against render `revision`.
    fn record_input(&mut self, text: String, cursor: usize, revision: u64) -> Recorded {
        let Some((_, shown)) = self.shown.iter_mut().find(|(r, _)| *r == revision) else {
            return Recorded::Expired;
        };
        let base = std::mem::replace(shown, text.clone());

        if revision == self.revision {
            self.text = text;
            self.cursor = cursor;
            Recorded::Current
        } else {
            Recorded::Stale { base, typed: text }
        }
    }

    fn render(&mut self) {
        self.revision += 1;
        self.shown.push_back((self.revision, self.text.clone()));
        if self.shown.len() > RENDER_HISTORY {
            self.shown.pop_front();
        }
        let _ = self.events.send(SessionEvent::Render {
            target: self.target.clone(),
            text: self.text.clone(),
            cursor: self.cursor,
            revision: self.revision,
        });
    }
}

impl TextWidget for MirrorWidget {
    fn text(&self) -> &str {
        &self.text
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    fn refresh(&mut self, text: &str, cursor: usize) {
        self.text = text.to_string();
        self.cursor = cursor;
        self.render();
    }
}

/// UI-facing handle. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn input(
        &self,
        target: TextTarget,
        text: impl Into<String>,
        cursor: usize,
        revision: u64,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Input {
            target,
            text: text.into(),
            cursor,
            revision,
        })
        .await
    }

    pub async fn select(&self, target: TextTarget, cursor: usize) -> Result<(), SessionError> {
        self.send(SessionCommand::Select { target, cursor }).await
    }

    pub async fn create_zone(&self, range: Range<usize>) -> Result<ZoneId, SessionError> {
        let (reply, result) = oneshot::channel();
        self.send(SessionCommand::CreateZone { range, reply }).await?;
        Ok(result.await.map_err(|_| SessionError::Closed)??)
    }

    pub async fn remove_zone(&self, zone_id: ZoneId) -> Result<(), SessionError> {
        let (reply, result) = oneshot::channel();
        self.send(SessionCommand::RemoveZone { zone_id, reply }).await?;
        Ok(result.await.map_err(|_| SessionError::Closed)??)
    }

    pub async fn open_zone(&self, zone_id: ZoneId) -> Result<(), SessionError> {
        self.send(SessionCommand::OpenZone { zone_id }).await
    }

    pub async fn close_zone(&self, zone_id: ZoneId) -> Result<(), SessionError> {
        self.send(SessionCommand::CloseZone { zone_id }).await
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }
}

/// Handle, event stream and task of a spawned [`SessionRunner`].
pub type SpawnedSession = (
    SessionHandle,
    mpsc::UnboundedReceiver<SessionEvent>,
    JoinHandle<()>,
);

/// Owns the session and processes everything that touches it, in order.
pub struct SessionRunner {
    session: DocumentSession<TransportChannel, MirrorWidget>,
    channel: TransportChannel,
    commands: mpsc::Receiver<SessionCommand>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    status: watch::Receiver<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionRunner {
    /// Build a runner for `document_id`. Nothing connects until
    /// [`SessionHandle::connect`].
    pub fn new(
        document_id: &str,
        config: &ClientConfig,
    ) -> Result<(Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        config.validate()?;

        let (command_tx, commands) = mpsc::channel(config.command_buffer);
        let (events, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let channel = TransportChannel::new(
            config.document_url(document_id),
            config.reconnect.clone(),
        );
        let opened = inbound_tx.clone();
        channel.on_open(move || {
            let _ = opened.send(Inbound::Opened);
        });
        channel.on_message(move |bytes| {
            let _ = inbound_tx.send(Inbound::Message(bytes));
        });
        let status = channel.subscribe_state();

        let main = MirrorWidget::new(TextTarget::Main, events.clone());
        let mut session =
            DocumentSession::new(SharedDocument::new(document_id), channel.clone(), main);
        let zone_events = events.clone();
        session.on_zones_changed(move |ids| {
            let _ = zone_events.send(SessionEvent::ZonesChanged(ids.to_vec()));
        });

        let runner = Self {
            session,
            channel,
            commands,
            inbound,
            status,
            events,
        };
        Ok((runner, SessionHandle { commands: command_tx }, event_rx))
    }

    /// Build a runner and spawn it on the current runtime.
    pub fn spawn(
        document_id: &str,
        config: &ClientConfig,
    ) -> Result<SpawnedSession, SessionError> {
        let (runner, handle, events) = Self::new(document_id, config)?;
        let task = tokio::spawn(runner.run());
        Ok((handle, events, task))
    }

    pub async fn run(mut self) {
        let initial = *self.status.borrow_and_update();
        let _ = self.events.send(SessionEvent::Status(initial));

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                Some(inbound) = self.inbound.recv() => match inbound {
                    Inbound::Opened => self.session.on_connected(),
                    Inbound::Message(bytes) => {
                        self.session.receive(&bytes);
                    }
                },

                Ok(()) = self.status.changed() => {
                    let state = *self.status.borrow_and_update();
                    log::debug!("Connection state of {}: {state:?}", self.session.document().id());
                    let _ = self.events.send(SessionEvent::Status(state));
                }
            }
        }

        self.channel.disconnect();
        log::info!("Session for {} stopped", self.session.document().id());
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Input {
                target,
                text,
                cursor,
                revision,
            } => {
                let Some(widget) = self.session.widget_mut(&target) else {
                    log::warn!("Input for {target}, which has no open widget");
                    return;
                };
                let result = match widget.record_input(text, cursor, revision) {
                    Recorded::Current => self.session.handle_input(&target),
                    Recorded::Stale { base, typed } => {
                        log::debug!(
                            "Rebasing input for {target} typed against revision {revision}"
                        );
                        self.session.handle_stale_input(&target, &base, &typed)
                    }
                    Recorded::Expired => {
                        log::warn!("Dropping input for {target}: revision {revision} is too old");
                        return;
                    }
                };
                if let Err(e) = result {
                    log::warn!("Input for {target} rejected: {e}");
                }
            }

            SessionCommand::Select { target, cursor } => {
                self.session.handle_select(&target, cursor);
            }

            SessionCommand::CreateZone { range, reply } => {
                let _ = reply.send(self.session.create_zone(range));
            }

            SessionCommand::RemoveZone { zone_id, reply } => {
                let _ = reply.send(self.session.remove_zone(&zone_id));
            }

            SessionCommand::OpenZone { zone_id } => {
                let target = TextTarget::Zone(zone_id);
                let widget = MirrorWidget::new(target.clone(), self.events.clone());
                if let Err(e) = self.session.attach_widget(target.clone(), widget) {
                    log::warn!("Cannot open {target}: {e}");
                    return;
                }
                // An empty zone was not rendered by the attach
                if let Some(widget) = self.session.widget_mut(&target) {
                    if widget.revision() == 0 {
                        widget.render();
                    }
                }
            }

            SessionCommand::CloseZone { zone_id } => {
                self.session.detach_widget(&TextTarget::Zone(zone_id));
            }

            SessionCommand::Connect => {
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    if let Err(e) = channel.connect().await {
                        log::warn!("Connect to {} failed: {e}", channel.url());
                    }
                });
            }

            SessionCommand::Disconnect => self.channel.disconnect(),

            // handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }
}
