//! WebSocket relay with room-based document routing.
//!
//! ```text
//! Client A ──┐                              ┌──► Client B
//!             ├── /ws/{doc_id} ── Room ──────┤
//! Client C ──┘    (BroadcastGroup)          └──► Client C
//! ```
//!
//! The relay never decodes frames: every binary message from one member is
//! forwarded verbatim to all other members of the same room. Nothing is
//! stored; a room exists only while it has members. A member that falls so
//! far behind that frames are lost is disconnected, so that its client
//! reconnects and resynchronizes from full state.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{Join, RoomManager};
use crate::config::RelayConfig;

/// Path prefix of document rooms.
pub const ROOM_PATH_PREFIX: &str = "/ws/";

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[from] std::io::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub relayed_frames: u64,
    pub relayed_bytes: u64,
    pub active_rooms: usize,
}

/// The relay server. Clones share rooms and statistics.
#[derive(Clone)]
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(
            config.broadcast_capacity,
            config.max_peers_per_room,
        ));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve until an accept fails.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let relay = self.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), RelayError> {
        let mut doc_id = None;
        let route = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            match room_from_path(request.uri().path()) {
                Some(id) => {
                    doc_id = Some(id.to_string());
                    Ok(response)
                }
                None => {
                    log::warn!("Rejecting {addr}: no room at {}", request.uri().path());
                    let mut rejection = ErrorResponse::new(Some("not found".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            }
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, route).await?;
        let Some(doc_id) = doc_id else {
            return Ok(());
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn_id = Uuid::new_v4();
        let (room, mut relayed) = match self.rooms.join(&doc_id, conn_id, addr).await {
            Join::Joined { room, receiver } => (room, receiver),
            Join::Full => {
                log::warn!("Room {doc_id} is full; closing connection from {addr}");
                let _ = ws_sender.send(Message::Close(None)).await;
                return Ok(());
            }
        };

        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
            s.active_rooms = self.rooms.room_count().await;
        }
        log::info!(
            "{addr} joined room {doc_id} ({} members)",
            room.member_count().await
        );

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = self.stats.write().await;
                                s.relayed_frames += 1;
                                s.relayed_bytes += bytes.len() as u64;
                            }
                            log::debug!("Relaying {} bytes in room {doc_id}", bytes.len());
                            room.broadcast(conn_id, Arc::new(bytes));
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Ok(Message::Text(_))) => {
                            log::debug!("Ignoring text frame from {addr}");
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = relayed.recv() => {
                    match frame {
                        Ok(frame) => {
                            // Don't echo back to sender
                            if frame.sender == conn_id {
                                continue;
                            }
                            let payload = frame.payload.as_ref().clone();
                            if let Err(e) = ws_sender.send(Message::Binary(payload.into())).await {
                                log::warn!("Dropping {addr} from room {doc_id}: {e}");
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            // The member missed updates for good. Closing makes
                            // it reconnect and exchange full state again.
                            log::warn!(
                                "Dropping {addr} from room {doc_id}: lagged by {n} frames"
                            );
                            room.record_dropped(n);
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }

        self.rooms.leave(&doc_id, &conn_id).await;
        let mut s = self.stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = self.rooms.room_count().await;

        Ok(())
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}

/// Document id addressed by a request path `/ws/{doc_id}`.
pub fn room_from_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix(ROOM_PATH_PREFIX)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_from_path() {
        assert_eq!(room_from_path("/ws/notes"), Some("notes"));
        assert_eq!(
            room_from_path("/ws/0b6f3c1e-doc"),
            Some("0b6f3c1e-doc")
        );
        assert_eq!(room_from_path("/ws/"), None);
        assert_eq!(room_from_path("/ws/a/b"), None);
        assert_eq!(room_from_path("/health"), None);
        assert_eq!(room_from_path("/"), None);
    }

    #[test]
    fn test_relay_creation() {
        let relay = RelayServer::with_defaults();
        assert_eq!(relay.bind_addr(), "127.0.0.1:8000");
    }

    #[tokio::test]
    async fn test_relay_stats_initial() {
        let relay = RelayServer::with_defaults();
        let stats = relay.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.relayed_frames, 0);
        assert_eq!(stats.relayed_bytes, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(relay.rooms().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = RelayServer::new(RelayConfig {
            bind_addr: taken.local_addr().unwrap().to_string(),
            ..RelayConfig::default()
        });
        assert!(matches!(relay.run().await, Err(RelayError::Bind { .. })));
    }
}
