//! Fan-out of relayed frames to the other members of a room.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each member gets an independent receiver that buffers up to `capacity`
//! frames. Every frame is tagged with the connection that sent it, and a
//! member skips its own frames, so a payload reaches N-1 peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// One binary frame on its way through a room.
#[derive(Debug, Clone)]
pub struct RelayedFrame {
    /// Connection the frame came from
    pub sender: Uuid,
    pub payload: Arc<Vec<u8>>,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub active_members: usize,
}

/// Atomic broadcast stats, so the hot path never takes a lock.
struct AtomicBroadcastStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single document room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<RelayedFrame>,

    /// Connection id → remote address
    members: Arc<RwLock<HashMap<Uuid, SocketAddr>>>,

    /// Frames buffered per receiver
    capacity: usize,

    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    ///
    /// `capacity` determines how many frames can be buffered per member
    /// before a lagging member starts losing frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Add a member. Returns the receiver it consumes frames from.
    pub async fn add_member(
        &self,
        id: Uuid,
        addr: SocketAddr,
    ) -> broadcast::Receiver<RelayedFrame> {
        let mut members = self.members.write().await;
        members.insert(id, addr);
        self.sender.subscribe()
    }

    pub async fn remove_member(&self, id: &Uuid) -> Option<SocketAddr> {
        let mut members = self.members.write().await;
        members.remove(id)
    }

    /// Send `payload` from `sender` to every receiver.
    ///
    /// Returns the number of receivers, the sender's own included.
    pub fn broadcast(&self, sender: Uuid, payload: Arc<Vec<u8>>) -> usize {
        let count = self
            .sender
            .send(RelayedFrame { sender, payload })
            .unwrap_or(0);
        self.atomic_stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging member never saw.
    pub fn record_dropped(&self, frames: u64) {
        self.atomic_stats
            .frames_dropped
            .fetch_add(frames, Ordering::Relaxed);
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn has_member(&self, id: &Uuid) -> bool {
        self.members.read().await.contains_key(id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        let members = self.members.read().await;
        BroadcastStats {
            frames_sent: self.atomic_stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.atomic_stats.frames_dropped.load(Ordering::Relaxed),
            active_members: members.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Outcome of [`RoomManager::join`].
pub enum Join {
    Joined {
        room: Arc<BroadcastGroup>,
        receiver: broadcast::Receiver<RelayedFrame>,
    },
    /// The room already holds the maximum number of members
    Full,
}

/// Maps document ids to broadcast groups.
///
/// Each document gets its own group, so frames never cross rooms.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
    max_members: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize, max_members: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
            max_members,
        }
    }

    /// Add a member to the room for `doc_id`, creating the room if needed.
    ///
    /// Holds the room map lock throughout, so a concurrent
    /// [`leave`](Self::leave) cannot remove the room in between.
    pub async fn join(&self, doc_id: &str, id: Uuid, addr: SocketAddr) -> Join {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(doc_id.to_string())
            .or_insert_with(|| {
                log::info!("Room {doc_id} created");
                Arc::new(BroadcastGroup::new(self.default_capacity))
            })
            .clone();

        if room.member_count().await >= self.max_members {
            return Join::Full;
        }
        let receiver = room.add_member(id, addr).await;
        Join::Joined { room, receiver }
    }

    /// Remove a member. Returns true when this emptied and removed the room.
    pub async fn leave(&self, doc_id: &str, id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(doc_id) else {
            return false;
        };
        room.remove_member(id).await;
        if room.member_count().await == 0 {
            rooms.remove(doc_id);
            log::info!("Room {doc_id} removed (empty)");
            return true;
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Ids of all rooms, sorted.
    pub async fn active_documents(&self) -> Vec<String> {
        let mut docs: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        docs.sort();
        docs
    }
}
