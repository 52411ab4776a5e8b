use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};

/// A multicast destination inside the realtime gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// Personal room of one user; every connection of that user joins it.
    User(i64),
    Group(i64),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{id}"),
            Room::Group(id) => write!(f, "group:{id}"),
        }
    }
}

pub type ConnectionId = u64;

/// Frames a connection may have queued before it counts as stalled.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Sending half of one connection's bounded frame queue.
///
/// A push into a full queue drops the frame and raises the stall signal; the
/// connection task is expected to close the socket when it sees it.
#[derive(Clone)]
pub struct Outbound {
    frames: mpsc::Sender<Arc<str>>,
    stalled: Arc<Notify>,
}

impl Outbound {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (frames, queued) = mpsc::channel(capacity);
        let outbound = Self {
            frames,
            stalled: Arc::new(Notify::new()),
        };
        (outbound, queued)
    }

    /// Queue without waiting. Returns `false` when the frame was dropped.
    pub fn push(&self, frame: Arc<str>) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stalled.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Handle that resolves once a push hit a full queue.
    pub fn stall_signal(&self) -> Arc<Notify> {
        self.stalled.clone()
    }

    fn is_full(&self) -> bool {
        self.frames.capacity() == 0
    }
}

/// Room id -> connections currently in it.
///
/// Every join, leave and broadcast goes through the one lock.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Room, HashMap<ConnectionId, Outbound>>>,
    next_connection: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns `false` if the connection was already in the room.
    pub async fn join(&self, room: Room, connection: ConnectionId, outbound: &Outbound) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room)
            .or_default()
            .insert(connection, outbound.clone())
            .is_none()
    }

    pub async fn leave_all<I>(&self, connection: ConnectionId, joined: I)
    where
        I: IntoIterator<Item = Room>,
    {
        let mut rooms = self.rooms.write().await;
        for room in joined {
            if let Some(members) = rooms.get_mut(&room) {
                members.remove(&connection);
                if members.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
    }

    /// Deliver `frame` to every connection in any of `targets`, at most once
    /// per connection. Returns how many connections it was queued for.
    ///
    /// Connections whose queue is full are evicted from every room.
    pub async fn broadcast(&self, targets: &[Room], frame: Arc<str>) -> usize {
        let mut delivered: HashSet<ConnectionId> = HashSet::new();
        let mut stalled: HashSet<ConnectionId> = HashSet::new();
        {
            let rooms = self.rooms.read().await;
            for room in targets {
                let Some(members) = rooms.get(room) else {
                    continue;
                };
                for (connection, outbound) in members {
                    if delivered.contains(connection) || stalled.contains(connection) {
                        continue;
                    }
                    if outbound.push(frame.clone()) {
                        delivered.insert(*connection);
                    } else if outbound.is_full() {
                        stalled.insert(*connection);
                    }
                }
            }
        }

        if !stalled.is_empty() {
            self.evict(&stalled).await;
        }
        delivered.len()
    }

    async fn evict(&self, connections: &HashSet<ConnectionId>) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.retain(|connection, _| !connections.contains(connection));
            !members.is_empty()
        });
        for connection in connections {
            tracing::warn!(connection, "outbound queue full, evicting connection");
        }
    }

    pub async fn occupancy(&self, room: Room) -> usize {
        self.rooms
            .read()
            .await
            .get(&room)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overlapping_rooms_deliver_once_per_connection() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = Outbound::channel(8);
        let conn = registry.next_connection_id();

        assert!(registry.join(Room::User(1), conn, &tx).await);
        assert!(!registry.join(Room::User(1), conn, &tx).await);
        registry.join(Room::Group(5), conn, &tx).await;

        let sent = registry
            .broadcast(&[Room::User(1), Room::Group(5)], Arc::from("hello"))
            .await;
        assert_eq!(sent, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leaving_drops_empty_rooms() {
        let registry = RoomRegistry::new();
        let (tx_a, _rx_a) = Outbound::channel(8);
        let (tx_b, mut rx_b) = Outbound::channel(8);
        let a = registry.next_connection_id();
        let b = registry.next_connection_id();
        registry.join(Room::Group(5), a, &tx_a).await;
        registry.join(Room::Group(5), b, &tx_b).await;

        registry.leave_all(a, [Room::Group(5)]).await;
        assert_eq!(registry.occupancy(Room::Group(5)).await, 1);
        assert_eq!(registry.broadcast(&[Room::Group(5)], Arc::from("x")).await, 1);
        assert_eq!(rx_b.recv().await.as_deref(), Some("x"));

        registry.leave_all(b, [Room::Group(5)]).await;
        assert_eq!(registry.occupancy(Room::Group(5)).await, 0);
    }

    #[tokio::test]
    async fn stalled_connection_is_evicted_and_signalled() {
        let registry = RoomRegistry::new();
        let (slow, _undrained) = Outbound::channel(2);
        let (fast, mut fast_rx) = Outbound::channel(8);
        let stall = slow.stall_signal();
        let slow_id = registry.next_connection_id();
        let fast_id = registry.next_connection_id();
        registry.join(Room::User(1), slow_id, &slow).await;
        registry.join(Room::Group(1), slow_id, &slow).await;
        registry.join(Room::Group(1), fast_id, &fast).await;

        for _ in 0..2 {
            assert_eq!(registry.broadcast(&[Room::Group(1)], Arc::from("x")).await, 2);
            assert_eq!(fast_rx.recv().await.as_deref(), Some("x"));
        }
        assert_eq!(registry.broadcast(&[Room::Group(1)], Arc::from("y")).await, 1);
        assert_eq!(fast_rx.recv().await.as_deref(), Some("y"));

        tokio::time::timeout(std::time::Duration::from_secs(1), stall.notified())
            .await
            .expect("stall signal");
        assert_eq!(registry.occupancy(Room::Group(1)).await, 1);
        assert_eq!(registry.occupancy(Room::User(1)).await, 0);

        for _ in 0..1_000 {
            registry.broadcast(&[Room::Group(1)], Arc::from("z")).await;
            fast_rx.recv().await;
        }
        assert_eq!(registry.occupancy(Room::Group(1)).await, 1);
    }

    #[test]
    fn room_names() {
        assert_eq!(Room::User(3).to_string(), "user:3");
        assert_eq!(Room::Group(4).to_string(), "group:4");
    }
}
