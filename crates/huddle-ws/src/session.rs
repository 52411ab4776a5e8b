use std::collections::HashSet;
use std::sync::Arc;

use huddle_core::auth::Identity;
use huddle_core::rooms::{ConnectionId, Outbound, Room, RoomRegistry};

/// Per-connection state, owned by the connection's task alone.
pub struct Session {
    pub identity: Identity,
    pub connection_id: ConnectionId,
    rooms: HashSet<Room>,
    outbound: Outbound,
}

impl Session {
    pub fn new(identity: Identity, connection_id: ConnectionId, outbound: Outbound) -> Self {
        Self {
            identity,
            connection_id,
            rooms: HashSet::new(),
            outbound,
        }
    }

    /// Idempotent. Returns `false` if the session was already in `room`.
    pub async fn join(&mut self, registry: &RoomRegistry, room: Room) -> bool {
        if !self.rooms.insert(room) {
            return false;
        }
        registry.join(room, self.connection_id, &self.outbound).await;
        tracing::debug!(user_id = self.identity.id, %room, "joined room");
        true
    }

    /// Room names, sorted for stable output.
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.iter().map(Room::to_string).collect();
        names.sort();
        names
    }

    /// Queue a frame for this connection only. A full queue raises the stall
    /// signal and the frame is dropped.
    pub fn reply(&self, frame: Arc<str>) {
        if !self.outbound.push(frame) {
            tracing::debug!(user_id = self.identity.id, "reply dropped");
        }
    }

    pub async fn leave_all(&mut self, registry: &RoomRegistry) {
        registry
            .leave_all(self.connection_id, self.rooms.drain())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
        }
    }

    #[tokio::test]
    async fn joins_are_idempotent_and_leave_all_empties_the_registry() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = Outbound::channel(4);
        let mut session = Session::new(identity(), registry.next_connection_id(), tx);

        assert!(session.join(&registry, Room::User(1)).await);
        assert!(session.join(&registry, Room::Group(9)).await);
        assert!(!session.join(&registry, Room::Group(9)).await);
        assert_eq!(session.room_names(), ["group:9", "user:1"]);
        assert_eq!(registry.occupancy(Room::Group(9)).await, 1);

        session.leave_all(&registry).await;
        assert!(session.room_names().is_empty());
        assert_eq!(registry.occupancy(Room::User(1)).await, 0);
        assert_eq!(registry.occupancy(Room::Group(9)).await, 0);
    }

    #[tokio::test]
    async fn replies_beyond_the_queue_raise_the_stall_signal() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = Outbound::channel(1);
        let stall = tx.stall_signal();
        let session = Session::new(identity(), registry.next_connection_id(), tx);

        session.reply(Arc::from("a"));
        session.reply(Arc::from("b"));
        tokio::time::timeout(std::time::Duration::from_secs(1), stall.notified())
            .await
            .expect("stall signal");
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert!(rx.try_recv().is_err());
    }
}
