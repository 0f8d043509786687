use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use twofold_types::events::GatewayEvent;

/// Upper bound on rooms one connection may subscribe to. Unchecked joins
/// accept any id, so without a cap a client could grow the registry forever.
pub const MAX_ROOMS_PER_CONNECTION: usize = 1024;

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct Registry {
    /// conn_id -> connection
    connections: HashMap<Uuid, ConnectionEntry>,
    /// room_id -> subscribed conn_ids
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

/// Process-wide registry of live connections and their room subscriptions.
///
/// Uses a blocking lock with no await points inside, so `publish_to_room`
/// can run from within the store's write critical section.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<Registry>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user_id`. Returns (conn_id, receiver).
    pub fn register_connection(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().connections.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Drop a connection and every subscription it holds.
    pub fn unregister_connection(&self, conn_id: Uuid) {
        let mut registry = self.write();
        let Some(entry) = registry.connections.remove(&conn_id) else {
            return;
        };
        debug!(
            "Dropping connection {} of {} with {} rooms",
            conn_id,
            entry.user_id,
            entry.rooms.len()
        );
        for room_id in entry.rooms {
            if let Some(subscribers) = registry.rooms.get_mut(&room_id) {
                subscribers.remove(&conn_id);
                if subscribers.is_empty() {
                    registry.rooms.remove(&room_id);
                }
            }
        }
    }

    /// Subscribe a connection to a room. Returns false if the connection is
    /// not registered or already holds `MAX_ROOMS_PER_CONNECTION` other rooms.
    pub fn join_room(&self, conn_id: Uuid, room_id: Uuid) -> bool {
        let mut guard = self.write();
        let registry = &mut *guard;
        let Some(entry) = registry.connections.get_mut(&conn_id) else {
            return false;
        };
        if entry.rooms.len() >= MAX_ROOMS_PER_CONNECTION && !entry.rooms.contains(&room_id) {
            return false;
        }
        entry.rooms.insert(room_id);
        registry.rooms.entry(room_id).or_default().insert(conn_id);
        true
    }

    /// Deliver an event to every connection subscribed to `room_id`.
    /// Returns how many connections it was queued for.
    pub fn publish_to_room(&self, room_id: Uuid, event: GatewayEvent) -> usize {
        let registry = self.read();
        let Some(subscribers) = registry.rooms.get(&room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for conn_id in subscribers {
            if let Some(entry) = registry.connections.get(conn_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send a targeted event to one connection.
    pub fn send_to_connection(&self, conn_id: Uuid, event: GatewayEvent) -> bool {
        self.read()
            .connections
            .get(&conn_id)
            .is_some_and(|entry| entry.tx.send(event).is_ok())
    }

    /// Remove every subscription to a deleted room.
    pub fn close_room(&self, room_id: Uuid) {
        let mut registry = self.write();
        let Some(subscribers) = registry.rooms.remove(&room_id) else {
            return;
        };
        for conn_id in subscribers {
            if let Some(entry) = registry.connections.get_mut(&conn_id) {
                entry.rooms.remove(&room_id);
            }
        }
    }

    pub fn subscribed_rooms(&self, conn_id: Uuid) -> HashSet<Uuid> {
        self.read()
            .connections
            .get(&conn_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    pub fn room_subscriber_count(&self, room_id: Uuid) -> usize {
        self.read().rooms.get(&room_id).map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
