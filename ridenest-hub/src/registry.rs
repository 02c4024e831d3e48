use async_trait::async_trait;
use ridenest_core::Identity;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// A pre-encoded JSON frame, shared between every receiver of one broadcast.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Ride(Uuid),
    Group(String),
    /// Driver dashboards waiting for new ride requests.
    Dispatch,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Ride(id) => write!(f, "ride:{}", id),
            ChannelId::Group(id) => write!(f, "group:{}", id),
            ChannelId::Dispatch => f.write_str("dispatch"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DeliveryFailure {
    #[error("Outbound queue full for connection {0}")]
    QueueFull(ConnectionId),
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),
}

/// Sending half of one client connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    outbound: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// A new connection with a bounded outbound queue of `capacity` frames.
    pub fn new(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let handle = Self {
            id: Uuid::new_v4(),
            identity,
            outbound,
        };
        (handle, rx)
    }

    /// Enqueue without waiting. A full queue drops this frame.
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryFailure> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull(self.id),
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed(self.id),
        })
    }
}

/// Channel id -> connection set, plus the reverse index used on disconnect.
///
/// Local today; a pub/sub backed implementation would let several hub processes share
/// channels.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn register(&self, handle: ConnectionHandle);

    /// Drop the connection from every channel. Returns the channels it was in; calling
    /// it again for the same connection returns nothing.
    async fn unregister(&self, connection: ConnectionId) -> Vec<ChannelId>;

    /// `false` when the connection is not registered.
    async fn join(&self, connection: ConnectionId, channel: ChannelId) -> bool;

    async fn leave(&self, connection: ConnectionId, channel: &ChannelId);

    async fn members(&self, channel: &ChannelId) -> Vec<ConnectionHandle>;

    async fn connection(&self, connection: ConnectionId) -> Option<ConnectionHandle>;

    /// Forget a channel and every membership in it.
    async fn close(&self, channel: &ChannelId);

    async fn connection_count(&self) -> usize;

    async fn channel_count(&self) -> usize;
}

#[derive(Default)]
struct Tables {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    channels: HashMap<ChannelId, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<ChannelId>>,
}

impl Tables {
    fn remove_member(&mut self, connection: ConnectionId, channel: &ChannelId) {
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(&connection);
            // Channels exist only while someone is in them
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
    }
}

/// In-process registry. All three tables sit behind one lock so a join can never
/// race a disconnect into a dangling membership.
#[derive(Default, Clone)]
pub struct LocalChannelRegistry {
    tables: Arc<RwLock<Tables>>,
}

impl LocalChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelRegistry for LocalChannelRegistry {
    async fn register(&self, handle: ConnectionHandle) {
        let mut tables = self.tables.write().await;
        tables.memberships.entry(handle.id).or_default();
        tables.connections.insert(handle.id, handle);
    }

    async fn unregister(&self, connection: ConnectionId) -> Vec<ChannelId> {
        let mut tables = self.tables.write().await;
        tables.connections.remove(&connection);

        let channels: Vec<ChannelId> = tables
            .memberships
            .remove(&connection)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for channel in &channels {
            tables.remove_member(connection, channel);
        }
        channels
    }

    async fn join(&self, connection: ConnectionId, channel: ChannelId) -> bool {
        let mut tables = self.tables.write().await;
        if !tables.connections.contains_key(&connection) {
            return false;
        }
        tables.channels.entry(channel.clone()).or_default().insert(connection);
        tables.memberships.entry(connection).or_default().insert(channel);
        true
    }

    async fn leave(&self, connection: ConnectionId, channel: &ChannelId) {
        let mut tables = self.tables.write().await;
        if let Some(set) = tables.memberships.get_mut(&connection) {
            set.remove(channel);
        }
        tables.remove_member(connection, channel);
    }

    async fn members(&self, channel: &ChannelId) -> Vec<ConnectionHandle> {
        let tables = self.tables.read().await;
        tables
            .channels
            .get(channel)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn connection(&self, connection: ConnectionId) -> Option<ConnectionHandle> {
        self.tables.read().await.connections.get(&connection).cloned()
    }

    async fn close(&self, channel: &ChannelId) {
        let mut tables = self.tables.write().await;
        if let Some(members) = tables.channels.remove(channel) {
            for id in members {
                if let Some(set) = tables.memberships.get_mut(&id) {
                    set.remove(channel);
                }
            }
        }
    }

    async fn connection_count(&self) -> usize {
        self.tables.read().await.connections.len()
    }

    async fn channel_count(&self) -> usize {
        self.tables.read().await.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridenest_core::Role;

    fn handle(user: &str) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        ConnectionHandle::new(Identity::new(user, Role::Passenger), 4)
    }

    #[tokio::test]
    async fn test_membership_lifecycle() {
        let registry = LocalChannelRegistry::new();
        let (a, _rx_a) = handle("a");
        let (b, _rx_b) = handle("b");
        registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        let ride = ChannelId::Ride(Uuid::new_v4());
        assert!(registry.join(a.id, ride.clone()).await);
        assert!(registry.join(b.id, ride.clone()).await);
        assert!(registry.join(a.id, ChannelId::Group("hiking".into())).await);
        assert_eq!(registry.members(&ride).await.len(), 2);
        assert_eq!(registry.channel_count().await, 2);

        let left = registry.unregister(a.id).await;
        assert_eq!(left.len(), 2);
        assert_eq!(registry.channel_count().await, 1);

        // Second disconnect is a no-op
        assert!(registry.unregister(a.id).await.is_empty());

        registry.leave(b.id, &ride).await;
        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_connection_cannot_join() {
        let registry = LocalChannelRegistry::new();
        assert!(!registry.join(Uuid::new_v4(), ChannelId::Dispatch).await);
        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_channel() {
        let registry = LocalChannelRegistry::new();
        let (a, _rx) = handle("a");
        registry.register(a.clone()).await;
        let ride = ChannelId::Ride(Uuid::new_v4());
        registry.join(a.id, ride.clone()).await;

        registry.close(&ride).await;
        assert!(registry.members(&ride).await.is_empty());
        assert!(registry.unregister(a.id).await.is_empty());
    }

    #[test]
    fn test_full_queue_reports_drop() {
        let (a, mut rx) = ConnectionHandle::new(Identity::new("a", Role::Driver), 1);
        assert!(a.try_deliver(Frame::from("one")).is_ok());
        assert_eq!(a.try_deliver(Frame::from("two")), Err(DeliveryFailure::QueueFull(a.id)));

        assert_eq!(rx.try_recv().unwrap().as_ref(), "one");
        rx.close();
        assert_eq!(a.try_deliver(Frame::from("three")), Err(DeliveryFailure::Closed(a.id)));
    }
}
