//! Realtime connection registry
//!
//! Tracks every open socket, keyed by a server-assigned connection id.
//! Each entry holds the sending half of that socket's bounded outbound queue.
//! Sends never wait: a full or closed queue drops the entry, and dropping the
//! sender ends the socket's writer task.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::messages::ServerMessage;

/// Server-assigned id of one socket
pub type ConnectionId = Uuid;

/// Who a connection speaks for, once `hello` succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated {
        listener_id: Uuid,
        device_id: String,
        app: Option<String>,
    },
}

/// One registered socket
#[derive(Debug)]
pub struct ConnectionEntry {
    sender: mpsc::Sender<ServerMessage>,
    pub state: ConnectionState,
    /// When this connection was established (Unix timestamp ms)
    pub connected_at: i64,
    /// Last inbound activity (Unix timestamp ms)
    last_seen: Arc<AtomicI64>,
}

impl ConnectionEntry {
    fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            sender,
            state: ConnectionState::Unauthenticated,
            connected_at: now,
            last_seen: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    pub fn listener_id(&self) -> Option<Uuid> {
        match &self.state {
            ConnectionState::Authenticated { listener_id, .. } => Some(*listener_id),
            ConnectionState::Unauthenticated => None,
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Authenticated { device_id, .. } => Some(device_id.as_str()),
            ConnectionState::Unauthenticated => None,
        }
    }
}

/// Identity snapshot of an authenticated connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub listener_id: Uuid,
    pub device_id: String,
    pub app: Option<String>,
}

/// Error type for send operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection not found")]
    NotFound,
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

/// Registry of all open realtime connections
///
/// Cheap to clone; all clones share one table.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    queue_capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ConnectionRegistry {
    /// Create a registry whose per-connection queues hold `queue_capacity` messages
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Outbound queue for a new socket, sized for this registry
    pub fn channel(&self) -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(self.queue_capacity)
    }

    /// Register a new, unauthenticated connection
    pub fn register(&self, sender: mpsc::Sender<ServerMessage>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(id, ConnectionEntry::new(sender));
        tracing::debug!(connection_id = %id, total = self.connections.len(), "Connection registered");
        id
    }

    /// Bind a connection to a listener and device
    ///
    /// Returns `false` if the connection is gone, or if it is already bound to
    /// a different listener.
    pub fn authenticate(
        &self,
        connection_id: ConnectionId,
        listener_id: Uuid,
        device_id: String,
        app: Option<String>,
    ) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return false;
        };

        if let Some(bound) = entry.listener_id() {
            if bound != listener_id {
                return false;
            }
        }

        tracing::debug!(
            connection_id = %connection_id,
            listener_id = %listener_id,
            device_id = %device_id,
            "Connection authenticated"
        );

        entry.state = ConnectionState::Authenticated {
            listener_id,
            device_id,
            app,
        };
        true
    }

    /// Remove a connection
    pub fn remove(&self, connection_id: ConnectionId) -> bool {
        let removed = self.connections.remove(&connection_id).is_some();
        if removed {
            tracing::debug!(connection_id = %connection_id, "Connection removed");
        }
        removed
    }

    /// Record inbound activity
    pub fn touch(&self, connection_id: ConnectionId) -> bool {
        match self.connections.get(&connection_id) {
            Some(entry) => {
                entry
                    .last_seen
                    .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Shared last-seen clock of a connection, for its writer task
    pub fn last_seen_handle(&self, connection_id: ConnectionId) -> Option<Arc<AtomicI64>> {
        self.connections
            .get(&connection_id)
            .map(|e| Arc::clone(&e.last_seen))
    }

    pub fn info(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let entry = self.connections.get(&connection_id)?;
        match &entry.state {
            ConnectionState::Authenticated {
                listener_id,
                device_id,
                app,
            } => Some(ConnectionInfo {
                connection_id,
                listener_id: *listener_id,
                device_id: device_id.clone(),
                app: app.clone(),
            }),
            ConnectionState::Unauthenticated => None,
        }
    }

    pub fn is_authenticated(&self, connection_id: ConnectionId) -> bool {
        self.info(connection_id).is_some()
    }

    /// Queue a message on one connection without waiting
    ///
    /// A full or closed queue removes the connection.
    pub fn send_to_connection(
        &self,
        connection_id: ConnectionId,
        msg: ServerMessage,
    ) -> Result<(), SendError> {
        let result = {
            let entry = self
                .connections
                .get(&connection_id)
                .ok_or(SendError::NotFound)?;
            entry.sender.try_send(msg)
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %connection_id, "Outbound queue full, dropping connection");
                self.remove(connection_id);
                Err(SendError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.remove(connection_id);
                Err(SendError::Closed)
            }
        }
    }

    /// Authenticated connections of one listener
    pub fn connections_for_listener(&self, listener_id: Uuid) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .filter_map(|e| match &e.state {
                ConnectionState::Authenticated {
                    listener_id: owner,
                    device_id,
                    app,
                } if *owner == listener_id => Some(ConnectionInfo {
                    connection_id: *e.key(),
                    listener_id,
                    device_id: device_id.clone(),
                    app: app.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Device ids with at least one live connection for this listener
    pub fn online_devices(&self, listener_id: Uuid) -> Vec<String> {
        let mut devices: Vec<String> = self
            .connections_for_listener(listener_id)
            .into_iter()
            .map(|c| c.device_id)
            .collect();
        devices.sort();
        devices.dedup();
        devices
    }

    /// Get total number of connections, authenticated or not
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn listener_connection_count(&self, listener_id: Uuid) -> usize {
        self.connections
            .iter()
            .filter(|e| e.listener_id() == Some(listener_id))
            .count()
    }

    /// Drop connections idle longer than `max_idle` or whose writer is gone
    pub fn sweep_stale(&self, max_idle: Duration) -> usize {
        let cutoff = chrono::Utc::now().timestamp_millis() - max_idle.as_millis() as i64;
        let before = self.connections.len();

        self.connections.retain(|id, entry| {
            let keep = entry.last_seen() >= cutoff && !entry.sender.is_closed();
            if !keep {
                tracing::debug!(connection_id = %id, "Removed stale connection");
            }
            keep
        });

        before.saturating_sub(self.connections.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(4)
    }

    #[test]
    fn test_register_and_remove() {
        let registry = registry();
        let (tx, _rx) = registry.channel();

        let id = registry.register(tx);
        assert_eq!(registry.connection_count(), 1);
        assert!(!registry.is_authenticated(id));

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_authenticate_binds_identity() {
        let registry = registry();
        let listener = Uuid::new_v4();
        let (tx, _rx) = registry.channel();
        let id = registry.register(tx);

        assert!(registry.authenticate(id, listener, "phone".into(), Some("ios".into())));
        let info = registry.info(id).unwrap();
        assert_eq!(info.listener_id, listener);
        assert_eq!(info.device_id, "phone");

        // Re-binding the device for the same listener is allowed
        assert!(registry.authenticate(id, listener, "tablet".into(), None));
        assert_eq!(registry.info(id).unwrap().device_id, "tablet");

        // Another listener cannot take over the connection
        assert!(!registry.authenticate(id, Uuid::new_v4(), "x".into(), None));
        assert_eq!(registry.info(id).unwrap().listener_id, listener);

        assert!(!registry.authenticate(Uuid::new_v4(), listener, "x".into(), None));
    }

    #[test]
    fn test_connections_for_listener_skips_others() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (tx1, _rx1) = registry.channel();
        let (tx2, _rx2) = registry.channel();
        let (tx3, _rx3) = registry.channel();
        let a = registry.register(tx1);
        let b = registry.register(tx2);
        let _unauth = registry.register(tx3);

        registry.authenticate(a, alice, "phone".into(), None);
        registry.authenticate(b, bob, "desk".into(), None);

        let conns = registry.connections_for_listener(alice);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].connection_id, a);
        assert_eq!(registry.listener_connection_count(alice), 1);
        assert_eq!(registry.online_devices(bob), vec!["desk".to_string()]);
        assert_eq!(registry.connection_count(), 3);
    }

    #[test]
    fn test_full_queue_prunes_connection() {
        let registry = ConnectionRegistry::new(1);
        let (tx, _rx) = registry.channel();
        let id = registry.register(tx);

        assert!(registry.send_to_connection(id, ServerMessage::pong()).is_ok());
        assert_eq!(
            registry.send_to_connection(id, ServerMessage::pong()),
            Err(SendError::QueueFull)
        );
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(
            registry.send_to_connection(id, ServerMessage::pong()),
            Err(SendError::NotFound)
        );
    }

    #[test]
    fn test_closed_receiver_prunes_connection() {
        let registry = registry();
        let (tx, rx) = registry.channel();
        let id = registry.register(tx);
        drop(rx);

        assert_eq!(
            registry.send_to_connection(id, ServerMessage::pong()),
            Err(SendError::Closed)
        );
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_sweep_stale() {
        let registry = registry();
        let (tx1, _rx1) = registry.channel();
        let (tx2, rx2) = registry.channel();
        let (tx3, _rx3) = registry.channel();
        let fresh = registry.register(tx1);
        let _closed = registry.register(tx2);
        let idle = registry.register(tx3);
        drop(rx2);

        registry
            .last_seen_handle(idle)
            .unwrap()
            .store(chrono::Utc::now().timestamp_millis() - 120_000, Ordering::Relaxed);

        assert_eq!(registry.sweep_stale(Duration::from_secs(60)), 2);
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.touch(fresh));
        assert!(!registry.touch(idle));
    }
}
