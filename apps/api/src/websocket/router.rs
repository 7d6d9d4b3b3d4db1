//! Fan-out of server messages to a listener's connections

use thiserror::Error;
use uuid::Uuid;

use super::connection::{ConnectionId, ConnectionRegistry};
use super::messages::ServerMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No live connection matched the target device
    #[error("no active device")]
    NoActiveDevice,
}

/// Delivers messages to subsets of one listener's authenticated connections
///
/// Delivery is best effort: a connection whose queue is full or closed is
/// pruned by the registry and skipped.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: ConnectionRegistry,
}

impl BroadcastRouter {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Send to every connection of `listener_id` except `exclude`
    ///
    /// Returns how many connections accepted the message.
    pub fn broadcast_to_listener(
        &self,
        listener_id: Uuid,
        msg: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let targets = self
            .registry
            .connections_for_listener(listener_id)
            .into_iter()
            .filter(|c| Some(c.connection_id) != exclude)
            .map(|c| c.connection_id);

        self.deliver(targets, msg)
    }

    /// Send to every connection of `listener_id` not belonging to `origin_device_id`
    pub fn broadcast_from_device(
        &self,
        listener_id: Uuid,
        msg: &ServerMessage,
        origin_device_id: &str,
    ) -> usize {
        let targets = self
            .registry
            .connections_for_listener(listener_id)
            .into_iter()
            .filter(|c| c.device_id != origin_device_id)
            .map(|c| c.connection_id);

        self.deliver(targets, msg)
    }

    /// Send to every connection of one device
    ///
    /// Nothing is sent when the device has no connection.
    pub fn route_to_device(
        &self,
        listener_id: Uuid,
        device_id: &str,
        msg: &ServerMessage,
    ) -> Result<usize, RouteError> {
        let targets: Vec<ConnectionId> = self
            .registry
            .connections_for_listener(listener_id)
            .into_iter()
            .filter(|c| c.device_id == device_id)
            .map(|c| c.connection_id)
            .collect();

        if targets.is_empty() {
            tracing::debug!(listener_id = %listener_id, device_id = %device_id, "No connection for target device");
            return Err(RouteError::NoActiveDevice);
        }

        Ok(self.deliver(targets, msg))
    }

    fn deliver(&self, targets: impl IntoIterator<Item = ConnectionId>, msg: &ServerMessage) -> usize {
        targets
            .into_iter()
            .filter(|id| self.registry.send_to_connection(*id, msg.clone()).is_ok())
            .count()
    }
}
