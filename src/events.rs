//! Internal event bus: fire-and-forget lifecycle notifications.
//!
//! The hub publishes the dotted-name `agentbus.*` events documented for each
//! component's lifecycle transitions. The transport is a minimal
//! `tokio::sync::broadcast` wrapper; nothing downstream depends on delivery
//! guarantees, so a slow or absent subscriber never affects the publisher.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::domain_types::{AgentId, ConnectionId, MessageId, Protocol};

/// A single published event: a dotted name plus a JSON payload.
#[derive(Debug, Clone)]
pub struct HubEvent {
    /// Dotted event name, e.g. `"agentbus.agent.registered"`.
    pub name: &'static str,
    /// Event-specific payload.
    pub payload: Value,
    /// When the event was published.
    pub at: DateTime<Utc>,
}

impl HubEvent {
    fn new(name: &'static str, payload: Value) -> Self {
        Self { name, payload, at: Utc::now() }
    }

    /// `agentbus.agent.registered`
    #[must_use]
    pub fn agent_registered(id: AgentId) -> Self {
        Self::new("agentbus.agent.registered", json!({ "agent_id": id.to_string(), "name": id.to_string() }))
    }

    /// `agentbus.agent.unregistered`
    #[must_use]
    pub fn agent_deregistered(id: AgentId) -> Self {
        Self::new("agentbus.agent.unregistered", json!({ "agent_id": id.to_string(), "name": id.to_string() }))
    }

    /// `agentbus.registry.started`
    #[must_use]
    pub fn registry_started() -> Self {
        Self::new("agentbus.registry.started", json!({}))
    }

    /// `agentbus.registry.stopped`
    #[must_use]
    pub fn registry_stopped() -> Self {
        Self::new("agentbus.registry.stopped", json!({}))
    }

    /// `agentbus.connections.started`
    #[must_use]
    pub fn connections_started() -> Self {
        Self::new("agentbus.connections.started", json!({}))
    }

    /// `agentbus.connections.stopped`
    #[must_use]
    pub fn connections_stopped() -> Self {
        Self::new("agentbus.connections.stopped", json!({}))
    }

    /// `agentbus.packages.started`
    #[must_use]
    pub fn packages_started() -> Self {
        Self::new("agentbus.packages.started", json!({}))
    }

    /// `agentbus.packages.stopped`
    #[must_use]
    pub fn packages_stopped() -> Self {
        Self::new("agentbus.packages.stopped", json!({}))
    }

    /// `agentbus.detection.started`
    #[must_use]
    pub fn detection_started() -> Self {
        Self::new("agentbus.detection.started", json!({}))
    }

    /// `agentbus.detection.stopped`
    #[must_use]
    pub fn detection_stopped() -> Self {
        Self::new("agentbus.detection.stopped", json!({}))
    }

    /// `agentbus.connected`
    #[must_use]
    pub fn connected(agent_id: AgentId, protocol: Protocol, endpoint_url: impl Into<String>) -> Self {
        Self::new(
            "agentbus.connected",
            json!({ "agent_id": agent_id.to_string(), "protocol": protocol.to_string(), "endpoint_url": endpoint_url.into() }),
        )
    }

    /// `agentbus.disconnected`
    #[must_use]
    pub fn disconnected(agent_id: AgentId, protocol: Protocol, endpoint_url: impl Into<String>) -> Self {
        Self::new(
            "agentbus.disconnected",
            json!({ "agent_id": agent_id.to_string(), "protocol": protocol.to_string(), "endpoint_url": endpoint_url.into() }),
        )
    }

    /// Emitted when a connection exhausts its reconnect budget.
    #[must_use]
    pub fn connection_failed(id: ConnectionId, reason: impl Into<String>) -> Self {
        Self::new(
            "agentbus.connection.failed",
            json!({ "connection_id": id.to_string(), "reason": reason.into() }),
        )
    }

    /// Emitted whenever the router successfully hands a message to a
    /// subscriber or deliverer.
    #[must_use]
    pub fn message_routed(id: MessageId, to: AgentId) -> Self {
        Self::new("agentbus.message.routed", json!({ "message_id": id.to_string(), "to": to.to_string() }))
    }

    /// Emitted when the router cannot deliver a message.
    #[must_use]
    pub fn message_undeliverable(id: MessageId, reason: impl Into<String>) -> Self {
        Self::new(
            "agentbus.message.undeliverable",
            json!({ "message_id": id.to_string(), "reason": reason.into() }),
        )
    }

    /// Emitted when a circuit breaker trips open.
    #[must_use]
    pub fn circuit_opened(key: impl Into<String>) -> Self {
        Self::new("agentbus.circuit.opened", json!({ "key": key.into() }))
    }

    /// Emitted when a circuit breaker closes.
    #[must_use]
    pub fn circuit_closed(key: impl Into<String>) -> Self {
        Self::new("agentbus.circuit.closed", json!({ "key": key.into() }))
    }

    /// `agentbus.package.installed`
    #[must_use]
    pub fn package_installed(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new("agentbus.package.installed", json!({ "name": name.into(), "version": version.into() }))
    }

    /// `agentbus.package.uninstalled`
    #[must_use]
    pub fn package_uninstalled(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new("agentbus.package.uninstalled", json!({ "name": name.into(), "version": version.into() }))
    }

    /// `agentbus.started`
    #[must_use]
    pub fn hub_started() -> Self {
        Self::new("agentbus.started", json!({}))
    }

    /// `agentbus.stopped`
    #[must_use]
    pub fn hub_stopped() -> Self {
        Self::new("agentbus.stopped", json!({}))
    }
}

/// Broadcast-backed event bus. Cloning a [`HubEvent`] onto a full or
/// subscriber-less channel is a no-op; publishers never block or error on it.
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    /// Creates a bus with the given broadcast channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Never blocks; dropped silently if there are no
    /// subscribers or a slow subscriber has fallen behind.
    pub async fn publish(&self, event: HubEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(HubEvent::hub_started()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.name, "agentbus.started");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(HubEvent::hub_started()).await;
    }
}
