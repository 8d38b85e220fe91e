//! Connection Manager: tracks the lifecycle FSM of live adapter connections
//! and drives reconnection with the circuit breaker as an admission gate.
//!
//! Grounded on the connection-pool lifecycle pattern (state enum kept behind
//! a single lock per connection, background task draining reconnect backoff)
//! and on the teacher's `implementations/` module layout, which keeps one
//! concrete struct per component trait.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::adapter::Adapter;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain_types::{ConnectionId, MaxReconnectAttempts, Protocol, ReconnectDelayMs};
use crate::envelope::AgentInfo;
use crate::error::HubError;
use crate::events::{EventBus, HubEvent};

/// Lifecycle state of a single connection, per spec.md §4.4's FSM:
/// `disconnected -> connecting -> connected -> (reconnecting -> connecting)* -> failed|closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet attempted, or cleanly closed and not reused.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and usable.
    Connected,
    /// Lost connectivity; a reconnect attempt is scheduled or in flight.
    Reconnecting,
    /// Exhausted its reconnect budget; will not be retried automatically.
    Failed,
    /// Deliberately closed by the hub; will not be reused.
    Closed,
}

/// Point-in-time counters for a connection, useful for health reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionMetrics {
    /// Total successful message sends.
    pub messages_sent: u64,
    /// Total successful message receives.
    pub messages_received: u64,
    /// Total reconnect attempts made so far.
    pub reconnect_attempts: u32,
}

/// A tracked connection to one agent endpoint. Embeds the [`AgentInfo`] it
/// serves and a reference to the owning adapter, per spec.md §3; the adapter
/// reference is deliberately excluded from any serialization of this type.
pub struct Connection {
    /// Unique id for this connection.
    pub id: ConnectionId,
    /// The agent this connection serves.
    pub agent: AgentInfo,
    /// The adapter protocol serving this connection.
    pub protocol: Protocol,
    /// The adapter instance that owns this connection's transport.
    pub adapter: Arc<dyn Adapter>,
    state: parking_lot::Mutex<ConnectionState>,
    metrics: parking_lot::Mutex<ConnectionMetrics>,
    /// Per-connection circuit breaker, gating reconnect/send attempts.
    pub breaker: CircuitBreaker,
    reconnect_attempts: AtomicU32,
    max_reconnect_attempts: MaxReconnectAttempts,
    reconnect_delay: ReconnectDelayMs,
    connected_at: parking_lot::Mutex<Option<Instant>>,
    /// When this connection was created.
    pub created_at: Instant,
    last_activity: parking_lot::Mutex<Instant>,
    error_count: AtomicU32,
}

impl Connection {
    /// Creates a new, `disconnected` connection for `agent`, owned by `adapter`.
    #[must_use]
    pub fn new(agent: AgentInfo, adapter: Arc<dyn Adapter>) -> Self {
        Self::with_config(
            agent,
            adapter,
            CircuitBreakerConfig::default(),
            MaxReconnectAttempts::default(),
            ReconnectDelayMs::default(),
        )
    }

    /// Creates a connection with explicit breaker and reconnect tuning.
    #[must_use]
    pub fn with_config(
        agent: AgentInfo,
        adapter: Arc<dyn Adapter>,
        breaker_config: CircuitBreakerConfig,
        max_reconnect_attempts: MaxReconnectAttempts,
        reconnect_delay: ReconnectDelayMs,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::generate(),
            protocol: agent.protocol.clone(),
            agent,
            adapter,
            state: parking_lot::Mutex::new(ConnectionState::Disconnected),
            metrics: parking_lot::Mutex::new(ConnectionMetrics::default()),
            breaker: CircuitBreaker::new(breaker_config),
            reconnect_attempts: AtomicU32::new(0),
            max_reconnect_attempts,
            reconnect_delay,
            connected_at: parking_lot::Mutex::new(None),
            created_at: now,
            last_activity: parking_lot::Mutex::new(now),
            error_count: AtomicU32::new(0),
        }
    }

    /// Current FSM state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Snapshot of counters.
    pub fn metrics(&self) -> ConnectionMetrics {
        *self.metrics.lock()
    }

    /// Total transport-level errors recorded against this connection.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Timestamp of the most recent send, receive, or failure.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Marks the connection as `connecting`.
    pub fn mark_connecting(&self) {
        *self.state.lock() = ConnectionState::Connecting;
        self.touch();
    }

    /// Marks the connection as `connected`, resetting the reconnect counter.
    pub fn mark_connected(&self) {
        *self.state.lock() = ConnectionState::Connected;
        *self.connected_at.lock() = Some(Instant::now());
        self.reconnect_attempts.store(0, std::sync::atomic::Ordering::SeqCst);
        self.breaker.record_success();
        self.touch();
    }

    /// Records a lost connection. Transitions to `reconnecting` if the
    /// reconnect budget is not exhausted, otherwise `failed`.
    pub fn mark_disconnected(&self) -> ConnectionState {
        self.breaker.record_failure();
        self.error_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let attempts = self
            .reconnect_attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let mut state = self.state.lock();
        *state = if attempts > self.max_reconnect_attempts.as_u32() {
            ConnectionState::Failed
        } else {
            ConnectionState::Reconnecting
        };
        self.touch();
        *state
    }

    /// Deliberately closes the connection; terminal, never reconnected.
    pub fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
        self.touch();
    }

    /// The delay to wait before the next reconnect attempt.
    #[must_use]
    pub fn reconnect_delay(&self) -> std::time::Duration {
        self.reconnect_delay.as_duration()
    }

    /// Whether another reconnect attempt is permitted by both the attempt
    /// budget and the circuit breaker.
    #[must_use]
    pub fn may_reconnect(&self) -> bool {
        self.reconnect_attempts.load(std::sync::atomic::Ordering::SeqCst)
            <= self.max_reconnect_attempts.as_u32()
            && self.breaker.allow_request()
    }

    pub(crate) fn record_send(&self) {
        self.metrics.lock().messages_sent += 1;
        self.touch();
    }

    pub(crate) fn record_receive(&self) {
        self.metrics.lock().messages_received += 1;
        self.touch();
    }
}

/// Behavior the rest of the hub depends on for connection bookkeeping.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Opens a new connection for `agent`, owned by `adapter`, transitioning
    /// it through `connecting -> connected`. Fires `agentbus.connected`.
    async fn connect(&self, agent: AgentInfo, adapter: Arc<dyn Adapter>) -> Result<Arc<Connection>, HubError>;

    /// Looks up a tracked connection by id.
    async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>>;

    /// Closes a connection: calls the owning adapter's `disconnect`, marks it
    /// `closed`, and evicts it from the table. Fires `agentbus.disconnected`.
    async fn close(&self, id: &ConnectionId) -> Result<(), HubError>;

    /// Marks a connection as having lost connectivity, transitioning it to
    /// `reconnecting` or `failed`. Fires `connection.failed` if terminal.
    async fn report_failure(&self, id: &ConnectionId) -> Result<ConnectionState, HubError>;

    /// Lists every tracked connection.
    async fn list(&self) -> Vec<Arc<Connection>>;
}

/// In-memory `ConnectionManager` keyed by [`ConnectionId`].
pub struct InMemoryConnectionManager {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    events: Arc<EventBus>,
    breaker_config: CircuitBreakerConfig,
    max_reconnect_attempts: MaxReconnectAttempts,
    reconnect_delay: ReconnectDelayMs,
}

impl InMemoryConnectionManager {
    /// Creates an empty manager that publishes lifecycle events on `events`,
    /// applying the hub's default breaker/reconnect tuning to every new connection.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self::with_config(
            events,
            CircuitBreakerConfig::default(),
            MaxReconnectAttempts::default(),
            ReconnectDelayMs::default(),
        )
    }

    /// Like [`Self::with_config`], but with `max_reconnect_attempts` forced to
    /// zero so a lost connection goes straight to `failed` instead of retrying.
    #[must_use]
    pub fn with_reconnect_disabled(events: Arc<EventBus>, breaker_config: CircuitBreakerConfig, reconnect_delay: ReconnectDelayMs) -> Self {
        Self::with_config(events, breaker_config, MaxReconnectAttempts::try_new(0).expect("0 is in range"), reconnect_delay)
    }

    /// Creates an empty manager with explicit breaker/reconnect tuning.
    #[must_use]
    pub fn with_config(
        events: Arc<EventBus>,
        breaker_config: CircuitBreakerConfig,
        max_reconnect_attempts: MaxReconnectAttempts,
        reconnect_delay: ReconnectDelayMs,
    ) -> Self {
        Self { connections: DashMap::new(), events, breaker_config, max_reconnect_attempts, reconnect_delay }
    }
}

#[async_trait]
impl ConnectionManager for InMemoryConnectionManager {
    #[instrument(skip(self, agent, adapter), fields(agent_id = %agent.identity.id))]
    async fn connect(&self, agent: AgentInfo, adapter: Arc<dyn Adapter>) -> Result<Arc<Connection>, HubError> {
        adapter.connect(&agent).await?;

        let endpoint_url = agent.endpoint.url.clone().unwrap_or_default();
        let agent_id = agent.identity.id.clone();
        let protocol = agent.protocol.clone();
        let connection = Arc::new(Connection::with_config(
            agent,
            adapter,
            self.breaker_config,
            self.max_reconnect_attempts,
            self.reconnect_delay,
        ));
        connection.mark_connecting();
        connection.mark_connected();
        self.connections.insert(connection.id, connection.clone());
        info!(connection_id = %connection.id, agent_id = %agent_id, %protocol, "connection established");
        self.events
            .publish(HubEvent::connected(agent_id, protocol, endpoint_url))
            .await;
        Ok(connection)
    }

    async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|r| r.value().clone())
    }

    #[instrument(skip(self))]
    async fn close(&self, id: &ConnectionId) -> Result<(), HubError> {
        let (_, connection) = self
            .connections
            .remove(id)
            .ok_or_else(|| HubError::NotFound { operation: "close", id: id.to_string() })?;
        connection.adapter.disconnect(&connection).await?;
        connection.mark_closed();
        let endpoint_url = connection.agent.endpoint.url.clone().unwrap_or_default();
        self.events
            .publish(HubEvent::disconnected(
                connection.agent.identity.id.clone(),
                connection.protocol.clone(),
                endpoint_url,
            ))
            .await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn report_failure(&self, id: &ConnectionId) -> Result<ConnectionState, HubError> {
        let connection = self
            .connections
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| HubError::NotFound { operation: "report_failure", id: id.to_string() })?;
        let state = connection.mark_disconnected();
        if state == ConnectionState::Failed {
            warn!(connection_id = %id, "connection exhausted reconnect budget");
            self.events
                .publish(HubEvent::connection_failed(*id, "reconnect budget exhausted"))
                .await;
        }
        Ok(state)
    }

    async fn list(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_double::StaticAdapter;
    use crate::domain_types::AgentId;
    use crate::envelope::{AgentIdentity, EndpointInfo};

    fn manager() -> InMemoryConnectionManager {
        InMemoryConnectionManager::new(Arc::new(EventBus::new(16)))
    }

    fn test_agent(id: &str, protocol: &str) -> AgentInfo {
        AgentInfo::new(
            AgentIdentity::new(AgentId::try_new(id).unwrap(), id, "1.0.0"),
            EndpointInfo::default(),
            Protocol::try_new(protocol).unwrap(),
        )
    }

    fn test_adapter(protocol: &str) -> Arc<dyn Adapter> {
        Arc::new(StaticAdapter::new(Protocol::try_new(protocol).unwrap(), vec![]))
    }

    #[tokio::test]
    async fn connect_transitions_to_connected() {
        let mgr = manager();
        let conn = mgr.connect(test_agent("a1", "websocket"), test_adapter("websocket")).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.agent.identity.id, AgentId::try_new("a1").unwrap());
    }

    #[tokio::test]
    async fn report_failure_moves_to_reconnecting_then_failed() {
        let mgr = manager();
        let conn = Arc::new(Connection::with_config(
            test_agent("a1", "websocket"),
            test_adapter("websocket"),
            CircuitBreakerConfig::default(),
            MaxReconnectAttempts::try_new(1).unwrap(),
            ReconnectDelayMs::try_new(1).unwrap(),
        ));
        mgr.connections.insert(conn.id, conn.clone());

        let s1 = mgr.report_failure(&conn.id).await.unwrap();
        assert_eq!(s1, ConnectionState::Reconnecting);

        let s2 = mgr.report_failure(&conn.id).await.unwrap();
        assert_eq!(s2, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn close_is_terminal_and_evicts() {
        let mgr = manager();
        let conn = mgr.connect(test_agent("a1", "stdio"), test_adapter("stdio")).await.unwrap();
        mgr.close(&conn.id).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(mgr.get(&conn.id).await.is_none());
        assert!(mgr.list().await.is_empty());
    }

    #[tokio::test]
    async fn close_unknown_connection_errors() {
        let mgr = manager();
        let bogus = ConnectionId::generate();
        assert!(mgr.close(&bogus).await.is_err());
    }

    #[tokio::test]
    async fn mark_connected_resets_reconnect_counter() {
        let conn = Connection::new(test_agent("a1", "stdio"), test_adapter("stdio"));
        conn.mark_disconnected();
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        conn.mark_connected();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.may_reconnect());
    }

    #[tokio::test]
    async fn mark_disconnected_increments_error_count() {
        let conn = Connection::new(test_agent("a1", "stdio"), test_adapter("stdio"));
        assert_eq!(conn.error_count(), 0);
        conn.mark_disconnected();
        assert_eq!(conn.error_count(), 1);
    }
}
