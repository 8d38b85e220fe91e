//! Hub Orchestrator: owns every component, runs the background detection
//! and health loops, and exposes the public façade operations.
//!
//! Grounded on the teacher's top-level `runtime`/`server` modules, which
//! wire concrete component implementations behind trait objects and drive
//! them from a `tokio::select!` loop over interval timers and a shutdown
//! signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::adapter::Adapter;
use crate::config::HubConfig;
use crate::connection::{Connection, ConnectionManager, InMemoryConnectionManager};
use crate::detection::run_detection_sweep;
use crate::domain_types::AgentId;
use crate::envelope::{AgentInfo, UniversalMessage};
use crate::error::HubError;
use crate::events::{EventBus, HubEvent};
use crate::package_manager::{FilePackageManager, PackageManager};
use crate::registry::{AgentQuery, AgentRegistry, InMemoryAgentRegistry};
use crate::router::{Deliverer, InMemoryMessageRouter, MessageRouter, Route};

/// Point-in-time counters across every managed component, returned by
/// [`Hub::get_metrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HubMetrics {
    /// Number of agents currently in the registry.
    pub agent_count: usize,
    /// Number of tracked connections.
    pub connection_count: usize,
    /// Connections currently in the `connected` state.
    pub connections_healthy: usize,
    /// Total messages sent across all tracked connections.
    pub messages_sent: u64,
    /// Total messages received across all tracked connections.
    pub messages_received: u64,
}

/// Default timeout applied to [`Hub::connect`] when the caller supplies
/// `None` or a zero duration.
const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn insert_by_priority(list: &mut Vec<Arc<dyn Adapter>>, adapter: Arc<dyn Adapter>) {
    let priority = adapter.priority();
    let pos = list.iter().position(|a| a.priority() < priority).unwrap_or(list.len());
    list.insert(pos, adapter);
}

/// The assembled runtime: every component plus the background task handles
/// that drive detection and health sweeps.
pub struct Hub {
    config: HubConfig,
    registry: Arc<dyn AgentRegistry>,
    connections: Arc<dyn ConnectionManager>,
    router: Arc<dyn MessageRouter>,
    packages: Arc<FilePackageManager>,
    /// Priority-ordered (descending), ties broken by registration order.
    adapters: Arc<RwLock<Vec<Arc<dyn Adapter>>>>,
    events: Arc<EventBus>,
    running: Arc<AtomicBool>,
    background: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    inboxes: DashMap<AgentId, Arc<tokio::sync::Mutex<mpsc::Receiver<UniversalMessage>>>>,
}

impl Hub {
    /// Assembles a hub from `config` and `adapters`. `adapters` is sorted
    /// into priority order (descending `priority()`, ties kept in the given
    /// order) before anything else reads it.
    #[must_use]
    pub fn new(config: HubConfig, mut adapters: Vec<Arc<dyn Adapter>>) -> Self {
        adapters.sort_by_key(|a| std::cmp::Reverse(a.priority()));
        let adapters = Arc::new(RwLock::new(adapters));

        let events = Arc::new(EventBus::default());
        let registry = Arc::new(InMemoryAgentRegistry::new(events.clone()));
        let connections = Arc::new(if config.reconnect_enabled {
            InMemoryConnectionManager::with_config(
                events.clone(),
                config.circuit_breaker,
                config.max_reconnect_attempts,
                config.reconnect_delay_ms,
            )
        } else {
            InMemoryConnectionManager::with_reconnect_disabled(events.clone(), config.circuit_breaker, config.reconnect_delay_ms)
        });
        let router = Arc::new(InMemoryMessageRouter::new(events.clone()));
        let packages = Arc::new(FilePackageManager::new(
            config.package_dir.clone(),
            adapters.clone(),
            events.clone(),
        ));

        Self {
            config,
            registry,
            connections,
            router,
            packages,
            adapters,
            events,
            running: Arc::new(AtomicBool::new(false)),
            background: parking_lot::Mutex::new(Vec::new()),
            inboxes: DashMap::new(),
        }
    }

    /// The hub's event bus, for embedders that want to observe lifecycle events.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The hub's agent registry.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn AgentRegistry> {
        self.registry.clone()
    }

    /// The hub's connection manager.
    #[must_use]
    pub fn connections(&self) -> Arc<dyn ConnectionManager> {
        self.connections.clone()
    }

    /// The hub's message router.
    #[must_use]
    pub fn router(&self) -> Arc<dyn MessageRouter> {
        self.router.clone()
    }

    /// The hub's package manager.
    #[must_use]
    pub fn packages(&self) -> Arc<FilePackageManager> {
        self.packages.clone()
    }

    /// Registers a new adapter, inserting it into the priority-ordered list
    /// at the position its `priority()` belongs (O(N)); ties with an
    /// already-registered adapter land after it, so earlier registrations
    /// keep winning ties.
    pub fn register_adapter(&self, adapter: Arc<dyn Adapter>) {
        insert_by_priority(&mut self.adapters.write(), adapter);
    }

    /// Snapshot of the currently registered adapters, in priority order.
    #[must_use]
    pub fn adapters(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters.read().clone()
    }

    /// Whether the hub's background loops are currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the hub: loads the package catalog from disk, runs one
    /// immediate detection sweep, then spawns the periodic detection and
    /// health background loops. Idempotent; calling `start` on an already
    /// running hub is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), HubError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.config.validate()?;

        self.events.publish(HubEvent::registry_started()).await;
        self.events.publish(HubEvent::connections_started()).await;
        self.packages.load_from_disk().await?;
        self.events.publish(HubEvent::packages_started()).await;

        if self.config.auto_detect_enabled {
            let snapshot = self.adapters.read().clone();
            run_detection_sweep(&snapshot, self.registry.as_ref()).await;
        }
        self.events.publish(HubEvent::detection_started()).await;

        let mut handles = self.background.lock();
        if self.config.auto_detect_enabled {
            handles.push(self.spawn_detection_loop());
        }
        handles.push(self.spawn_health_loop());
        drop(handles);

        info!("hub started");
        self.events.publish(HubEvent::hub_started()).await;
        Ok(())
    }

    /// Stops the hub: aborts background loops and marks the hub stopped.
    /// Sub-managers are stopped in the reverse of their start order
    /// (detection, packages, connections, registry).
    /// Idempotent; calling `stop` on an already stopped hub is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), HubError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        self.events.publish(HubEvent::detection_stopped()).await;
        self.events.publish(HubEvent::packages_stopped()).await;
        self.events.publish(HubEvent::connections_stopped()).await;
        self.events.publish(HubEvent::registry_stopped()).await;

        info!("hub stopped");
        self.events.publish(HubEvent::hub_stopped()).await;
        Ok(())
    }

    fn spawn_detection_loop(&self) -> JoinHandle<()> {
        let adapters = self.adapters.clone();
        let registry = self.registry.clone();
        let running = self.running.clone();
        let interval = std::time::Duration::from_millis(self.config.detection_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let snapshot = adapters.read().clone();
                run_detection_sweep(&snapshot, registry.as_ref()).await;
            }
        })
    }

    fn spawn_health_loop(&self) -> JoinHandle<()> {
        let connections = self.connections.clone();
        let running = self.running.clone();
        let interval = std::time::Duration::from_millis(self.config.health_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                for connection in connections.list().await {
                    if !connection.breaker.allow_request()
                        && connection.state() == crate::connection::ConnectionState::Reconnecting
                    {
                        warn!(connection_id = %connection.id, "connection still circuit-gated");
                    }
                }
            }
        })
    }

    /// Lists registered agents matching `query`.
    pub async fn list_agents(&self, query: &AgentQuery) -> Vec<AgentInfo> {
        self.registry.list(query).await
    }

    /// Connects to `agent_id`: resolves it in the registry, selects the
    /// adapter registered for its protocol (highest priority first), and
    /// opens a connection through the Connection Manager. `timeout` bounds
    /// the whole attempt; `None` or a zero duration applies the hub's
    /// documented 30s default. Rejected once the tracked connection count
    /// reaches the configured `max_connections`.
    pub async fn connect(
        &self,
        agent_id: &AgentId,
        timeout: Option<std::time::Duration>,
    ) -> Result<Arc<Connection>, HubError> {
        if self.connections.list().await.len() >= self.config.max_connections {
            return Err(HubError::InvalidInput {
                operation: "connect",
                reason: format!("max_connections ({}) reached", self.config.max_connections),
            });
        }

        let agent = self
            .registry
            .get(agent_id)
            .await
            .ok_or_else(|| HubError::NotFound { operation: "connect", id: agent_id.to_string() })?;

        let adapter = {
            self.adapters.read().iter().find(|a| a.protocol() == agent.protocol).cloned()
        }
        .ok_or_else(|| HubError::NoAdapter { protocol: agent.protocol.clone() })?;

        let wait = match timeout {
            Some(d) if !d.is_zero() => d,
            _ => DEFAULT_CONNECT_TIMEOUT,
        };

        match tokio::time::timeout(wait, self.connections.connect(agent, adapter)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(HubError::Timeout { operation: "connect", timeout_ms: wait.as_millis() as u64 }),
        }
    }

    /// Subscribes to messages addressed to `agent_id`.
    pub fn subscribe(&self, agent_id: AgentId) -> mpsc::Receiver<UniversalMessage> {
        self.router.subscribe(agent_id, self.config.default_channel_capacity)
    }

    /// Registers a deliverer for `agent_id`.
    pub fn register_deliverer(&self, agent_id: AgentId, deliverer: Arc<dyn Deliverer>) {
        self.router.register_deliverer(agent_id, deliverer);
    }

    /// Adds a route to the message router's route table.
    pub fn add_route(&self, route: Route) -> Result<(), HubError> {
        self.router.add_route(route)
    }

    /// Removes a route from the message router's route table. Idempotent.
    pub fn remove_route(&self, from: &AgentId, to: &AgentId, pattern: &str) {
        self.router.remove_route(from, to, pattern);
    }

    /// Subscribes to every envelope whose action or message type matches
    /// `pattern` (`"*"` matches everything), independent of destination.
    pub fn subscribe_topic(&self, pattern: impl Into<String>) -> (u64, mpsc::Receiver<UniversalMessage>) {
        self.router.subscribe_topic(pattern.into(), self.config.default_channel_capacity)
    }

    /// Removes a topic subscription. Idempotent.
    pub fn unsubscribe_topic(&self, id: u64) {
        self.router.unsubscribe_topic(id);
    }

    /// Fans `message` out to every matching topic subscriber, bypassing the
    /// route table and any destination-keyed subscriber or deliverer.
    pub async fn broadcast(&self, message: UniversalMessage) -> usize {
        self.router.broadcast(message).await
    }

    /// Sends `message` through the router, stamping `timestamp` at the
    /// moment of entry (per the envelope's documented field-ownership rule).
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub async fn send_message(&self, mut message: UniversalMessage) -> Result<(), HubError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(HubError::ShuttingDown { operation: "send_message" });
        }
        message.timestamp = chrono::Utc::now();
        if message.is_expired_at(message.timestamp) {
            return Err(HubError::InvalidInput {
                operation: "send_message",
                reason: "message already expired".to_string(),
            });
        }
        self.router.route(message).await
    }

    /// Pulls the next message addressed to `agent_id`, waiting up to
    /// `timeout` (the hub's default of 30s is applied when `None` is given).
    /// Lazily establishes the subscription on first call for a given id.
    /// Returns `Ok(None)` if the wait elapses with nothing delivered.
    #[instrument(skip(self))]
    pub async fn receive_message(
        &self,
        agent_id: &AgentId,
        timeout: Option<std::time::Duration>,
    ) -> Result<Option<UniversalMessage>, HubError> {
        if !self.inboxes.contains_key(agent_id) {
            let rx = self.subscribe(agent_id.clone());
            self.inboxes.insert(agent_id.clone(), Arc::new(tokio::sync::Mutex::new(rx)));
        }
        let inbox = self
            .inboxes
            .get(agent_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| HubError::NotFound { operation: "receive_message", id: agent_id.to_string() })?;
        let mut rx = inbox.lock().await;
        let wait = timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Ok(None),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Installs a cataloged package by name.
    pub async fn install_package(&self, name: &str) -> Result<AgentInfo, HubError> {
        let info = self.packages.install(name).await?;
        self.registry.register(info.clone()).await?;
        Ok(info)
    }

    /// Removes a cataloged package. Does not touch agents already installed
    /// from it.
    pub async fn uninstall_package(&self, name: &str) -> Result<(), HubError> {
        self.packages.uninstall(name).await
    }

    /// Snapshots aggregate counters across the registry and every tracked connection.
    pub async fn get_metrics(&self) -> HubMetrics {
        let agent_count = self.registry.count().await;
        let connections = self.connections.list().await;
        let connection_count = connections.len();
        let mut connections_healthy = 0;
        let mut messages_sent = 0;
        let mut messages_received = 0;
        for connection in &connections {
            if connection.state() == crate::connection::ConnectionState::Connected {
                connections_healthy += 1;
            }
            let metrics = connection.metrics();
            messages_sent += metrics.messages_sent;
            messages_received += metrics.messages_received;
        }
        HubMetrics { agent_count, connection_count, connections_healthy, messages_sent, messages_received }
    }
}
