//! Message Router: maintains a priority-ordered route table and a
//! topic-pattern subscription table, resolves each envelope's destination to
//! an in-process subscriber or a registered [`Deliverer`], and fans matching
//! envelopes out to topic subscribers without blocking the caller.
//!
//! Grounded on the teacher's `MessageRouter`/`DeliveryEngine` trait split in
//! `message_router/traits.rs` and the non-blocking, lossy fan-out in
//! `implementations/delivery_engine.rs` (bounded `mpsc` + `try_send`, drop on
//! full rather than block the publisher); the route table itself follows the
//! same "single lock, read-then-act" shape as the circuit breaker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::domain_types::{AgentId, ChannelCapacity};
use crate::envelope::UniversalMessage;
use crate::error::HubError;
use crate::events::{EventBus, HubEvent};

/// A synchronous rewrite applied to a matched envelope before delivery.
pub type Transform = Arc<dyn Fn(UniversalMessage) -> UniversalMessage + Send + Sync>;

/// A routing rule: envelopes from `from` to `to` whose action or message
/// type matches `pattern` (or `"*"`, which matches anything) are delivered
/// via the route with the highest `priority`; ties are broken by
/// insertion order (earliest wins). An optional `transform` rewrites the
/// envelope before it is handed off.
#[derive(Clone)]
pub struct Route {
    /// Originating agent this route applies to.
    pub from: AgentId,
    /// Destination agent this route applies to.
    pub to: AgentId,
    /// Pattern matched against the envelope's `action` or `message_type`;
    /// `"*"` matches any envelope between `from` and `to`.
    pub pattern: String,
    /// Higher values are preferred when more than one route matches.
    pub priority: i32,
    /// Optional rewrite applied to the envelope before delivery.
    pub transform: Option<Transform>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl Route {
    /// Builds a route with no transform.
    #[must_use]
    pub fn new(from: AgentId, to: AgentId, pattern: impl Into<String>, priority: i32) -> Self {
        Self { from, to, pattern: pattern.into(), priority, transform: None }
    }

    /// Attaches a transform, returning the updated route.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    fn matches(&self, from: &AgentId, to: &AgentId, message: &UniversalMessage) -> bool {
        &self.from == from && &self.to == to && pattern_matches(&self.pattern, message)
    }
}

fn message_type_str(message: &UniversalMessage) -> &'static str {
    match message.message_type {
        crate::envelope::MessageType::Request => "request",
        crate::envelope::MessageType::Response => "response",
        crate::envelope::MessageType::Event => "event",
        crate::envelope::MessageType::Stream => "stream",
    }
}

fn pattern_matches(pattern: &str, message: &UniversalMessage) -> bool {
    pattern == "*" || pattern == message.action || pattern == message_type_str(message)
}

/// A live subscription: messages addressed to `agent_id` are pushed onto
/// `sender` until the subscriber drops its receiver or the router
/// unsubscribes it.
struct Subscription {
    sender: mpsc::Sender<UniversalMessage>,
}

/// A topic-pattern subscription. `pattern` is matched against the envelope's
/// `action`/`message_type`, with `"*"` matching everything.
struct TopicSubscription {
    pattern: String,
    sender: mpsc::Sender<UniversalMessage>,
}

/// A deliverable endpoint an adapter registers on behalf of a connected agent.
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Attempts to hand `message` to the underlying transport.
    async fn deliver(&self, message: UniversalMessage) -> Result<(), HubError>;
}

/// Behavior the rest of the hub depends on for message delivery.
#[async_trait]
pub trait MessageRouter: Send + Sync {
    /// Subscribes the caller to messages addressed to `agent_id`. Returns a
    /// receiver that yields messages as they are routed; the channel is
    /// bounded, and excess messages are dropped rather than buffered
    /// unboundedly or blocking the router.
    fn subscribe(&self, agent_id: AgentId, capacity: ChannelCapacity) -> mpsc::Receiver<UniversalMessage>;

    /// Removes a subscription. Idempotent.
    fn unsubscribe(&self, agent_id: &AgentId);

    /// Registers a [`Deliverer`] for `agent_id`, used when no in-process
    /// subscriber is present (e.g. an adapter pushing over a real transport).
    fn register_deliverer(&self, agent_id: AgentId, deliverer: Arc<dyn Deliverer>);

    /// Removes a registered deliverer. Idempotent.
    fn unregister_deliverer(&self, agent_id: &AgentId);

    /// Adds a route to the table. Rejects an exact duplicate of an existing
    /// `(from, to, pattern)` triple.
    fn add_route(&self, route: Route) -> Result<(), HubError>;

    /// Removes the route matching `(from, to, pattern)` exactly, if any.
    fn remove_route(&self, from: &AgentId, to: &AgentId, pattern: &str);

    /// Subscribes to every envelope whose action or message type matches
    /// `pattern` (`"*"` matches everything), regardless of destination.
    /// Returns an id usable with [`MessageRouter::unsubscribe_topic`].
    fn subscribe_topic(&self, pattern: String, capacity: ChannelCapacity) -> (u64, mpsc::Receiver<UniversalMessage>);

    /// Removes a topic subscription. Idempotent.
    fn unsubscribe_topic(&self, id: u64);

    /// Routes `message`: selects the highest-priority matching route (if
    /// any) and applies its transform, hands the (possibly rewritten)
    /// envelope to the owning connection's in-process subscriber or
    /// deliverer, and concurrently fans it out to every matching topic
    /// subscriber. Returns [`HubError::NoRoute`] if no subscriber or
    /// deliverer is registered for the destination.
    async fn route(&self, message: UniversalMessage) -> Result<(), HubError>;

    /// Performs only the topic-subscriber fan-out step of [`MessageRouter::route`],
    /// ignoring the route table and any destination-keyed subscriber or
    /// deliverer. Returns the number of subscribers the envelope was handed to.
    async fn broadcast(&self, message: UniversalMessage) -> usize;
}

/// In-memory `MessageRouter` combining a route table, topic subscriptions,
/// and destination-keyed subscriber/deliverer fan-out.
pub struct InMemoryMessageRouter {
    subscriptions: DashMap<AgentId, Subscription>,
    deliverers: DashMap<AgentId, Arc<dyn Deliverer>>,
    routes: parking_lot::RwLock<Vec<Route>>,
    topic_subscriptions: DashMap<u64, TopicSubscription>,
    next_topic_sub_id: AtomicU64,
    events: Arc<EventBus>,
}

impl InMemoryMessageRouter {
    /// Creates an empty router that publishes routing events on `events`.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            deliverers: DashMap::new(),
            routes: parking_lot::RwLock::new(Vec::new()),
            topic_subscriptions: DashMap::new(),
            next_topic_sub_id: AtomicU64::new(0),
            events,
        }
    }

    /// Selects the highest-priority route matching `(from, to)` and the
    /// envelope's action/message type; ties favor the earliest-inserted route.
    fn best_route(&self, from: &AgentId, to: &AgentId, message: &UniversalMessage) -> Option<Route> {
        let routes = self.routes.read();
        routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.matches(from, to, message))
            .max_by_key(|(idx, r)| (r.priority, std::cmp::Reverse(*idx)))
            .map(|(_, r)| r.clone())
    }

    fn fan_out_topics(&self, message: &UniversalMessage) -> usize {
        let mut delivered = 0;
        for entry in self.topic_subscriptions.iter() {
            if pattern_matches(&entry.value().pattern, message) {
                match entry.value().sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(topic = %entry.value().pattern, "topic subscriber channel full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
        delivered
    }

    async fn deliver_to_destination(&self, message: UniversalMessage) -> Result<(), HubError> {
        let to = message.to.id.clone();

        if let Some(sub) = self.subscriptions.get(&to) {
            match sub.sender.try_send(message.clone()) {
                Ok(()) => {
                    debug!(agent_id = %to, "delivered to in-process subscriber");
                    self.events.publish(HubEvent::message_routed(message.id, to)).await;
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(agent_id = %to, "subscriber channel full, dropping message");
                    self.events
                        .publish(HubEvent::message_undeliverable(message.id, "subscriber channel full"))
                        .await;
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    drop(sub);
                    self.subscriptions.remove(&to);
                }
            }
        }

        if let Some(deliverer) = self.deliverers.get(&to) {
            let deliverer = deliverer.value().clone();
            deliverer.deliver(message.clone()).await?;
            self.events.publish(HubEvent::message_routed(message.id, to)).await;
            return Ok(());
        }

        self.events
            .publish(HubEvent::message_undeliverable(message.id, "no route"))
            .await;
        Err(HubError::NoRoute { to })
    }
}

#[async_trait]
impl MessageRouter for InMemoryMessageRouter {
    fn subscribe(&self, agent_id: AgentId, capacity: ChannelCapacity) -> mpsc::Receiver<UniversalMessage> {
        let (tx, rx) = mpsc::channel(capacity.as_usize());
        self.subscriptions.insert(agent_id, Subscription { sender: tx });
        rx
    }

    fn unsubscribe(&self, agent_id: &AgentId) {
        self.subscriptions.remove(agent_id);
    }

    fn register_deliverer(&self, agent_id: AgentId, deliverer: Arc<dyn Deliverer>) {
        self.deliverers.insert(agent_id, deliverer);
    }

    fn unregister_deliverer(&self, agent_id: &AgentId) {
        self.deliverers.remove(agent_id);
    }

    fn add_route(&self, route: Route) -> Result<(), HubError> {
        let mut routes = self.routes.write();
        if routes.iter().any(|r| r.from == route.from && r.to == route.to && r.pattern == route.pattern) {
            return Err(HubError::InvalidInput {
                operation: "add_route",
                reason: format!(
                    "duplicate route ({}, {}, {})",
                    route.from, route.to, route.pattern
                ),
            });
        }
        routes.push(route);
        Ok(())
    }

    fn remove_route(&self, from: &AgentId, to: &AgentId, pattern: &str) {
        self.routes.write().retain(|r| !(&r.from == from && &r.to == to && r.pattern == pattern));
    }

    fn subscribe_topic(&self, pattern: String, capacity: ChannelCapacity) -> (u64, mpsc::Receiver<UniversalMessage>) {
        let (tx, rx) = mpsc::channel(capacity.as_usize());
        let id = self.next_topic_sub_id.fetch_add(1, Ordering::SeqCst);
        self.topic_subscriptions.insert(id, TopicSubscription { pattern, sender: tx });
        (id, rx)
    }

    fn unsubscribe_topic(&self, id: u64) {
        self.topic_subscriptions.remove(&id);
    }

    #[instrument(skip(self, message), fields(message_id = %message.id, to = %message.to.id))]
    async fn route(&self, mut message: UniversalMessage) -> Result<(), HubError> {
        message.propagate_trace();
        let from = message.from.id.clone();
        let to = message.to.id.clone();

        if let Some(matched) = self.best_route(&from, &to, &message) {
            if let Some(transform) = &matched.transform {
                message = transform(message);
            }
        }

        self.fan_out_topics(&message);
        self.deliver_to_destination(message).await
    }

    async fn broadcast(&self, mut message: UniversalMessage) -> usize {
        message.propagate_trace();
        self.fan_out_topics(&message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{AgentIdentity, MessageType};
    use crate::domain_types::Protocol;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn identity(id: &str) -> AgentIdentity {
        AgentIdentity::new(AgentId::try_new(id).unwrap(), id, "1.0.0")
    }

    fn msg(from: &str, to: &str) -> UniversalMessage {
        UniversalMessage::builder(
            identity(from),
            identity(to),
            Protocol::try_new("stdio").unwrap(),
            MessageType::Event,
            "notify",
        )
    }

    #[tokio::test]
    async fn routes_to_in_process_subscriber() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let mut rx = router.subscribe(AgentId::try_new("b").unwrap(), ChannelCapacity::default());
        router.route(msg("sender", "b")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.to.id, AgentId::try_new("b").unwrap());
        assert!(!received.trace_id.is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_registered_deliverer() {
        struct Counter(AtomicUsize);
        #[async_trait]
        impl Deliverer for Counter {
            async fn deliver(&self, _message: UniversalMessage) -> Result<(), HubError> {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            }
        }
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        router.register_deliverer(AgentId::try_new("b").unwrap(), counter.clone());
        router.route(msg("sender", "b")).await.unwrap();
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_route_when_nothing_registered() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let err = router.route(msg("sender", "ghost")).await.unwrap_err();
        assert!(matches!(err, HubError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn full_subscriber_channel_drops_without_error() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let cap = ChannelCapacity::try_new(1).unwrap();
        let _rx = router.subscribe(AgentId::try_new("b").unwrap(), cap);
        router.route(msg("sender", "b")).await.unwrap();
        router.route(msg("sender", "b")).await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_removes_route() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let id = AgentId::try_new("b").unwrap();
        let _rx = router.subscribe(id.clone(), ChannelCapacity::default());
        router.unsubscribe(&id);
        let err = router.route(msg("sender", "b")).await.unwrap_err();
        assert!(matches!(err, HubError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn higher_priority_route_transform_wins_on_conflict() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let from = AgentId::try_new("sender").unwrap();
        let to = AgentId::try_new("b").unwrap();

        router
            .add_route(Route::new(from.clone(), to.clone(), "*", 5).with_transform(Arc::new(|mut m| {
                m.action = "low".to_string();
                m
            })))
            .unwrap();
        router
            .add_route(Route::new(from.clone(), to.clone(), "*", 10).with_transform(Arc::new(|mut m| {
                m.action = "high".to_string();
                m
            })))
            .unwrap();

        let mut rx = router.subscribe(to.clone(), ChannelCapacity::default());
        router.route(msg("sender", "b")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.action, "high");
    }

    #[tokio::test]
    async fn equal_priority_routes_break_tie_by_insertion_order() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let from = AgentId::try_new("sender").unwrap();
        let to = AgentId::try_new("b").unwrap();

        router
            .add_route(Route::new(from.clone(), to.clone(), "*", 5).with_transform(Arc::new(|mut m| {
                m.action = "first".to_string();
                m
            })))
            .unwrap();
        router
            .add_route(Route::new(from.clone(), to.clone(), "notify", 5).with_transform(Arc::new(|mut m| {
                m.action = "second".to_string();
                m
            })))
            .unwrap();

        let mut rx = router.subscribe(to.clone(), ChannelCapacity::default());
        router.route(msg("sender", "b")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.action, "first");
    }

    #[tokio::test]
    async fn add_route_rejects_exact_duplicate() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let from = AgentId::try_new("a").unwrap();
        let to = AgentId::try_new("b").unwrap();
        router.add_route(Route::new(from.clone(), to.clone(), "*", 1)).unwrap();
        let err = router.add_route(Route::new(from, to, "*", 2)).unwrap_err();
        assert!(matches!(err, HubError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn broadcast_fans_out_to_wildcard_topic_subscribers_only() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let (_id, mut topic_rx) = router.subscribe_topic("*".to_string(), ChannelCapacity::default());
        let delivered = router.broadcast(msg("sender", "ghost")).await;
        assert_eq!(delivered, 1);
        let received = topic_rx.recv().await.unwrap();
        assert_eq!(received.to.id, AgentId::try_new("ghost").unwrap());
    }

    #[tokio::test]
    async fn route_fans_out_to_topic_subscribers_concurrently_with_direct_delivery() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let to = AgentId::try_new("b").unwrap();
        let mut direct_rx = router.subscribe(to.clone(), ChannelCapacity::default());
        let (_id, mut topic_rx) = router.subscribe_topic("notify".to_string(), ChannelCapacity::default());

        router.route(msg("sender", "b")).await.unwrap();

        assert!(direct_rx.recv().await.is_some());
        assert!(topic_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unsubscribe_topic_stops_further_delivery() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let (id, mut rx) = router.subscribe_topic("*".to_string(), ChannelCapacity::default());
        router.unsubscribe_topic(id);
        router.broadcast(msg("sender", "ghost")).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_route_drops_its_transform() {
        let router = InMemoryMessageRouter::new(Arc::new(EventBus::new(16)));
        let from = AgentId::try_new("sender").unwrap();
        let to = AgentId::try_new("b").unwrap();
        router
            .add_route(Route::new(from.clone(), to.clone(), "*", 1).with_transform(Arc::new(|mut m| {
                m.action = "rewritten".to_string();
                m
            })))
            .unwrap();
        router.remove_route(&from, &to, "*");

        let mut rx = router.subscribe(to, ChannelCapacity::default());
        router.route(msg("sender", "b")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.action, "notify");
    }
}
