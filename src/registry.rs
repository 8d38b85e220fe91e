//! Agent Registry: the hub's source of truth for known agents.
//!
//! Grounded on the teacher's `AgentRegistry` trait and
//! `implementations/agent_registry.rs` in-memory store: a `DashMap` keyed by
//! agent id, with secondary indexes maintained alongside it rather than
//! recomputed at query time.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::domain_types::{AgentId, Protocol};
use crate::envelope::AgentInfo;
use crate::error::HubError;
use crate::events::{EventBus, HubEvent};

/// Query-time filter over the registry. All fields are ANDed; `None` means
/// "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct AgentQuery {
    /// Restrict to agents advertising this capability.
    pub capability: Option<String>,
    /// Restrict to agents reachable over this protocol.
    pub protocol: Option<Protocol>,
    /// Restrict to agents in this namespace.
    pub namespace: Option<String>,
    /// Restrict to agents carrying this tag.
    pub tag: Option<String>,
}

/// Behavior the rest of the hub depends on for agent bookkeeping.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Registers (or idempotently re-registers, if `info.id()` is already
    /// present) an agent. Fires `agent.registered` the first time an id is seen.
    async fn register(&self, info: AgentInfo) -> Result<(), HubError>;

    /// Removes an agent from the registry. Fires `agent.deregistered`.
    /// Returns `Ok(())` even if the id was already absent (idempotent).
    async fn deregister(&self, id: &AgentId) -> Result<(), HubError>;

    /// Looks up a single agent by id.
    async fn get(&self, id: &AgentId) -> Option<AgentInfo>;

    /// Lists every agent matching `query`.
    async fn list(&self, query: &AgentQuery) -> Vec<AgentInfo>;

    /// Lists every agent carrying `tag`. Indexing is analogous to
    /// protocol/namespace: maintained incrementally on `register`/`deregister`.
    async fn list_by_tag(&self, tag: &str) -> Vec<AgentInfo>;

    /// Total number of registered agents.
    async fn count(&self) -> usize;
}

/// In-memory `AgentRegistry` with capability/protocol/namespace/tag indexes
/// kept current on every mutation.
pub struct InMemoryAgentRegistry {
    agents: DashMap<AgentId, AgentInfo>,
    by_capability: DashMap<String, Vec<AgentId>>,
    by_protocol: DashMap<Protocol, Vec<AgentId>>,
    by_namespace: DashMap<String, Vec<AgentId>>,
    by_tag: DashMap<String, Vec<AgentId>>,
    events: Arc<EventBus>,
}

impl InMemoryAgentRegistry {
    /// Creates an empty registry that publishes lifecycle events on `events`.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            agents: DashMap::new(),
            by_capability: DashMap::new(),
            by_protocol: DashMap::new(),
            by_namespace: DashMap::new(),
            by_tag: DashMap::new(),
            events,
        }
    }

    fn index_insert(&self, info: &AgentInfo) {
        let id = info.identity.id.clone();
        for cap in &info.capabilities {
            self.by_capability.entry(cap.clone()).or_default().push(id.clone());
        }
        self.by_protocol.entry(info.protocol.clone()).or_default().push(id.clone());
        if let Some(ns) = &info.identity.namespace {
            self.by_namespace.entry(ns.clone()).or_default().push(id.clone());
        }
        for tag in &info.identity.tags {
            self.by_tag.entry(tag.clone()).or_default().push(id.clone());
        }
    }

    fn index_remove(&self, info: &AgentInfo) {
        let id = &info.identity.id;
        for cap in &info.capabilities {
            if let Some(mut ids) = self.by_capability.get_mut(cap) {
                ids.retain(|i| i != id);
            }
        }
        if let Some(mut ids) = self.by_protocol.get_mut(&info.protocol) {
            ids.retain(|i| i != id);
        }
        if let Some(ns) = &info.identity.namespace {
            if let Some(mut ids) = self.by_namespace.get_mut(ns) {
                ids.retain(|i| i != id);
            }
        }
        for tag in &info.identity.tags {
            if let Some(mut ids) = self.by_tag.get_mut(tag) {
                ids.retain(|i| i != id);
            }
        }
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    #[instrument(skip(self, info), fields(agent_id = %info.identity.id))]
    async fn register(&self, info: AgentInfo) -> Result<(), HubError> {
        let id = info.identity.id.clone();
        let is_new = !self.agents.contains_key(&id);
        if let Some(old) = self.agents.get(&id) {
            self.index_remove(&old);
        }
        self.index_insert(&info);
        self.agents.insert(id.clone(), info);

        if is_new {
            info!(agent_id = %id, "agent registered");
            self.events.publish(HubEvent::agent_registered(id)).await;
        } else {
            debug!(agent_id = %id, "agent re-registered");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deregister(&self, id: &AgentId) -> Result<(), HubError> {
        if let Some((_, info)) = self.agents.remove(id) {
            self.index_remove(&info);
            info!(agent_id = %id, "agent deregistered");
            self.events.publish(HubEvent::agent_deregistered(id.clone())).await;
        }
        Ok(())
    }

    async fn get(&self, id: &AgentId) -> Option<AgentInfo> {
        self.agents.get(id).map(|r| r.value().clone())
    }

    async fn list(&self, query: &AgentQuery) -> Vec<AgentInfo> {
        let candidate_ids: Option<Vec<AgentId>> = match (
            &query.capability,
            &query.protocol,
            &query.namespace,
            &query.tag,
        ) {
            (Some(cap), _, _, _) => Some(self.by_capability.get(cap).map(|ids| ids.clone()).unwrap_or_default()),
            (_, Some(proto), _, _) => Some(self.by_protocol.get(proto).map(|ids| ids.clone()).unwrap_or_default()),
            (_, _, Some(ns), _) => Some(self.by_namespace.get(ns).map(|ids| ids.clone()).unwrap_or_default()),
            (_, _, _, Some(tag)) => Some(self.by_tag.get(tag).map(|ids| ids.clone()).unwrap_or_default()),
            (None, None, None, None) => None,
        };

        let matches = |info: &AgentInfo| -> bool {
            if let Some(cap) = &query.capability {
                if !info.capabilities.iter().any(|c| c == cap) {
                    return false;
                }
            }
            if let Some(proto) = &query.protocol {
                if &info.protocol != proto {
                    return false;
                }
            }
            if let Some(ns) = &query.namespace {
                if info.identity.namespace.as_ref() != Some(ns) {
                    return false;
                }
            }
            if let Some(tag) = &query.tag {
                if !info.identity.tags.iter().any(|t| t == tag) {
                    return false;
                }
            }
            true
        };

        match candidate_ids {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| self.agents.get(&id).map(|r| r.value().clone()))
                .filter(matches)
                .collect(),
            None => self.agents.iter().map(|r| r.value().clone()).filter(matches).collect(),
        }
    }

    async fn list_by_tag(&self, tag: &str) -> Vec<AgentInfo> {
        self.list(&AgentQuery { tag: Some(tag.to_string()), ..Default::default() }).await
    }

    async fn count(&self) -> usize {
        self.agents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{AgentIdentity, EndpointInfo};

    fn sample_agent(id: &str, protocol: &str, capability: &str) -> AgentInfo {
        let mut info = AgentInfo::new(
            AgentIdentity::new(AgentId::try_new(id).unwrap(), id, "1.0.0"),
            EndpointInfo::default(),
            Protocol::try_new(protocol).unwrap(),
        );
        info.capabilities.push(capability.to_string());
        info
    }

    fn registry() -> InMemoryAgentRegistry {
        InMemoryAgentRegistry::new(Arc::new(EventBus::new(16)))
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let reg = registry();
        let agent = sample_agent("a1", "websocket", "chat");
        reg.register(agent.clone()).await.unwrap();
        let fetched = reg.get(&agent.identity.id).await.unwrap();
        assert_eq!(fetched.identity.id, agent.identity.id);
        assert_eq!(reg.count().await, 1);
    }

    #[tokio::test]
    async fn register_is_idempotent_for_same_id() {
        let reg = registry();
        let agent = sample_agent("a1", "websocket", "chat");
        reg.register(agent.clone()).await.unwrap();
        reg.register(agent.clone()).await.unwrap();
        assert_eq!(reg.count().await, 1);
    }

    #[tokio::test]
    async fn deregister_removes_from_all_indexes() {
        let reg = registry();
        let agent = sample_agent("a1", "websocket", "chat");
        reg.register(agent.clone()).await.unwrap();
        reg.deregister(&agent.identity.id).await.unwrap();
        assert_eq!(reg.count().await, 0);
        let found = reg
            .list(&AgentQuery { capability: Some("chat".into()), ..Default::default() })
            .await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_capability_and_protocol() {
        let reg = registry();
        reg.register(sample_agent("a1", "websocket", "chat")).await.unwrap();
        reg.register(sample_agent("a2", "stdio", "chat")).await.unwrap();
        reg.register(sample_agent("a3", "websocket", "vision")).await.unwrap();

        let chat_ws = reg
            .list(&AgentQuery {
                capability: Some("chat".into()),
                protocol: Some(Protocol::try_new("websocket").unwrap()),
                ..Default::default()
            })
            .await;
        assert_eq!(chat_ws.len(), 1);
        assert_eq!(chat_ws[0].identity.id, AgentId::try_new("a1").unwrap());
    }

    #[tokio::test]
    async fn deregister_of_unknown_id_is_ok() {
        let reg = registry();
        let id = AgentId::try_new("ghost").unwrap();
        assert!(reg.deregister(&id).await.is_ok());
    }

    #[tokio::test]
    async fn list_by_tag_filters_tagged_agents() {
        let reg = registry();
        for (id, tag) in [("f1", "fast"), ("s1", "slow"), ("f2", "fast")] {
            let mut info = sample_agent(id, "stdio", "chat");
            info.identity.tags.push(tag.to_string());
            reg.register(info).await.unwrap();
        }

        let fast = reg.list_by_tag("fast").await;
        assert_eq!(fast.len(), 2);
        assert!(fast.iter().all(|a| a.identity.tags.iter().any(|t| t == "fast")));
    }

    #[tokio::test]
    async fn deregister_removes_from_tag_index() {
        let reg = registry();
        let mut agent = sample_agent("a1", "websocket", "chat");
        agent.identity.tags.push("fast".to_string());
        reg.register(agent.clone()).await.unwrap();
        reg.deregister(&agent.identity.id).await.unwrap();
        assert!(reg.list_by_tag("fast").await.is_empty());
    }
}
