//! Detection Manager: periodically fans out `detect()` across every
//! registered adapter in parallel and folds the results into the registry.
//!
//! Grounded on the teacher's use of `tokio::task::JoinSet` for bounded
//! parallel fan-out (`performance/` benchmarking harness spawns one task per
//! unit of work and joins); one failing adapter is logged and skipped
//! without masking the others' results, matching the teacher's
//! error-isolation style in `implementations/mod.rs`.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::adapter::Adapter;
use crate::envelope::AgentInfo;
use crate::registry::AgentRegistry;

/// Runs one detection sweep across every adapter in `adapters`, registering
/// every discovered agent. Returns the number of agents discovered across
/// all adapters (duplicates across sweeps are idempotent re-registrations).
#[instrument(skip(adapters, registry))]
pub async fn run_detection_sweep(
    adapters: &[Arc<dyn Adapter>],
    registry: &dyn AgentRegistry,
) -> usize {
    let mut set: JoinSet<(Box<str>, Result<Vec<AgentInfo>, crate::error::HubError>)> = JoinSet::new();
    for adapter in adapters {
        let adapter = adapter.clone();
        let protocol = adapter.protocol().to_string().into_boxed_str();
        set.spawn(async move { (protocol, adapter.detect().await) });
    }

    let mut discovered = 0usize;
    while let Some(joined) = set.join_next().await {
        let (protocol, result) = match joined {
            Ok(pair) => pair,
            Err(join_err) => {
                warn!(error = %join_err, "detection task panicked");
                continue;
            }
        };
        match result {
            Ok(agents) => {
                for agent in agents {
                    if registry.register(agent).await.is_ok() {
                        discovered += 1;
                    }
                }
            }
            Err(err) => {
                warn!(%protocol, error = %err, "adapter detect() failed, skipping");
            }
        }
    }
    discovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_double::StaticAdapter;
    use crate::domain_types::{AgentId, Protocol};
    use crate::envelope::{AgentIdentity, EndpointInfo};
    use crate::events::EventBus;
    use crate::registry::InMemoryAgentRegistry;

    fn agent(id: &str, protocol: &str) -> AgentInfo {
        AgentInfo::new(
            AgentIdentity::new(AgentId::try_new(id).unwrap(), id, "1.0.0"),
            EndpointInfo::default(),
            Protocol::try_new(protocol).unwrap(),
        )
    }

    struct FailingAdapter(Protocol);

    #[async_trait::async_trait]
    impl Adapter for FailingAdapter {
        fn protocol(&self) -> Protocol {
            self.0.clone()
        }

        async fn detect(&self) -> Result<Vec<AgentInfo>, crate::error::HubError> {
            Err(crate::error::HubError::TransportError {
                connection: crate::domain_types::ConnectionId::generate(),
                source: "probe failed".into(),
            })
        }

        async fn send(&self, _connection: &crate::connection::Connection, _message: &crate::envelope::UniversalMessage) -> Result<(), crate::error::HubError> {
            Ok(())
        }

        async fn receive(&self, _connection: &crate::connection::Connection) -> Result<crate::envelope::UniversalMessage, crate::error::HubError> {
            Err(crate::error::HubError::Timeout { operation: "receive", timeout_ms: 0 })
        }
    }

    #[tokio::test]
    async fn sweep_registers_agents_from_all_adapters() {
        let registry = InMemoryAgentRegistry::new(Arc::new(EventBus::new(16)));
        let adapters: Vec<Arc<dyn Adapter>> = vec![
            Arc::new(StaticAdapter::new(
                Protocol::try_new("websocket").unwrap(),
                vec![agent("a1", "websocket")],
            )),
            Arc::new(StaticAdapter::new(
                Protocol::try_new("stdio").unwrap(),
                vec![agent("a2", "stdio"), agent("a3", "stdio")],
            )),
        ];

        let count = run_detection_sweep(&adapters, &registry).await;
        assert_eq!(count, 3);
        assert_eq!(registry.count().await, 3);
    }

    #[tokio::test]
    async fn one_failing_adapter_does_not_block_others() {
        let registry = InMemoryAgentRegistry::new(Arc::new(EventBus::new(16)));
        let adapters: Vec<Arc<dyn Adapter>> = vec![
            Arc::new(FailingAdapter(Protocol::try_new("broken").unwrap())),
            Arc::new(StaticAdapter::new(
                Protocol::try_new("websocket").unwrap(),
                vec![agent("a1", "websocket")],
            )),
        ];

        let count = run_detection_sweep(&adapters, &registry).await;
        assert_eq!(count, 1);
    }
}
