//! Adapter trait: the pluggable boundary between the hub and a concrete
//! agent protocol (websocket, stdio, grpc, ...).

use async_trait::async_trait;

use crate::connection::Connection;
use crate::domain_types::Protocol;
use crate::envelope::{AgentInfo, InstallDescriptor, UniversalMessage};
use crate::error::HubError;

/// A pluggable connectivity backend for one protocol.
///
/// The hub calls `detect` periodically (Detection Manager), `connect`/`send`/
/// `receive`/`disconnect`/`health_check` per tracked connection (Connection
/// Manager), and `install` on demand (Package Manager). Only `install` (and
/// its `can_install` guard) is an optional capability; every other operation
/// is part of the contract every adapter serves.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The protocol name this adapter serves, e.g. `"websocket"`.
    fn protocol(&self) -> Protocol;

    /// Higher values sort earlier in the hub's adapter list and win ties for
    /// installer election and protocol-ambiguous connects. Defaults to `0`.
    fn priority(&self) -> i32 {
        0
    }

    /// Probes for reachable agents. Called on the detection interval; a
    /// slow or failing adapter must not block other adapters' probes, so
    /// implementations should bound their own probe time internally.
    async fn detect(&self) -> Result<Vec<AgentInfo>, HubError>;

    /// Performs the adapter-side handshake for `agent`, prior to the
    /// Connection Manager marking the connection `connected`. Defaults to a
    /// no-op success, for adapters with no separate handshake step.
    async fn connect(&self, agent: &AgentInfo) -> Result<(), HubError> {
        let _ = agent;
        Ok(())
    }

    /// Sends `message` over `connection`'s transport.
    async fn send(&self, connection: &Connection, message: &UniversalMessage) -> Result<(), HubError>;

    /// Blocks until the next envelope addressed to `connection` arrives.
    async fn receive(&self, connection: &Connection) -> Result<UniversalMessage, HubError>;

    /// Idempotent teardown; must be safe to call in any connection state.
    /// Defaults to a no-op, for adapters with no session state to release.
    async fn disconnect(&self, connection: &Connection) -> Result<(), HubError> {
        let _ = connection;
        Ok(())
    }

    /// Adapter-defined liveness probe. Defaults to always-healthy.
    async fn health_check(&self, connection: &Connection) -> Result<(), HubError> {
        let _ = connection;
        Ok(())
    }

    /// Whether this adapter can install packages (spawn a new agent process
    /// from an [`InstallDescriptor`]). Defaults to `false`.
    fn can_install(&self) -> bool {
        false
    }

    /// Installs and launches an agent described by `descriptor`, returning
    /// its discovered [`AgentInfo`]. Only called when `can_install` is `true`.
    async fn install(&self, descriptor: &InstallDescriptor) -> Result<AgentInfo, HubError> {
        let _ = descriptor;
        Err(HubError::NoInstaller { name: self.protocol().to_string() })
    }
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// An in-memory adapter returning a fixed, mutable set of agents. `send`
    /// records delivered messages; `receive` pops from a queue tests push to
    /// via [`StaticAdapter::push_inbound`], or times out when empty.
    pub struct StaticAdapter {
        protocol: Protocol,
        priority: i32,
        agents: Mutex<Vec<AgentInfo>>,
        installer: bool,
        sent: Mutex<Vec<UniversalMessage>>,
        inbound: Mutex<VecDeque<UniversalMessage>>,
    }

    impl StaticAdapter {
        pub fn new(protocol: Protocol, agents: Vec<AgentInfo>) -> Self {
            Self {
                protocol,
                priority: 0,
                agents: Mutex::new(agents),
                installer: false,
                sent: Mutex::new(Vec::new()),
                inbound: Mutex::new(VecDeque::new()),
            }
        }

        pub fn with_installer(mut self) -> Self {
            self.installer = true;
            self
        }

        pub fn with_priority(mut self, priority: i32) -> Self {
            self.priority = priority;
            self
        }

        pub fn push_inbound(&self, message: UniversalMessage) {
            self.inbound.lock().unwrap().push_back(message);
        }

        pub fn sent_messages(&self) -> Vec<UniversalMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Adapter for StaticAdapter {
        fn protocol(&self) -> Protocol {
            self.protocol.clone()
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn detect(&self) -> Result<Vec<AgentInfo>, HubError> {
            Ok(self.agents.lock().unwrap().clone())
        }

        async fn send(&self, _connection: &Connection, message: &UniversalMessage) -> Result<(), HubError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn receive(&self, connection: &Connection) -> Result<UniversalMessage, HubError> {
            self.inbound.lock().unwrap().pop_front().ok_or(HubError::Timeout {
                operation: "receive",
                timeout_ms: 0,
            }).map_err(|e| {
                let _ = connection;
                e
            })
        }

        fn can_install(&self) -> bool {
            self.installer
        }

        async fn install(&self, descriptor: &InstallDescriptor) -> Result<AgentInfo, HubError> {
            if !self.installer {
                return Err(HubError::NoInstaller { name: self.protocol().to_string() });
            }
            use crate::envelope::{AgentIdentity, EndpointInfo};
            use crate::domain_types::AgentId;
            let id = AgentId::try_new(descriptor.source.clone())
                .map_err(|e| HubError::InvalidInput { operation: "install", reason: e.to_string() })?;
            let info = AgentInfo::new(
                AgentIdentity::new(id, descriptor.source.clone(), "0.0.0"),
                EndpointInfo::default(),
                self.protocol.clone(),
            );
            self.agents.lock().unwrap().push(info.clone());
            Ok(info)
        }
    }
}
