//! # agent-hub
//!
//! A concurrent runtime that discovers, connects to, and routes messages
//! between pluggable agent protocol adapters.
//!
//! ## Components
//!
//! - **Agent Registry** ([`registry`]): source of truth for known agents,
//!   queryable by capability, protocol, or namespace.
//! - **Connection Manager** ([`connection`]): tracks the lifecycle FSM of
//!   live adapter connections and gates reconnection through a circuit
//!   breaker.
//! - **Message Router** ([`router`]): resolves a [`envelope::UniversalMessage`]
//!   to a subscriber or deliverer and fans it out without blocking.
//! - **Detection Manager** ([`detection`]): periodically sweeps every
//!   adapter in parallel for reachable agents.
//! - **Circuit Breaker** ([`circuit_breaker`]): the three-state failure gate
//!   shared by connections and adapters.
//! - **Package Manager** ([`package_manager`]): installs adapter packages
//!   and persists the catalog as JSON manifests.
//! - **Hub Orchestrator** ([`hub`]): assembles every component and exposes
//!   the public façade.
//!
//! ## Architecture
//!
//! Each component is defined as a trait with an in-memory (or file-backed,
//! for the package manager) default implementation, so an embedder can swap
//! in a different backing store without touching the rest of the hub.
//!
//! ```no_run
//! use agent_hub::{Hub, HubConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), agent_hub::HubError> {
//! let hub = Hub::new(HubConfig::default(), vec![]);
//! hub.start().await?;
//! hub.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod circuit_breaker;
pub mod config;
pub mod connection;
pub mod detection;
pub mod domain_types;
pub mod envelope;
pub mod error;
pub mod events;
pub mod hub;
pub mod package_manager;
pub mod registry;
pub mod router;

pub use crate::adapter::Adapter;
pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use crate::config::{HubConfig, HubConfigBuilder};
pub use crate::connection::{Connection, ConnectionManager, ConnectionState};
pub use crate::envelope::{
    AgentIdentity, AgentInfo, AgentPackage, EndpointInfo, EndpointKind, InstallDescriptor,
    InstallSourceKind, MessageType, UniversalMessage,
};
pub use crate::error::HubError;
pub use crate::events::{EventBus, HubEvent};
pub use crate::hub::{Hub, HubMetrics};
pub use crate::package_manager::{FilePackageManager, PackageManager};
pub use crate::registry::{AgentQuery, AgentRegistry};
pub use crate::router::{Deliverer, MessageRouter, Route, Transform};
