//! Error taxonomy for the hub.
//!
//! `HubError` is the single type that crosses the public façade; component
//! modules define their own narrower error enums (`RegistryError`,
//! `ConnectionError`, `RouterError`, ...) and convert into it at the
//! boundary, so a caller never has to match on a component-internal variant
//! it doesn't recognize.

use crate::domain_types::{AgentId, ConnectionId, Protocol};
use thiserror::Error;

/// Errors surfaced by the hub's public operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// Caller supplied a malformed envelope, empty id, or unknown protocol on registration.
    #[error("invalid input for {operation}: {reason}")]
    InvalidInput {
        /// The operation that rejected the input.
        operation: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// An agent, connection, or package id has no entry.
    #[error("{operation}: not found: {id}")]
    NotFound {
        /// The operation that could not find the id.
        operation: &'static str,
        /// The offending id.
        id: String,
    },

    /// Adapter registration with an already-registered protocol.
    #[error("adapter already registered for protocol {protocol}")]
    Duplicate {
        /// The protocol that collided.
        protocol: Protocol,
    },

    /// No adapter is registered for the requested protocol.
    #[error("no adapter registered for protocol {protocol}")]
    NoAdapter {
        /// The protocol with no adapter.
        protocol: Protocol,
    },

    /// No adapter advertises installation capability.
    #[error("no adapter available to install package {name}")]
    NoInstaller {
        /// The package that could not be installed.
        name: String,
    },

    /// The router could not resolve `to.id` to any connection or subscriber.
    #[error("no route to agent {to}")]
    NoRoute {
        /// The unreachable destination agent id.
        to: AgentId,
    },

    /// Adapter-reported I/O failure.
    #[error("transport error on connection {connection}: {source}")]
    TransportError {
        /// The connection the failure occurred on.
        connection: ConnectionId,
        /// The underlying adapter error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The circuit breaker rejected the call.
    #[error("circuit open for {key}")]
    CircuitOpen {
        /// The breaker key (endpoint or adapter protocol) that is open.
        key: String,
    },

    /// The operation's deadline elapsed before it completed.
    #[error("timeout after {timeout_ms}ms during {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The configured timeout, in milliseconds.
        timeout_ms: u64,
    },

    /// The operation was rejected because the hub is stopping or stopped.
    #[error("hub is shutting down, rejected {operation}")]
    ShuttingDown {
        /// The operation that was rejected.
        operation: &'static str,
    },
}

impl HubError {
    /// Returns a short, stable tag for the error kind, useful for metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::NotFound { .. } => "not_found",
            Self::Duplicate { .. } => "duplicate",
            Self::NoAdapter { .. } => "no_adapter",
            Self::NoInstaller { .. } => "no_installer",
            Self::NoRoute { .. } => "no_route",
            Self::TransportError { .. } => "transport_error",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::ShuttingDown { .. } => "shutting_down",
        }
    }
}
