//! Canonical data shapes that cross every component boundary: agent
//! identity, endpoint coordinates, discovered agents, installable packages,
//! and the `UniversalMessage` envelope itself.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::{AgentId, MessageId, Protocol};

/// Unique handle for an agent, independent of where it currently lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Opaque id, unique within the hub.
    pub id: AgentId,
    /// Human-readable name.
    pub name: String,
    /// Agent-reported version string.
    pub version: String,
    /// Optional multi-tenant partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Ordered, free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AgentIdentity {
    /// Builds an identity with no namespace or tags.
    #[must_use]
    pub fn new(id: AgentId, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            version: version.into(),
            namespace: None,
            tags: Vec::new(),
        }
    }

    /// The identity used by the hub itself when it originates a message.
    #[must_use]
    pub fn hub(name: impl Into<String>) -> Self {
        Self::new(
            AgentId::try_new("hub").expect("\"hub\" is a valid agent id"),
            name,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

/// Transport kind an [`EndpointInfo`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Bidirectional websocket connection.
    Websocket,
    /// Plain HTTP(S) request/response.
    Http,
    /// gRPC service.
    Grpc,
    /// Subprocess communicating over stdio.
    Stdio,
    /// Local inter-process channel (unix socket, named pipe, ...).
    Ipc,
    /// A filesystem path polled or watched for changes.
    File,
}

/// Connection coordinates for an agent. Which fields are meaningful is
/// determined entirely by `kind`; no field is globally mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Which subset of the remaining fields applies.
    pub kind: Option<EndpointKind>,
    /// Full URL, when applicable (websocket/http/grpc).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Host, when the endpoint is addressed by host/port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port, when the endpoint is addressed by host/port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Request path, for http/grpc endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Filesystem path, for stdio/ipc/file endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// Working directory a subprocess should be launched in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for EndpointKind {
    fn default() -> Self {
        Self::Stdio
    }
}

/// A discovered or registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// The agent's identity.
    pub identity: AgentIdentity,
    /// How to reach the agent.
    pub endpoint: EndpointInfo,
    /// Free-form capability strings, in declaration order.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Which adapter's protocol this agent speaks.
    pub protocol: Protocol,
    /// When this record was last refreshed.
    pub last_seen: DateTime<Utc>,
    /// Free-form health status, typically `healthy`/`degraded`/`unknown`.
    #[serde(default = "default_health_status")]
    pub health_status: String,
    /// Adapter-supplied metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

fn default_health_status() -> String {
    "unknown".to_string()
}

impl AgentInfo {
    /// Builds a freshly-discovered agent record with `last_seen` set to now.
    #[must_use]
    pub fn new(identity: AgentIdentity, endpoint: EndpointInfo, protocol: Protocol) -> Self {
        Self {
            identity,
            endpoint,
            capabilities: Vec::new(),
            protocol,
            last_seen: Utc::now(),
            health_status: default_health_status(),
            metadata: None,
        }
    }

    /// Returns the agent's id, a shorthand for `identity.id`.
    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.identity.id
    }
}

/// Where an installable adapter package comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallSourceKind {
    /// An npm package.
    Npm,
    /// A git repository.
    Git,
    /// A plain download URL.
    Url,
    /// A path already present on the local filesystem.
    Local,
}

/// How to materialize a package on disk and invoke it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDescriptor {
    /// The kind of source the package comes from.
    pub source_type: InstallSourceKind,
    /// The source string itself (package name, repo URL, download URL, or local path).
    pub source: String,
    /// Executable name to invoke after install, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_name: Option<String>,
    /// Arguments passed to the binary on launch.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Environment variables to set when launching.
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// An installable adapter bundle, as persisted by the package manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPackage {
    /// Catalog key; unique per package manager instance.
    pub name: String,
    /// Package version string.
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Protocols this package's adapter(s) support.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Candidate endpoints the installed adapter may expose.
    #[serde(default)]
    pub endpoints: Vec<EndpointInfo>,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// How to install and launch the package.
    pub install: InstallDescriptor,
    /// Permissions granted to the package.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Dependency name -> version constraint.
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
}

/// The semantic role of a [`UniversalMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Expects a response.
    Request,
    /// Answers an earlier request.
    Response,
    /// Fire-and-forget notification.
    Event,
    /// One frame of an ongoing stream.
    Stream,
}

/// The hub's canonical, self-describing message envelope.
///
/// Self-describing means an intermediate component never needs prior schema
/// agreement: the envelope carries its own protocol hint, action, and
/// payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalMessage {
    /// Unique id for this message.
    pub id: MessageId,
    /// Correlation id across an entire hop chain.
    #[serde(rename = "trace_id")]
    pub trace_id: String,
    /// Per-hop identifier, assigned fresh at each routing hop.
    #[serde(rename = "span_id")]
    pub span_id: String,
    /// The sender's `span_id` at the previous hop; empty on ingress.
    #[serde(rename = "parent_span")]
    pub parent_span: String,
    /// Originating agent.
    pub from: AgentIdentity,
    /// Destination agent.
    pub to: AgentIdentity,
    /// Id of the message this one answers, if any.
    #[serde(rename = "reply_to", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// Transport hint only; does not affect routing decisions.
    pub protocol: Protocol,
    /// The envelope's semantic role.
    #[serde(rename = "message_type")]
    pub message_type: MessageType,
    /// Semantic verb, e.g. `"ping"`, `"deploy"`.
    pub action: String,
    /// Opaque application payload.
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    /// Free-form metadata; also the landing spot for unknown ingress fields
    /// that must be preserved through a routing hop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// Request-scoped string context (auth, tenant, etc.).
    #[serde(default)]
    pub context: HashMap<String, String>,
    /// Set exactly once, by the hub, at `send_message` entry.
    pub timestamp: DateTime<Utc>,
    /// Optional expiry after which the envelope should be dropped undelivered.
    #[serde(rename = "expires_at", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UniversalMessage {
    /// Starts building a message from `from` to `to` with the given action.
    ///
    /// `trace_id` is left empty; the router assigns one on ingress if still
    /// empty, per the trace propagation rule in the routing spec. `timestamp`
    /// is a placeholder until `send_message` overwrites it.
    #[must_use]
    pub fn builder(
        from: AgentIdentity,
        to: AgentIdentity,
        protocol: Protocol,
        message_type: MessageType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            trace_id: String::new(),
            span_id: String::new(),
            parent_span: String::new(),
            from,
            to,
            reply_to: None,
            protocol,
            message_type,
            action: action.into(),
            payload: HashMap::new(),
            metadata: None,
            context: HashMap::new(),
            timestamp: Utc::now(),
            expires_at: None,
        }
    }

    /// Applies the hub's trace propagation rule for one routing hop:
    /// assign a `trace_id` if missing, set `parent_span` to the previous
    /// `span_id`, and assign a fresh `span_id` for this hop.
    pub fn propagate_trace(&mut self) {
        if self.trace_id.is_empty() {
            self.trace_id = uuid::Uuid::new_v4().to_string();
        }
        self.parent_span = std::mem::take(&mut self.span_id);
        self.span_id = uuid::Uuid::new_v4().to_string();
    }

    /// True once `expires_at` has passed relative to `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> AgentIdentity {
        AgentIdentity::new(AgentId::try_new(id).unwrap(), id, "1.0.0")
    }

    #[test]
    fn propagate_trace_assigns_missing_trace_id() {
        let mut msg = UniversalMessage::builder(
            identity("a"),
            identity("b"),
            Protocol::try_new("stdio").unwrap(),
            MessageType::Request,
            "ping",
        );
        assert!(msg.trace_id.is_empty());
        msg.propagate_trace();
        assert!(!msg.trace_id.is_empty());
        assert!(msg.parent_span.is_empty());
        assert!(!msg.span_id.is_empty());
    }

    #[test]
    fn propagate_trace_chains_parent_span() {
        let mut msg = UniversalMessage::builder(
            identity("a"),
            identity("b"),
            Protocol::try_new("stdio").unwrap(),
            MessageType::Request,
            "ping",
        );
        msg.propagate_trace();
        let first_span = msg.span_id.clone();
        msg.propagate_trace();
        assert_eq!(msg.parent_span, first_span);
        assert_ne!(msg.span_id, first_span);
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = UniversalMessage::builder(
            identity("a"),
            identity("b"),
            Protocol::try_new("websocket").unwrap(),
            MessageType::Event,
            "notify",
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: UniversalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.action, msg.action);
    }

    #[test]
    fn expiry_check_uses_inclusive_cutoff() {
        let mut msg = UniversalMessage::builder(
            identity("a"),
            identity("b"),
            Protocol::try_new("stdio").unwrap(),
            MessageType::Event,
            "tick",
        );
        let now = Utc::now();
        msg.expires_at = Some(now);
        assert!(msg.is_expired_at(now));
        assert!(!msg.is_expired_at(now - chrono::Duration::seconds(1)));
    }
}
