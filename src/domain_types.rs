//! Strongly-typed domain primitives shared across the hub.
//!
//! Wrapping primitives in `nutype` types prevents accidentally swapping an
//! agent id for a protocol name or passing an out-of-range circuit breaker
//! threshold; validation happens once, at construction, rather than being
//! re-checked at every call site.

use nutype::nutype;
use std::time::Duration;
use uuid::Uuid;

/// Opaque, hub-unique handle for an agent. Free-form but non-empty.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Clone, Debug, Eq, PartialEq, Hash, Display, Serialize, Deserialize)
)]
pub struct AgentId(String);

/// Stable identifier for a protocol name (`"websocket"`, `"stdio"`, ...).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Clone, Debug, Eq, PartialEq, Hash, Display, Serialize, Deserialize)
)]
pub struct Protocol(String);

/// Multi-tenant partition on agent identity. Never affects routing directly.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Clone, Debug, Eq, PartialEq, Hash, Display, Serialize, Deserialize)
)]
pub struct Namespace(String);

/// Unique identifier for a live connection (distinct from the agent id it serves).
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random connection id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for an envelope.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Bounded capacity for a subscriber's fan-out channel.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 256
)]
pub struct ChannelCapacity(usize);

impl ChannelCapacity {
    /// Returns the capacity as a plain `usize` for use with `tokio::sync::mpsc`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Number of consecutive failures a circuit breaker tolerates before opening.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 5
)]
pub struct FailureThreshold(u32);

impl FailureThreshold {
    /// Returns the threshold as `u32`.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Wall-clock duration a breaker stays open before probing again, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3_600_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 30_000
)]
pub struct RecoveryTimeoutMs(u64);

impl RecoveryTimeoutMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Number of consecutive successful probes required to close a half-open breaker.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 3
)]
pub struct HalfOpenRequests(u32);

impl HalfOpenRequests {
    /// Returns the quota as `u32`.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Maximum reconnect attempts before a connection becomes terminally `failed`.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 100),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 5
)]
pub struct MaxReconnectAttempts(u32);

impl MaxReconnectAttempts {
    /// Returns the attempt budget as `u32`.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Delay between reconnect attempts, in milliseconds.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 600_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 1_000
)]
pub struct ReconnectDelayMs(u64);

impl ReconnectDelayMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_rejects_empty() {
        assert!(AgentId::try_new("").is_err());
        assert!(AgentId::try_new("  ").is_err());
    }

    #[test]
    fn agent_id_trims_whitespace() {
        let id = AgentId::try_new("  a1  ").unwrap();
        assert_eq!(id.to_string(), "a1");
    }

    #[test]
    fn channel_capacity_has_sane_default() {
        assert_eq!(ChannelCapacity::default().as_usize(), 256);
    }

    #[test]
    fn recovery_timeout_converts_to_duration() {
        let t = RecoveryTimeoutMs::try_new(30_000).unwrap();
        assert_eq!(t.as_duration(), Duration::from_secs(30));
    }
}
