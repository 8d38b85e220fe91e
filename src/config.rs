//! Hub-wide configuration, with JSON persistence matching the style of
//! the package manager's manifests.
//!
//! Grounded on the teacher's `RouterConfig` (`message_router/config.rs`):
//! a plain struct with `Default`, a builder-style constructor, a `validate`
//! pass, and `save_to_file`/`load_from_file` helpers around `serde_json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::domain_types::{ChannelCapacity, MaxReconnectAttempts, ReconnectDelayMs};
use crate::error::HubError;

/// Top-level tunables for a running hub. Recognized JSON keys match the
/// documented configuration surface: `name`, `namespace`, `logLevel`,
/// `metricsEnabled`, `autoDetectEnabled`, `autoDetectInterval`, `packageDir`,
/// `cacheDir`, `maxConnections`, `reconnectEnabled`, and
/// `circuitBreaker.{failureThreshold,recoveryTimeout,halfOpenRequests}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Identifies this hub instance in logs and events.
    pub name: String,
    /// Optional namespace new agents are scoped to by default.
    pub namespace: Option<String>,
    /// `tracing` filter directive applied at startup (e.g. `"info"`, `"debug"`).
    #[serde(rename = "logLevel")]
    pub log_level: String,
    /// Whether the hub publishes metrics-relevant events at all.
    #[serde(rename = "metricsEnabled")]
    pub metrics_enabled: bool,
    /// Whether the Detection Manager's background sweep loop runs.
    #[serde(rename = "autoDetectEnabled")]
    pub auto_detect_enabled: bool,
    /// How often the Detection Manager sweeps all adapters, in milliseconds.
    #[serde(rename = "autoDetectInterval")]
    pub detection_interval_ms: u64,
    /// How often the hub samples connection health, in milliseconds.
    pub health_check_interval_ms: u64,
    /// Default subscriber channel capacity for newly created routes.
    pub default_channel_capacity: ChannelCapacity,
    /// Default breaker tuning for new connections.
    #[serde(rename = "circuitBreaker")]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Whether connections automatically reconnect after a failure.
    #[serde(rename = "reconnectEnabled")]
    pub reconnect_enabled: bool,
    /// Default reconnect attempt budget for new connections.
    pub max_reconnect_attempts: MaxReconnectAttempts,
    /// Default delay between reconnect attempts.
    pub reconnect_delay_ms: ReconnectDelayMs,
    /// Upper bound on concurrently tracked connections.
    #[serde(rename = "maxConnections")]
    pub max_connections: usize,
    /// Directory package manifests are persisted under.
    #[serde(rename = "packageDir")]
    pub package_dir: PathBuf,
    /// Directory for transient/derived data (detection caches, etc.).
    #[serde(rename = "cacheDir")]
    pub cache_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: "agent-hub".to_string(),
            namespace: None,
            log_level: "info".to_string(),
            metrics_enabled: true,
            auto_detect_enabled: true,
            detection_interval_ms: 30_000,
            health_check_interval_ms: 10_000,
            default_channel_capacity: ChannelCapacity::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            reconnect_enabled: true,
            max_reconnect_attempts: MaxReconnectAttempts::default(),
            reconnect_delay_ms: ReconnectDelayMs::default(),
            max_connections: 1024,
            package_dir: default_home_dir().join(".pryx").join("packages"),
            cache_dir: default_home_dir().join(".pryx").join("cache"),
        }
    }
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}

impl HubConfig {
    /// Creates a configuration optimized for local debugging: frequent
    /// detection/health sweeps for fast feedback, verbose logging, and a
    /// small connection ceiling.
    #[must_use]
    pub fn development() -> Self {
        Self {
            name: "agent-hub-dev".to_string(),
            log_level: "debug".to_string(),
            detection_interval_ms: 5_000,
            health_check_interval_ms: 2_000,
            max_connections: 64,
            ..Self::default()
        }
    }

    /// Creates a configuration tuned for production: longer sweep intervals
    /// to reduce overhead, a larger connection ceiling, and quieter logging.
    #[must_use]
    pub fn production() -> Self {
        Self {
            name: "agent-hub".to_string(),
            log_level: "warn".to_string(),
            detection_interval_ms: 60_000,
            health_check_interval_ms: 30_000,
            max_connections: 4096,
            ..Self::default()
        }
    }

    /// Creates a configuration suitable for automated tests: fast sweeps,
    /// reconnection disabled so failures surface immediately, and
    /// directories that default to the system temp dir rather than `$HOME`.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            name: "agent-hub-test".to_string(),
            log_level: "trace".to_string(),
            metrics_enabled: false,
            auto_detect_enabled: false,
            detection_interval_ms: 100,
            health_check_interval_ms: 100,
            reconnect_enabled: false,
            max_connections: 16,
            package_dir: std::env::temp_dir().join("agent-hub-test").join("packages"),
            cache_dir: std::env::temp_dir().join("agent-hub-test").join("cache"),
            ..Self::default()
        }
    }

    /// Starts a builder seeded with [`HubConfig::development`] defaults.
    #[must_use]
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::new()
    }

    /// Rejects configurations with a zero-length interval, which would spin
    /// the detection or health loop at full CPU.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.detection_interval_ms == 0 {
            return Err(HubError::InvalidInput {
                operation: "HubConfig::validate",
                reason: "detection_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.health_check_interval_ms == 0 {
            return Err(HubError::InvalidInput {
                operation: "HubConfig::validate",
                reason: "health_check_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(HubError::InvalidInput {
                operation: "HubConfig::validate",
                reason: "max_connections must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Loads configuration from a JSON file.
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self, HubError> {
        let bytes = tokio::fs::read(path.as_ref())
            .await
            .map_err(|e| HubError::InvalidInput { operation: "load_from_file", reason: e.to_string() })?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| HubError::InvalidInput { operation: "load_from_file", reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Persists configuration to a JSON file, creating parent directories as needed.
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), HubError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HubError::InvalidInput { operation: "save_to_file", reason: e.to_string() })?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| HubError::InvalidInput { operation: "save_to_file", reason: e.to_string() })?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| HubError::InvalidInput { operation: "save_to_file", reason: e.to_string() })?;
        Ok(())
    }
}

/// Builder for custom hub configurations, seeded with
/// [`HubConfig::development`] defaults.
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    /// Creates a new builder starting from development defaults.
    #[must_use]
    pub fn new() -> Self {
        Self { config: HubConfig::development() }
    }

    /// Sets the hub's name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the default namespace new agents are scoped to.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = Some(namespace.into());
        self
    }

    /// Sets the `tracing` filter directive applied at startup.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Enables or disables the Detection Manager's background sweep loop.
    #[must_use]
    pub fn auto_detect_enabled(mut self, enable: bool) -> Self {
        self.config.auto_detect_enabled = enable;
        self
    }

    /// Sets the detection sweep interval, in milliseconds.
    #[must_use]
    pub fn detection_interval_ms(mut self, interval: u64) -> Self {
        self.config.detection_interval_ms = interval;
        self
    }

    /// Sets the connection health sampling interval, in milliseconds.
    #[must_use]
    pub fn health_check_interval_ms(mut self, interval: u64) -> Self {
        self.config.health_check_interval_ms = interval;
        self
    }

    /// Sets the default subscriber channel capacity.
    #[must_use]
    pub fn default_channel_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.config.default_channel_capacity = capacity;
        self
    }

    /// Sets the default circuit breaker tuning for new connections.
    #[must_use]
    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = breaker;
        self
    }

    /// Enables or disables automatic reconnection.
    #[must_use]
    pub fn reconnect_enabled(mut self, enable: bool) -> Self {
        self.config.reconnect_enabled = enable;
        self
    }

    /// Sets the default reconnect attempt budget for new connections.
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: MaxReconnectAttempts) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the default delay between reconnect attempts.
    #[must_use]
    pub fn reconnect_delay_ms(mut self, delay: ReconnectDelayMs) -> Self {
        self.config.reconnect_delay_ms = delay;
        self
    }

    /// Sets the upper bound on concurrently tracked connections.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Sets the directory package manifests are persisted under.
    #[must_use]
    pub fn package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.package_dir = dir.into();
        self
    }

    /// Sets the directory for transient/derived data.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Finalizes the builder, validating the resulting configuration.
    pub fn build(self) -> Result<HubConfig, HubError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for HubConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_detection_interval_is_rejected() {
        let mut config = HubConfig::default();
        config.detection_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.json");
        let config = HubConfig::default();
        config.save_to_file(&path).await.unwrap();
        let loaded = HubConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.detection_interval_ms, config.detection_interval_ms);
    }

    #[test]
    fn serializes_recognized_camel_case_keys() {
        let json = serde_json::to_value(HubConfig::default()).unwrap();
        for key in [
            "name", "namespace", "logLevel", "metricsEnabled", "autoDetectEnabled",
            "autoDetectInterval", "packageDir", "cacheDir", "maxConnections", "reconnectEnabled",
            "circuitBreaker",
        ] {
            assert!(json.get(key).is_some(), "missing recognized key {key}");
        }
        let breaker = json.get("circuitBreaker").unwrap();
        for key in ["failureThreshold", "recoveryTimeout", "halfOpenRequests"] {
            assert!(breaker.get(key).is_some(), "missing circuitBreaker key {key}");
        }
    }

    #[test]
    fn development_production_and_testing_presets_validate() {
        assert!(HubConfig::development().validate().is_ok());
        assert!(HubConfig::production().validate().is_ok());
        assert!(HubConfig::testing().validate().is_ok());
    }

    #[test]
    fn testing_preset_disables_reconnect_and_detection() {
        let config = HubConfig::testing();
        assert!(!config.reconnect_enabled);
        assert!(!config.auto_detect_enabled);
    }

    #[test]
    fn production_preset_allows_more_connections_than_development() {
        assert!(HubConfig::production().max_connections > HubConfig::development().max_connections);
    }

    #[test]
    fn builder_overrides_development_defaults() {
        let config = HubConfig::builder()
            .name("custom-hub")
            .max_connections(10)
            .reconnect_enabled(false)
            .build()
            .unwrap();
        assert_eq!(config.name, "custom-hub");
        assert_eq!(config.max_connections, 10);
        assert!(!config.reconnect_enabled);
    }

    #[test]
    fn builder_rejects_invalid_overrides() {
        let err = HubConfig::builder().max_connections(0).build();
        assert!(err.is_err());
    }
}
