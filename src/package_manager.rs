//! Package Manager: installs adapter packages by delegating to whichever
//! adapter advertises install capability, and persists the catalog as
//! `<package_dir>/<name>/package.json`.
//!
//! Grounded on the teacher's `RouterConfig::save_to_file`/`load_from_file`
//! JSON persistence pattern in `message_router/config.rs`, adapted from a
//! single config file to one file per package directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::fs;
use tracing::{info, instrument};

use crate::adapter::Adapter;
use crate::envelope::{AgentInfo, AgentPackage};
use crate::error::HubError;
use crate::events::{EventBus, HubEvent};

/// Behavior the rest of the hub depends on for package installation.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Registers a package in the catalog and persists it to disk.
    async fn add(&self, package: AgentPackage) -> Result<(), HubError>;

    /// Looks up a catalog entry by name.
    async fn get(&self, name: &str) -> Option<AgentPackage>;

    /// Lists every cataloged package.
    async fn list(&self) -> Vec<AgentPackage>;

    /// Installs `name` by finding the highest-`priority()` adapter that both
    /// serves one of the package's protocols and can install, delegating to
    /// it, and registering the resulting agent. Ties are broken by
    /// registration order.
    async fn install(&self, name: &str) -> Result<AgentInfo, HubError>;

    /// Removes `name` from the catalog and deletes its manifest from disk.
    /// Idempotent; returns `Ok(())` even if `name` was already absent.
    async fn uninstall(&self, name: &str) -> Result<(), HubError>;
}

/// Filesystem-backed `PackageManager`. The in-memory catalog is the
/// source of truth for lookups; disk is written through on `add` and read
/// back only at startup via [`FilePackageManager::load_from_disk`].
pub struct FilePackageManager {
    catalog: DashMap<String, AgentPackage>,
    package_dir: PathBuf,
    adapters: Arc<RwLock<Vec<Arc<dyn Adapter>>>>,
    events: Arc<EventBus>,
}

impl FilePackageManager {
    /// Creates a package manager rooted at `package_dir`, consulting the
    /// shared, priority-ordered `adapters` list (kept current by
    /// [`crate::hub::Hub::register_adapter`]) to satisfy installs.
    #[must_use]
    pub fn new(package_dir: impl Into<PathBuf>, adapters: Arc<RwLock<Vec<Arc<dyn Adapter>>>>, events: Arc<EventBus>) -> Self {
        Self { catalog: DashMap::new(), package_dir: package_dir.into(), adapters, events }
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.package_dir.join(name).join("package.json")
    }

    /// Loads every `package.json` found directly under `package_dir/*/`
    /// into the in-memory catalog. Missing directory is treated as empty.
    #[instrument(skip(self))]
    pub async fn load_from_disk(&self) -> Result<usize, HubError> {
        let mut entries = match fs::read_dir(&self.package_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(HubError::InvalidInput {
                    operation: "load_from_disk",
                    reason: e.to_string(),
                })
            }
        };

        let mut loaded = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HubError::InvalidInput { operation: "load_from_disk", reason: e.to_string() })?
        {
            let manifest = entry.path().join("package.json");
            if !manifest.is_file() {
                continue;
            }
            let bytes = fs::read(&manifest)
                .await
                .map_err(|e| HubError::InvalidInput { operation: "load_from_disk", reason: e.to_string() })?;
            let package: AgentPackage = serde_json::from_slice(&bytes)
                .map_err(|e| HubError::InvalidInput { operation: "load_from_disk", reason: e.to_string() })?;
            self.catalog.insert(package.name.clone(), package);
            loaded += 1;
        }
        Ok(loaded)
    }

    async fn write_manifest(path: &Path, package: &AgentPackage) -> Result<(), HubError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HubError::InvalidInput { operation: "add", reason: e.to_string() })?;
        }
        let json = serde_json::to_vec_pretty(package)
            .map_err(|e| HubError::InvalidInput { operation: "add", reason: e.to_string() })?;
        fs::write(path, json)
            .await
            .map_err(|e| HubError::InvalidInput { operation: "add", reason: e.to_string() })?;
        Ok(())
    }
}

#[async_trait]
impl PackageManager for FilePackageManager {
    #[instrument(skip(self, package), fields(name = %package.name))]
    async fn add(&self, package: AgentPackage) -> Result<(), HubError> {
        let path = self.manifest_path(&package.name);
        Self::write_manifest(&path, &package).await?;
        self.catalog.insert(package.name.clone(), package);
        Ok(())
    }

    async fn get(&self, name: &str) -> Option<AgentPackage> {
        self.catalog.get(name).map(|r| r.value().clone())
    }

    async fn list(&self) -> Vec<AgentPackage> {
        self.catalog.iter().map(|r| r.value().clone()).collect()
    }

    #[instrument(skip(self))]
    async fn install(&self, name: &str) -> Result<AgentInfo, HubError> {
        let package = self
            .catalog
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| HubError::NotFound { operation: "install", id: name.to_string() })?;

        let elected = self
            .adapters
            .read()
            .iter()
            .enumerate()
            .filter(|(_, adapter)| {
                if !adapter.can_install() {
                    return false;
                }
                let protocol_str = adapter.protocol().to_string();
                package.protocols.is_empty() || package.protocols.iter().any(|p| p == &protocol_str)
            })
            .max_by_key(|(idx, adapter)| (adapter.priority(), std::cmp::Reverse(*idx)))
            .map(|(_, adapter)| adapter.clone());

        let Some(adapter) = elected else {
            return Err(HubError::NoInstaller { name: name.to_string() });
        };

        let protocol = adapter.protocol();
        let info = adapter.install(&package.install).await?;
        info!(package = %name, protocol = %protocol, "package installed");
        self.events
            .publish(HubEvent::package_installed(name.to_string(), package.version.clone()))
            .await;
        Ok(info)
    }

    #[instrument(skip(self))]
    async fn uninstall(&self, name: &str) -> Result<(), HubError> {
        if let Some((_, package)) = self.catalog.remove(name) {
            let dir = self.package_dir.join(name);
            if dir.is_dir() {
                fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| HubError::InvalidInput { operation: "uninstall", reason: e.to_string() })?;
            }
            self.events
                .publish(HubEvent::package_uninstalled(name.to_string(), package.version))
                .await;
        }
        Ok(())
    }
}
