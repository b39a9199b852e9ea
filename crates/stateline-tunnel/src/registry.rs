//! Local tunnel process registry
//!
//! Tracks live tunnel endpoints in a JSON file under the caller-supplied
//! cache directory. The registry is a kind-local cache owned by the tunnel
//! operations; the remote control plane stays the source of truth for the
//! tunnels themselves. A missing or empty file reads as an empty registry,
//! and writes keep a one-deep backup of the previous state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{CoreError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const REGISTRY_FILE: &str = "tunnels.json";
const REGISTRY_BACKUP: &str = "tunnels.json.backup";
const REGISTRY_VERSION: u32 = 1;

/// One locally tracked tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelEntry {
    pub tunnel_id: String,
    /// Pid of the local connector process, when one is running.
    pub connector_pid: Option<u32>,
    pub registered_at: DateTime<Utc>,
}

impl TunnelEntry {
    pub fn new(tunnel_id: impl Into<String>) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            connector_pid: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.connector_pid = Some(pid);
        self
    }
}

/// On-disk registry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Entries keyed by tunnel name.
    pub tunnels: HashMap<String, TunnelEntry>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            updated_at: Utc::now(),
            tunnels: HashMap::new(),
        }
    }
}

/// Reads and writes the registry file.
pub struct TunnelRegistry {
    dir: PathBuf,
}

impl TunnelRegistry {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Default registry location under the user cache directory.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|cache| cache.join("stateline").join("tunnels"))
    }

    fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_BACKUP)
    }

    /// Load the registry, treating a missing file as empty.
    pub async fn load(&self) -> Result<RegistryState> {
        let path = self.registry_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "registry file not found, starting empty");
            return Ok(RegistryState::default());
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::cache("load", e))?;
        if content.trim().is_empty() {
            return Ok(RegistryState::default());
        }
        serde_json::from_str(&content).map_err(|e| CoreError::cache("load", e))
    }

    /// Save the registry, keeping the previous file as a backup.
    pub async fn save(&self, state: &RegistryState) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| CoreError::cache("save", e))?;
        }

        let path = self.registry_path();
        if path.exists() {
            let backup = self.backup_path();
            if backup.exists() {
                fs::remove_file(&backup)
                    .await
                    .map_err(|e| CoreError::cache("save", e))?;
            }
            fs::rename(&path, &backup)
                .await
                .map_err(|e| CoreError::cache("save", e))?;
        }

        let content =
            serde_json::to_string_pretty(state).map_err(|e| CoreError::cache("save", e))?;
        fs::write(&path, content)
            .await
            .map_err(|e| CoreError::cache("save", e))?;

        tracing::debug!(tunnels = state.tunnels.len(), "registry saved");
        Ok(())
    }

    /// Record a tunnel endpoint under its name.
    pub async fn register(&self, name: &str, entry: TunnelEntry) -> Result<()> {
        let mut state = self.load().await?;
        state.tunnels.insert(name.to_string(), entry);
        state.updated_at = Utc::now();
        self.save(&state).await
    }

    /// Drop a tunnel endpoint. Unknown names are a no-op.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut state = self.load().await?;
        if state.tunnels.remove(name).is_some() {
            state.updated_at = Utc::now();
            self.save(&state).await?;
        }
        Ok(())
    }

    /// Look up one entry by tunnel name.
    pub async fn entry(&self, name: &str) -> Result<Option<TunnelEntry>> {
        Ok(self.load().await?.tunnels.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let registry = TunnelRegistry::new(dir.path());

        let state = registry.load().await.unwrap();
        assert!(state.tunnels.is_empty());
    }

    #[tokio::test]
    async fn register_then_unregister_round_trips() {
        let dir = tempdir().unwrap();
        let registry = TunnelRegistry::new(dir.path());

        registry
            .register("bastion", TunnelEntry::new("tun-1234").with_pid(4242))
            .await
            .unwrap();

        let entry = registry.entry("bastion").await.unwrap().unwrap();
        assert_eq!(entry.tunnel_id, "tun-1234");
        assert_eq!(entry.connector_pid, Some(4242));

        registry.unregister("bastion").await.unwrap();
        assert!(registry.entry("bastion").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saving_twice_keeps_a_backup() {
        let dir = tempdir().unwrap();
        let registry = TunnelRegistry::new(dir.path());

        registry
            .register("bastion", TunnelEntry::new("tun-1"))
            .await
            .unwrap();
        registry
            .register("relay", TunnelEntry::new("tun-2"))
            .await
            .unwrap();

        assert!(dir.path().join(REGISTRY_FILE).exists());
        assert!(dir.path().join(REGISTRY_BACKUP).exists());
    }

    #[tokio::test]
    async fn unregistering_an_unknown_name_is_a_no_op() {
        let dir = tempdir().unwrap();
        let registry = TunnelRegistry::new(dir.path());
        registry.unregister("ghost").await.unwrap();
        assert!(!dir.path().join(REGISTRY_FILE).exists());
    }
}
