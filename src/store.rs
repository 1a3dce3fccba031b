//! Persistence for the registry and the destination set.
//!
//! The on-disk layout keeps two top-level entries: `notification_groups`, an
//! ordered list of destination ids, and `monitored_groups`, an ordered list of
//! `"source:destination"` pairs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// The persisted form of the registry state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub notification_groups: Vec<String>,
    #[serde(default)]
    pub monitored_groups: Vec<String>,
}

impl PersistedState {
    /// Builds the persisted form from destinations and ordered monitor pairs.
    pub fn from_parts(destinations: &[String], monitors: &[(String, String)]) -> Self {
        Self {
            notification_groups: destinations.to_vec(),
            monitored_groups: monitors
                .iter()
                .map(|(source, destination)| format!("{}:{}", source, destination))
                .collect(),
        }
    }

    /// Decodes the monitor entries into ordered `(source, destination)` pairs.
    ///
    /// Malformed entries are skipped. A repeated source keeps its first
    /// position and takes the later destination.
    pub fn monitor_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(self.monitored_groups.len());
        for entry in &self.monitored_groups {
            let Some((source, destination)) = entry.split_once(':') else {
                warn!(entry = %entry, "Skipping malformed monitor entry");
                continue;
            };
            let (source, destination) = (source.trim(), destination.trim());
            if source.is_empty() || destination.is_empty() {
                warn!(entry = %entry, "Skipping monitor entry with an empty id");
                continue;
            }
            match pairs.iter_mut().find(|(s, _)| s == source) {
                Some(existing) => existing.1 = destination.to_string(),
                None => pairs.push((source.to_string(), destination.to_string())),
            }
        }
        pairs
    }
}

/// A configuration store for the registry state.
///
/// `save` must not return before the state is durable.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState>;
    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Stores the state as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<PersistedState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let state: PersistedState = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Failed to parse state file {:?}", self.path))?;
                debug!(path = ?self.path, "Loaded state file");
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?self.path, "State file not found, starting with an empty registry");
                Ok(PersistedState::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read state file {:?}", self.path)),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let temp_path = self.temp_path();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create {:?}", temp_path))?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace state file {:?}", self.path))?;
        debug!(path = ?self.path, "Saved state file");
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use super::{PersistedState, StateStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    /// An in-memory store that counts saves and can be told to fail.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        state: Mutex<PersistedState>,
        saves: AtomicUsize,
        fail_saves: AtomicBool,
    }

    impl MemoryStore {
        pub fn new(state: PersistedState) -> Self {
            Self {
                state: Mutex::new(state),
                ..Default::default()
            }
        }

        /// The most recently saved state.
        pub fn snapshot(&self) -> PersistedState {
            self.state.lock().unwrap().clone()
        }

        pub fn save_count(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        pub fn set_fail_saves(&self, fail: bool) {
            self.fail_saves.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StateStore for MemoryStore {
        async fn load(&self) -> Result<PersistedState> {
            Ok(self.snapshot())
        }

        async fn save(&self, state: &PersistedState) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                anyhow::bail!("simulated save failure");
            }
            *self.state.lock().unwrap() = state.clone();
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
