//! Per-target snapshot state.
//!
//! The [`StateStore`] keeps the last accepted snapshot of every target in
//! memory. When a [`StateStorage`] backend is attached, the whole mapping is
//! written out after every mutation.
//!
//! ## Absent vs. empty
//!
//! - absent (`get` returns `None`): the target was never initialized
//! - present but empty: the target was initialized and holds no positions
//!
//! ## Document Layout
//!
//! ```text
//! {
//!   "updated_at": "2026-01-01T00:00:00Z",
//!   "targets": {
//!     "https://...": [ { "token": "BTC 10.00x", "size": "$100.00", ... } ]
//!   }
//! }
//! ```

pub mod local;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Snapshot;

// Re-export for convenience
pub use local::LocalStorage;

/// Persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateFile {
    /// ISO 8601 timestamp of last write
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Target URL to its snapshot
    #[serde(default)]
    pub targets: BTreeMap<String, Snapshot>,
}

impl StateFile {
    pub fn new(snapshots: &HashMap<String, Snapshot>) -> Self {
        Self {
            updated_at: Some(Utc::now()),
            targets: snapshots
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Trait for durable state backends.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Load the persisted document, `None` when nothing was written yet.
    async fn load(&self) -> Result<Option<StateFile>>;

    /// Replace the persisted document with `snapshots`.
    async fn save(&self, snapshots: &HashMap<String, Snapshot>) -> Result<()>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// In-memory snapshot map with optional write-through persistence.
///
/// The in-memory map is authoritative; persistence is best effort.
#[derive(Default)]
pub struct StateStore {
    snapshots: HashMap<String, Snapshot>,
    backend: Option<Arc<dyn StateStorage>>,
}

impl StateStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store backed by `backend`, seeded from whatever it holds.
    ///
    /// A missing or unreadable document yields an empty store and a warning.
    pub async fn durable(backend: Arc<dyn StateStorage>) -> Self {
        let snapshots = match backend.load().await {
            Ok(Some(file)) => {
                log::info!(
                    "Loaded state for {} targets from {}",
                    file.targets.len(),
                    backend.describe()
                );
                file.targets.into_iter().collect()
            }
            Ok(None) => {
                log::warn!("No state file at {}; starting empty", backend.describe());
                HashMap::new()
            }
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable state file {}: {}; starting empty",
                    backend.describe(),
                    e
                );
                HashMap::new()
            }
        };

        Self {
            snapshots,
            backend: Some(backend),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.backend.is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Snapshot> {
        self.snapshots.get(key)
    }

    /// Number of known targets (absent ones excluded).
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Known keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.snapshots.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Replace the snapshot for `key`.
    pub async fn set(&mut self, key: &str, snapshot: Snapshot) {
        self.snapshots.insert(key.to_string(), snapshot);
        self.persist().await;
    }

    /// Mark `key` as initialized with no open positions.
    pub async fn clear(&mut self, key: &str) {
        self.snapshots.insert(key.to_string(), Vec::new());
        self.persist().await;
    }

    /// Forget `key` entirely, returning whether it was known.
    pub async fn remove(&mut self, key: &str) -> bool {
        let removed = self.snapshots.remove(key).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Forget every target; only used by an explicit reset.
    pub async fn remove_all(&mut self) -> usize {
        let count = self.snapshots.len();
        self.snapshots.clear();
        self.persist().await;
        count
    }

    /// Write the current mapping, reporting failures to the caller.
    pub async fn flush(&self) -> Result<()> {
        match &self.backend {
            Some(backend) => backend.save(&self.snapshots).await,
            None => Ok(()),
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.flush().await {
            log::error!("State not persisted, keeping in-memory copy: {}", e);
        }
    }
}
