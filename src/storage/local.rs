//! Local filesystem storage implementation.
//!
//! Keeps the whole state mapping in a single JSON document. Writes go to a
//! sibling `.tmp` file which is then renamed over the target, so a crash
//! never leaves a half-written state file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::storage::{StateFile, StateStorage};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage writing to the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.ensure_dir().await?;

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(&bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.read_bytes().await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateStorage for LocalStorage {
    async fn load(&self) -> Result<Option<StateFile>> {
        self.read_json().await
    }

    async fn save(&self, snapshots: &HashMap<String, Snapshot>) -> Result<()> {
        let document = StateFile::new(snapshots);
        self.write_json(&document)
            .await
            .map_err(|e| AppError::persistence(format!("{}: {}", self.path.display(), e)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionRecord;
    use tempfile::TempDir;

    fn record(token: &str) -> PositionRecord {
        PositionRecord {
            token: token.to_string(),
            size: "$100.00".into(),
            net_value: "$20.00".into(),
            collateral: "$20.00".into(),
            entry_price: "$50,000.00".into(),
            mark_price: "$50,100.00".into(),
            liquidation_price: "$45,500.00".into(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("state.json"));

        let mut snapshots = HashMap::new();
        snapshots.insert("https://example.com/a".to_string(), vec![record("BTC 10x")]);
        snapshots.insert("https://example.com/b".to_string(), vec![]);
        storage.save(&snapshots).await.unwrap();

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded.targets.len(), 2);
        assert_eq!(loaded.targets["https://example.com/a"][0].token, "BTC 10x");
        assert!(loaded.targets["https://example.com/b"].is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("nope.json"));
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let storage = LocalStorage::new(&path);
        assert!(matches!(storage.load().await, Err(AppError::Json(_))));
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("nested/dir/state.json"));
        storage.save(&HashMap::new()).await.unwrap();

        assert!(tmp.path().join("nested/dir/state.json").exists());
        assert!(!tmp.path().join("nested/dir/state.tmp").exists());
    }
}
