//! External record store
//!
//! Deployment records live outside the orchestrator process so status survives
//! restarts and can be read by other tooling. [`RecordStore`] is the seam;
//! [`FileStore`] persists one JSON document per record under a directory,
//! [`MemoryStore`] backs tests.

pub mod records;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::errors::OrchestratorError;

/// Keyed JSON document storage for deployment records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Value>, OrchestratorError>;

    async fn set(&self, id: &str, value: Value) -> Result<(), OrchestratorError>;

    async fn delete(&self, id: &str) -> Result<(), OrchestratorError>;
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, OrchestratorError> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn set(&self, id: &str, value: Value) -> Result<(), OrchestratorError> {
        self.entries.write().await.insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), OrchestratorError> {
        self.entries.write().await.remove(id);
        Ok(())
    }
}

/// Directory-backed store: one pretty-printed `<id>.json` per record
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, OrchestratorError> {
        match tokio::fs::read_to_string(self.record_path(id)).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, id: &str, value: Value) -> Result<(), OrchestratorError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let contents = serde_json::to_string_pretty(&value)?;
        tokio::fs::write(self.record_path(id), contents).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), OrchestratorError> {
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.set("a", json!({"x": 1})).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_missing_record_is_none() {
        let dir = std::env::temp_dir().join(format!("steward-store-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir);
        assert_eq!(store.get("nope").await.unwrap(), None);
        // deleting a missing record is not an error
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("steward-store-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir);
        store.set("r1", json!({"status": "running"})).await.unwrap();
        assert_eq!(
            store.get("r1").await.unwrap(),
            Some(json!({"status": "running"}))
        );
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
