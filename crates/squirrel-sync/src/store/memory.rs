//! In-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::Store;
use crate::error::{StoreError, StoreResult};

/// Blobs kept in a map. All data is lost when dropped.
///
/// Used by tests and as the cloud side of a dry run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a text blob.
    pub fn with_text(self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.blobs.write().insert(path.into(), text.into().into_bytes());
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.read().contains_key(path)
    }

    /// Remove a blob, returning whether it existed.
    pub fn remove(&self, path: &str) -> bool {
        self.blobs.write().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.blobs
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        self.blobs.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} blobs)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let store = MemoryStore::new();
        store.writes("hoard", "{}").await.unwrap();
        assert_eq!(store.reads("hoard").await.unwrap(), "{}");
        assert!(store.contains("hoard"));
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.reads("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_binary_not_text() {
        let store = MemoryStore::new();
        store.write("bin", &[0xff, 0xfe]).await.unwrap();
        assert!(matches!(store.reads("bin").await, Err(StoreError::NotText(_))));
        assert_eq!(store.read("bin").await.unwrap(), vec![0xff, 0xfe]);
    }

    #[test]
    fn test_seed_and_remove() {
        let store = MemoryStore::new().with_text("a", "x");
        assert_eq!(store.len(), 1);
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.is_empty());
    }
}
