//! Blob store abstraction.
//!
//! Entries are immutable: the request path only ever calls `get` and `put`, and
//! every writer for a given key is expected to produce the same bytes.

use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read cache entry `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write cache entry `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove cache entry `{path}`: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to scan cache directory `{path}`: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("blocking cache task did not complete: {0}")]
    Task(String),
}

/// Persistent key-to-blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Return the exact bytes stored under `key`, or `None` when absent.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError>;

    /// Store `bytes` under `key`. Either the whole blob becomes visible or
    /// nothing does.
    async fn put(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError>;
}

/// Process-local store, used when persistence is not wanted.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<CacheKey, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.read("contains").contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Values are inserted whole, so a poisoned map is still consistent.
    fn read(&self, op: &'static str) -> RwLockReadGuard<'_, HashMap<CacheKey, Bytes>> {
        self.blobs.read().unwrap_or_else(|poisoned| {
            warn!(
                target = "meshx::cache::store",
                op,
                result = "poisoned_recovered",
                "Recovered from poisoned blob map lock"
            );
            poisoned.into_inner()
        })
    }

    fn write(&self, op: &'static str) -> RwLockWriteGuard<'_, HashMap<CacheKey, Bytes>> {
        self.blobs.write().unwrap_or_else(|poisoned| {
            warn!(
                target = "meshx::cache::store",
                op,
                result = "poisoned_recovered",
                "Recovered from poisoned blob map lock"
            );
            poisoned.into_inner()
        })
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self.read("get").get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError> {
        self.write("put").insert(key.clone(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_bytes() {
        let store = MemoryBlobStore::new();
        let key = CacheKey::derive("Hello", "ackaisyo.ttf");

        assert!(store.get(&key).await.expect("get").is_none());
        store
            .put(&key, Bytes::from_static(&[0x01, 0x02, 0x03]))
            .await
            .expect("put");

        let stored = store.get(&key).await.expect("get").expect("present");
        assert_eq!(&stored[..], &[0x01u8, 0x02, 0x03]);
        assert!(store.contains(&key));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_keeps_empty_blobs() {
        let store = MemoryBlobStore::new();
        let key = CacheKey::derive("empty", "");

        store.put(&key, Bytes::new()).await.expect("put");

        let stored = store.get(&key).await.expect("get").expect("present");
        assert!(stored.is_empty());
    }
}
