//! Contract for local, encrypted-at-rest key/value persistence. Backs
//! the Internal Store Adapter's task/comment records and the default
//! Task-claim Registry (spec §9: "Worktree and claim handles are scoped
//! resources" — the claim *records* themselves still need somewhere
//! durable to live between heartbeats).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by a [`Store`] implementation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("entry not found for key: {key}")]
    NotFound { key: String },
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Minimal encrypted-at-rest key/value contract used by adapters and the
/// claim registry.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests. Masks values with a fixed XOR byte so
/// tests can assert plaintext never touches the backing map, the same
/// convention used by the real encrypted store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(key.to_string(), mask(value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        let masked = map.get(key).cloned().ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        Ok(mask(&masked))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_masks_and_unmasks() {
        let store = InMemoryStore::new();
        store.put("k", b"secret").await.expect("put");
        let got = store.get("k").await.expect("get");
        assert_eq!(got, b"secret");
        let inner = store.inner.lock().unwrap();
        assert_ne!(inner.get("k").unwrap(), b"secret");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.put("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
