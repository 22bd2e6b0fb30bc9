// # Memory Object Store
//
// In-memory implementation of ObjectStore for tests and demos.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

use crate::Error;
use crate::config::ObjectStoreConfig;
use crate::traits::{ObjectStore, ObjectStoreFactory};

/// Object store that keeps every object in a `HashMap`
///
/// Read links have the form `memory://{key}?expires={unix_seconds}`.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes stored under `key`
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// Every stored key, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64, Error> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes)
            .await
            .map_err(|e| Error::object_store(format!("Failed to read body for {}: {}", key, e)))?;

        let len = bytes.len() as u64;
        self.objects.write().await.insert(key.to_string(), bytes);
        tracing::trace!("Stored {} bytes under {}", len, key);
        Ok(len)
    }

    async fn presign_read(&self, key: &str, ttl: Duration) -> Result<String, Error> {
        if !self.objects.read().await.contains_key(key) {
            return Err(Error::not_found(format!("object {}", key)));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::invalid_input(format!("ttl out of range: {}", e)))?;
        let expires = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::invalid_input("ttl puts the link expiry out of range"))?
            .timestamp();
        Ok(format!("memory://{}?expires={}", key, expires))
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory for the `memory` object store type
pub struct MemoryObjectStoreFactory;

impl ObjectStoreFactory for MemoryObjectStoreFactory {
    fn create(&self, _config: &ObjectStoreConfig) -> Result<Box<dyn ObjectStore>, Error> {
        Ok(Box::new(MemoryObjectStore::new()))
    }
}
