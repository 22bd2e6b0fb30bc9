// # Object Store Trait
//
// Blob storage the mirror republishes release assets into.
//
// Keys are always `{owner}/{repo}/{asset_name}` (see [`crate::model::object_key`]),
// the layout the download-link path expects.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Trait for object store implementations
///
/// # Thread Safety
///
/// Implementations are shared across concurrent sync passes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the bytes read from `body` under `key`, replacing any previous object
    async fn put(
        &self,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, crate::Error>;

    /// Produce a read URL for `key` that expires after `ttl`
    async fn presign_read(&self, key: &str, ttl: Duration) -> Result<String, crate::Error>;

    /// Store name used in logs
    fn store_name(&self) -> &'static str;
}

/// Helper trait for constructing object stores from configuration
pub trait ObjectStoreFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::ObjectStoreConfig,
    ) -> Result<Box<dyn ObjectStore>, crate::Error>;
}
