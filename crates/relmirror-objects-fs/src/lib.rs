// # Filesystem Object Store
//
// Stores republished assets as plain files under a root directory that a
// web server exposes at `base_url`. Read links carry an expiry and an
// HMAC-SHA256 signature the serving side checks with the same key:
//
// ```text
// {base_url}/{owner}/{repo}/{asset}?expires={unix}&signature={hex}
// signature = HMAC-SHA256(signing_key, "{key}\n{expires}")
// ```
//
// Each path segment is percent-encoded in the link; the signature covers the
// decoded key.
//
// Writes go to a temporary sibling first and are renamed into place, so a
// reader never sees a half-written object.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use relmirror_core::config::ObjectStoreConfig;
use relmirror_core::traits::{ObjectStore, ObjectStoreFactory};
use relmirror_core::{Error, Result};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncRead;

type HmacSha256 = Hmac<Sha256>;

/// Bytes escaped inside one URL path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Object store backed by a local directory
pub struct FsObjectStore {
    root: PathBuf,
    base_url: String,
    /// ⚠️ NEVER log this value
    signing_key: Vec<u8>,
}

impl std::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsObjectStore")
            .field("root", &self.root)
            .field("base_url", &self.base_url)
            .field("signing_key", &"<REDACTED>")
            .finish()
    }
}

impl FsObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        base_url: impl Into<String>,
        signing_key: impl AsRef<[u8]>,
    ) -> Result<Self> {
        let signing_key = signing_key.as_ref().to_vec();
        if signing_key.is_empty() {
            return Err(Error::config("Object store signing key cannot be empty"));
        }

        Ok(Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_key,
        })
    }

    /// Resolve a key to a path below the root
    ///
    /// Only plain relative components are accepted.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::invalid_input(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    /// Hex HMAC over the key and expiry
    pub fn signature(&self, key: &str, expires: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| Error::object_store(format!("Failed to create HMAC: {}", e)))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a link's signature and expiry, for the serving side
    pub fn verify(&self, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.signing_key) else {
            return false;
        };
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac.verify_slice(&raw).is_ok()
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            uuid::Uuid::new_v4().simple()
        ));

        let written = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            let written = tokio::io::copy(body, &mut file).await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;

        let written = match written {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(Error::object_store(format!("Failed to write {}: {}", key, e)));
            }
        };

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::object_store(format!("Failed to store {}: {}", key, e)));
        }

        tracing::debug!("Stored {} ({} bytes)", key, written);
        Ok(written)
    }

    async fn presign_read(&self, key: &str, ttl: Duration) -> Result<String> {
        let path = self.path_for(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::not_found(format!("No object stored at {}", key)));
        }

        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        let signature = self.signature(key, expires)?;

        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.base_url,
            encode_key(key),
            expires,
            signature
        ))
    }

    fn store_name(&self) -> &'static str {
        "filesystem"
    }
}

/// Factory for creating filesystem object stores
pub struct FsObjectStoreFactory;

impl ObjectStoreFactory for FsObjectStoreFactory {
    fn create(&self, config: &ObjectStoreConfig) -> Result<Box<dyn ObjectStore>> {
        match config {
            ObjectStoreConfig::Filesystem {
                root,
                base_url,
                signing_key,
            } => {
                std::fs::create_dir_all(root)?;
                Ok(Box::new(FsObjectStore::new(
                    root.clone(),
                    base_url.clone(),
                    signing_key,
                )?))
            }
            _ => Err(Error::config("Invalid config for filesystem object store")),
        }
    }
}

/// Register the filesystem object store with a registry
pub fn register(registry: &relmirror_core::BackendRegistry) {
    registry.register_object_store("filesystem", Box::new(FsObjectStoreFactory));
}
