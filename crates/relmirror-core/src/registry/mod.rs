//! Plugin-based backend registry
//!
//! Maps configuration type names to factories so the daemon can build its
//! origin, object store and package store without hard-coded branches.
//!
//! ## Registration
//!
//! Plugin crates expose a `register` function:
//!
//! ```rust,ignore
//! // In the relmirror-origin-github crate
//! pub fn register(registry: &BackendRegistry) {
//!     registry.register_origin("github", Box::new(GithubOriginFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{ObjectStoreConfig, OriginConfig, PackageStoreConfig};
use crate::error::{Error, Result};
use crate::state::{FilePackageStoreFactory, MemoryObjectStoreFactory, MemoryPackageStoreFactory};
use crate::traits::{ObjectStore, ObjectStoreFactory, OriginApi, OriginFactory, PackageStore, PackageStoreFactory};

/// Backend registry for plugin-based collaborator creation
///
/// ## Thread Safety
///
/// Interior mutability with `RwLock`: concurrent lookups, exclusive
/// registration.
#[derive(Default)]
pub struct BackendRegistry {
    origins: RwLock<HashMap<String, Box<dyn OriginFactory>>>,
    object_stores: RwLock<HashMap<String, Box<dyn ObjectStoreFactory>>>,
    package_stores: RwLock<HashMap<String, Arc<dyn PackageStoreFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the in-core backends
    ///
    /// Registers the `memory` and `file` package stores and the `memory`
    /// object store.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_package_store("memory", Box::new(MemoryPackageStoreFactory));
        registry.register_package_store("file", Box::new(FilePackageStoreFactory));
        registry.register_object_store("memory", Box::new(MemoryObjectStoreFactory));
        registry
    }

    /// Register an origin factory (e.g. "github")
    pub fn register_origin(&self, name: impl Into<String>, factory: Box<dyn OriginFactory>) {
        self.origins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Register an object store factory (e.g. "filesystem")
    pub fn register_object_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ObjectStoreFactory>,
    ) {
        self.object_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    /// Register a package store factory (e.g. "file")
    pub fn register_package_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn PackageStoreFactory>,
    ) {
        self.package_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::from(factory));
    }

    /// Create an origin from configuration
    pub fn create_origin(&self, config: &OriginConfig) -> Result<Box<dyn OriginApi>> {
        let origin_type = config.type_name();
        let origins = self.origins.read().unwrap_or_else(PoisonError::into_inner);

        let factory = origins
            .get(origin_type)
            .ok_or_else(|| Error::config(format!("Unknown origin type: {}", origin_type)))?;

        factory.create(config)
    }

    /// Create an object store from configuration
    pub fn create_object_store(&self, config: &ObjectStoreConfig) -> Result<Box<dyn ObjectStore>> {
        let store_type = config.type_name();
        let stores = self
            .object_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = stores
            .get(store_type)
            .ok_or_else(|| Error::config(format!("Unknown object store type: {}", store_type)))?;

        factory.create(config)
    }

    /// Create a package store from configuration
    pub async fn create_package_store(
        &self,
        config: &PackageStoreConfig,
    ) -> Result<Box<dyn PackageStore>> {
        let store_type = config.type_name();

        // the lock must not be held across the await
        let factory = self
            .package_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown package store type: {}", store_type)))?;

        factory.create(config).await
    }

    /// List registered origin types
    pub fn list_origins(&self) -> Vec<String> {
        sorted_keys(&self.origins)
    }

    /// List registered object store types
    pub fn list_object_stores(&self) -> Vec<String> {
        sorted_keys(&self.object_stores)
    }

    /// List registered package store types
    pub fn list_package_stores(&self) -> Vec<String> {
        sorted_keys(&self.package_stores)
    }

    pub fn has_origin(&self, name: &str) -> bool {
        self.origins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

fn sorted_keys<V>(map: &RwLock<HashMap<String, V>>) -> Vec<String> {
    let mut keys: Vec<String> = map
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    keys.sort();
    keys
}
