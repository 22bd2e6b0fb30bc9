// # Memory Package Store
//
// In-memory implementation of PackageStore.
//
// ## Purpose
//
// Fast, non-persistent storage for tests, demos and short-lived mirrors.
// Every tracked package and its statistics are lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::table::PackageTable;
use crate::Error;
use crate::config::PackageStoreConfig;
use crate::model::{InteractionKind, PackageStatistics, PopularitySnapshot, TrackedPackage};
use crate::traits::{PackageStore, PackageStoreFactory};

/// In-memory package store implementation
///
/// Packages and statistics share one `RwLock`, so a popularity snapshot is
/// read under a single guard.
///
/// # Example
///
/// ```rust,no_run
/// use relmirror_core::model::TrackedPackage;
/// use relmirror_core::state::MemoryPackageStore;
/// use relmirror_core::traits::PackageStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryPackageStore::new();
///
///     let package = TrackedPackage::new("acme", "tool");
///     store.insert_package(&package).await?;
///
///     let found = store.find_package("acme", "tool").await?;
///     assert_eq!(found.map(|p| p.id), Some(package.id));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryPackageStore {
    inner: Arc<RwLock<PackageTable>>,
}

impl MemoryPackageStore {
    /// Create a new empty memory package store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of tracked packages
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PackageStore for MemoryPackageStore {
    async fn get_package(&self, id: Uuid) -> Result<Option<TrackedPackage>, Error> {
        Ok(self.inner.read().await.get(id))
    }

    async fn find_package(&self, owner: &str, repo: &str) -> Result<Option<TrackedPackage>, Error> {
        Ok(self.inner.read().await.find(owner, repo))
    }

    async fn insert_package(&self, package: &TrackedPackage) -> Result<(), Error> {
        self.inner.write().await.insert(package)
    }

    async fn save_package(&self, package: &TrackedPackage) -> Result<(), Error> {
        self.inner.write().await.save(package)
    }

    async fn list_package_ids(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Uuid>, Error> {
        Ok(self.inner.read().await.list_ids(after, limit))
    }

    async fn get_statistics(&self, package_id: Uuid) -> Result<Option<PackageStatistics>, Error> {
        Ok(self.inner.read().await.statistics(package_id))
    }

    async fn save_statistics(&self, stats: &PackageStatistics) -> Result<(), Error> {
        self.inner.write().await.save_statistics(stats)
    }

    async fn record_interaction(
        &self,
        package_id: Uuid,
        kind: InteractionKind,
        at: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), Error> {
        self.inner.write().await.record(package_id, kind, at, amount)
    }

    async fn count_above(&self, total: u64) -> Result<u64, Error> {
        Ok(self.inner.read().await.count_above(total))
    }

    async fn count_packages(&self) -> Result<u64, Error> {
        Ok(self.inner.read().await.len() as u64)
    }

    async fn popularity(&self, package_id: Uuid) -> Result<PopularitySnapshot, Error> {
        Ok(self.inner.read().await.popularity(package_id))
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for the `memory` package store type
pub struct MemoryPackageStoreFactory;

#[async_trait]
impl PackageStoreFactory for MemoryPackageStoreFactory {
    async fn create(&self, _config: &PackageStoreConfig) -> Result<Box<dyn PackageStore>, Error> {
        Ok(Box::new(MemoryPackageStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryPackageStore::new();
        assert!(store.is_empty().await);

        let mut package = TrackedPackage::new("acme", "tool");
        store.insert_package(&package).await.unwrap();
        assert_eq!(store.len().await, 1);

        package.version = Some("v1.0.0".to_string());
        store.save_package(&package).await.unwrap();

        let loaded = store.get_package(package.id).await.unwrap().unwrap();
        assert_eq!(loaded.version.as_deref(), Some("v1.0.0"));

        let found = store.find_package("ACME", "Tool").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(package.id));
    }

    #[tokio::test]
    async fn test_owner_repo_pair_is_unique() {
        let store = MemoryPackageStore::new();
        store.insert_package(&TrackedPackage::new("acme", "tool")).await.unwrap();

        let duplicate = TrackedPackage::new("acme", "tool");
        let err = store.insert_package(&duplicate).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_save_unknown_package_is_not_found() {
        let store = MemoryPackageStore::new();
        let err = store
            .save_package(&TrackedPackage::new("acme", "tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_package_ids_pages_in_order() {
        let store = MemoryPackageStore::new();
        for i in 0..5 {
            store
                .insert_package(&TrackedPackage::new("acme", format!("tool{}", i)))
                .await
                .unwrap();
        }

        let first = store.list_package_ids(None, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        let rest = store.list_package_ids(first.last().copied(), 3).await.unwrap();
        assert_eq!(rest.len(), 2);

        let mut all = first.clone();
        all.extend(rest);
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);
    }

    #[tokio::test]
    async fn test_record_interaction_and_popularity() {
        let store = MemoryPackageStore::new();
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 8, 15, 0).unwrap();

        let popular = TrackedPackage::new("acme", "popular");
        let quiet = TrackedPackage::new("acme", "quiet");
        store.insert_package(&popular).await.unwrap();
        store.insert_package(&quiet).await.unwrap();

        store
            .record_interaction(popular.id, InteractionKind::Install, at, 5)
            .await
            .unwrap();
        store
            .record_interaction(popular.id, InteractionKind::Update, at, 2)
            .await
            .unwrap();
        store
            .record_interaction(quiet.id, InteractionKind::Install, at, 1)
            .await
            .unwrap();

        let stats = store.get_statistics(popular.id).await.unwrap().unwrap();
        assert_eq!(stats.total_interactions(), 7);

        assert_eq!(store.count_above(1).await.unwrap(), 1);
        assert_eq!(store.count_packages().await.unwrap(), 2);

        let snapshot = store.popularity(quiet.id).await.unwrap();
        assert_eq!(snapshot.higher, 1);
        assert_eq!(snapshot.tracked, 2);
        assert!((snapshot.percentile() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_record_for_unknown_package_fails() {
        let store = MemoryPackageStore::new();
        let err = store
            .record_interaction(Uuid::new_v4(), InteractionKind::Install, Utc::now(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
