// # Package Store Trait
//
// Persistence for tracked packages and their popularity statistics.
//
// ## Ownership
//
// The store owns every `TrackedPackage` and `PackageStatistics`. Callers load
// a copy per operation and save it back when the operation ends.
//
// ## Implementations
//
// - In-memory: [`crate::state::MemoryPackageStore`]
// - JSON file: [`crate::state::FilePackageStore`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{InteractionKind, PackageStatistics, PopularitySnapshot, TrackedPackage};

/// Trait for package store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently. Interaction increments for
/// different packages must not block each other on anything wider than the
/// store's own write path.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Load a package by id
    async fn get_package(&self, id: Uuid) -> Result<Option<TrackedPackage>, crate::Error>;

    /// Load a package by its `owner/repo` pair
    async fn find_package(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<TrackedPackage>, crate::Error>;

    /// Insert a new package
    ///
    /// Fails with `InvalidInput` if another package already uses the same
    /// `owner/repo` pair.
    async fn insert_package(&self, package: &TrackedPackage) -> Result<(), crate::Error>;

    /// Replace a stored package
    async fn save_package(&self, package: &TrackedPackage) -> Result<(), crate::Error>;

    /// Page through package ids in ascending order, starting after `after`
    async fn list_package_ids(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Uuid>, crate::Error>;

    /// Load statistics for a package
    async fn get_statistics(&self, package_id: Uuid)
    -> Result<Option<PackageStatistics>, crate::Error>;

    /// Replace statistics for a package
    async fn save_statistics(&self, stats: &PackageStatistics) -> Result<(), crate::Error>;

    /// Increment one hour bucket of a package's counter
    async fn record_interaction(
        &self,
        package_id: Uuid,
        kind: InteractionKind,
        at: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), crate::Error>;

    /// Count packages whose total interactions exceed `total`
    async fn count_above(&self, total: u64) -> Result<u64, crate::Error>;

    /// Count tracked packages
    async fn count_packages(&self) -> Result<u64, crate::Error>;

    /// Read the popularity inputs for one package at a single consistent point
    ///
    /// The default implementation issues separate reads; stores that can
    /// should override it with a single snapshot.
    async fn popularity(&self, package_id: Uuid) -> Result<PopularitySnapshot, crate::Error> {
        let total_interactions = self
            .get_statistics(package_id)
            .await?
            .map(|s| s.total_interactions())
            .unwrap_or(0);
        let higher = self.count_above(total_interactions).await?;
        let tracked = self.count_packages().await?;
        Ok(PopularitySnapshot {
            total_interactions,
            higher,
            tracked,
        })
    }

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing package stores from configuration
#[async_trait]
pub trait PackageStoreFactory: Send + Sync {
    async fn create(
        &self,
        config: &crate::config::PackageStoreConfig,
    ) -> Result<Box<dyn PackageStore>, crate::Error>;
}
