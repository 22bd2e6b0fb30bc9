// # Package Table
//
// The in-memory shape shared by the memory and file package stores. Holding
// packages and statistics in one value lets a store answer popularity
// queries under a single lock guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use uuid::Uuid;

use crate::Error;
use crate::model::{InteractionKind, PackageStatistics, PopularitySnapshot, TrackedPackage};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PackageTable {
    #[serde(default)]
    packages: BTreeMap<Uuid, TrackedPackage>,
    #[serde(default)]
    statistics: BTreeMap<Uuid, PackageStatistics>,
}

impl PackageTable {
    pub(crate) fn len(&self) -> usize {
        self.packages.len()
    }

    pub(crate) fn get(&self, id: Uuid) -> Option<TrackedPackage> {
        self.packages.get(&id).cloned()
    }

    pub(crate) fn find(&self, owner: &str, repo: &str) -> Option<TrackedPackage> {
        self.packages
            .values()
            .find(|p| same_pair(p, owner, repo))
            .cloned()
    }

    fn check_unique(&self, package: &TrackedPackage) -> Result<(), Error> {
        let taken = self
            .packages
            .values()
            .any(|p| p.id != package.id && same_pair(p, &package.owner, &package.repo));
        if taken {
            return Err(Error::invalid_input(format!(
                "{} is already tracked",
                package.slug()
            )));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, package: &TrackedPackage) -> Result<(), Error> {
        if self.packages.contains_key(&package.id) {
            return Err(Error::invalid_input(format!(
                "package id {} already exists",
                package.id
            )));
        }
        self.check_unique(package)?;
        self.packages.insert(package.id, package.clone());
        Ok(())
    }

    pub(crate) fn save(&mut self, package: &TrackedPackage) -> Result<(), Error> {
        if !self.packages.contains_key(&package.id) {
            return Err(Error::not_found(format!("package {}", package.id)));
        }
        self.check_unique(package)?;
        self.packages.insert(package.id, package.clone());
        Ok(())
    }

    pub(crate) fn list_ids(&self, after: Option<Uuid>, limit: usize) -> Vec<Uuid> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        self.packages
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn statistics(&self, package_id: Uuid) -> Option<PackageStatistics> {
        self.statistics.get(&package_id).cloned()
    }

    pub(crate) fn save_statistics(&mut self, stats: &PackageStatistics) -> Result<(), Error> {
        if !self.packages.contains_key(&stats.package_id) {
            return Err(Error::not_found(format!("package {}", stats.package_id)));
        }
        self.statistics.insert(stats.package_id, stats.clone());
        Ok(())
    }

    pub(crate) fn record(
        &mut self,
        package_id: Uuid,
        kind: InteractionKind,
        at: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), Error> {
        if !self.packages.contains_key(&package_id) {
            return Err(Error::not_found(format!("package {}", package_id)));
        }
        self.statistics
            .entry(package_id)
            .or_insert_with(|| PackageStatistics::new(package_id))
            .track(kind, at, amount);
        Ok(())
    }

    fn total(&self, package_id: &Uuid) -> u64 {
        self.statistics
            .get(package_id)
            .map(|s| s.total_interactions())
            .unwrap_or(0)
    }

    pub(crate) fn count_above(&self, total: u64) -> u64 {
        self.packages
            .keys()
            .filter(|id| self.total(id) > total)
            .count() as u64
    }

    pub(crate) fn popularity(&self, package_id: Uuid) -> PopularitySnapshot {
        if !self.statistics.contains_key(&package_id) {
            tracing::warn!("No statistics for package {}, ranking it as unused", package_id);
        }
        let total_interactions = self.total(&package_id);
        PopularitySnapshot {
            total_interactions,
            higher: self.count_above(total_interactions),
            tracked: self.packages.len() as u64,
        }
    }
}

fn same_pair(package: &TrackedPackage, owner: &str, repo: &str) -> bool {
    package.owner.eq_ignore_ascii_case(owner) && package.repo.eq_ignore_ascii_case(repo)
}
