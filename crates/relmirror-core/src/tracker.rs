//! Package tracking and retrieval
//!
//! The operations clients reach through the (external) transport layer:
//!
//! - [`PackageTracker::ensure_tracked`]: start mirroring an `owner/repo`
//! - [`PackageTracker::report_install`] / [`PackageTracker::report_update`]:
//!   feed the popularity counters the scheduler ranks packages by
//! - [`PackageTracker::download_link`]: a short-lived URL for the mirrored
//!   asset matching a client's platform

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::Error;
use crate::config::validate_name;
use crate::model::{
    Arch, InteractionKind, PackageStatistics, Platform, PlatformSet, SyncJobArgs, TrackedPackage,
    object_key,
};
use crate::selector::SelectorProfile;
use crate::traits::{JobScheduler, ObjectStore, OriginApi, PackageStore, ReleaseFetch};

/// Default lifetime of download links
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(5 * 60);

/// Front door for tracking, popularity reports and downloads
pub struct PackageTracker {
    origin: Arc<dyn OriginApi>,
    store: Arc<dyn PackageStore>,
    objects: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn JobScheduler>,
    selector: Arc<SelectorProfile>,
}

impl PackageTracker {
    pub fn new(
        origin: Arc<dyn OriginApi>,
        store: Arc<dyn PackageStore>,
        objects: Arc<dyn ObjectStore>,
        scheduler: Arc<dyn JobScheduler>,
        selector: SelectorProfile,
    ) -> Self {
        Self {
            origin,
            store,
            objects,
            scheduler,
            selector: Arc::new(selector),
        }
    }

    /// Start tracking `owner/repo` unless it already is
    ///
    /// A new package records the latest release's timestamp (so it can be
    /// scheduled) but no version, so the first sync republishes the current
    /// release. Its statistics start with one install and its first sync is
    /// armed immediately. `platforms` seeds the supported platforms and the
    /// per-platform dependency entries.
    pub async fn ensure_tracked(
        &self,
        owner: &str,
        repo: &str,
        platforms: PlatformSet,
    ) -> Result<TrackedPackage, Error> {
        validate_name("owner", owner)?;
        validate_name("repository", repo)?;

        if let Some(existing) = self.store.find_package(owner, repo).await? {
            debug!("{} is already tracked", existing.slug());
            return Ok(existing);
        }

        let release = match self.origin.latest_release(owner, repo, None).await? {
            ReleaseFetch::Fetched { release, .. } => release,
            ReleaseFetch::NotModified => {
                return Err(Error::origin(format!(
                    "{} answered 'not modified' to an unconditional request for {}/{}",
                    self.origin.origin_name(),
                    owner,
                    repo
                )));
            }
        };

        let mut package = TrackedPackage::new(owner, repo);
        package.last_released = Some(release.published_at);
        package.supported_platforms = platforms;
        for platform in platforms.iter() {
            package.dependencies.insert(platform, BTreeSet::new());
        }

        if let Err(e) = self.store.insert_package(&package).await {
            // lost a race with a concurrent request for the same pair
            if let Some(existing) = self.store.find_package(owner, repo).await? {
                return Ok(existing);
            }
            return Err(e);
        }

        let mut stats = PackageStatistics::new(package.id);
        stats.track(InteractionKind::Install, Utc::now(), 1);
        self.store.save_statistics(&stats).await?;

        self.scheduler
            .arm(SyncJobArgs::new(package.id), Utc::now())
            .await?;

        info!(
            "Tracking {} (latest release {} at {})",
            package.slug(),
            release.tag,
            release.published_at
        );
        Ok(package)
    }

    /// Count one or more installs of `owner/repo`
    pub async fn report_install(&self, owner: &str, repo: &str, amount: u64) -> Result<(), Error> {
        self.report(owner, repo, InteractionKind::Install, amount)
            .await
    }

    /// Count one or more updates of `owner/repo`
    pub async fn report_update(&self, owner: &str, repo: &str, amount: u64) -> Result<(), Error> {
        self.report(owner, repo, InteractionKind::Update, amount)
            .await
    }

    async fn report(
        &self,
        owner: &str,
        repo: &str,
        kind: InteractionKind,
        amount: u64,
    ) -> Result<(), Error> {
        let package = self.require(owner, repo).await?;
        self.store
            .record_interaction(package.id, kind, Utc::now(), amount)
            .await
    }

    /// Short-lived read URL for the asset mirrored for `platform`/`arch`
    ///
    /// Among the names mapped to the platform, the strict selector picks the
    /// one for `arch`; when none matches the first mapped name is used.
    pub async fn download_link(
        &self,
        owner: &str,
        repo: &str,
        platform: Platform,
        arch: Arch,
        ttl: Duration,
    ) -> Result<String, Error> {
        let package = self.require(owner, repo).await?;

        let names: Vec<&str> = package
            .release_assets
            .get(&platform)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let Some(first) = names.first().copied() else {
            return Err(Error::not_found(format!(
                "no {} asset mirrored for {}",
                platform,
                package.slug()
            )));
        };

        let asset = match self.selector.select_best(&names, platform, arch, true).first() {
            Some(best) => **best,
            None => {
                warn!(
                    "No {}/{} match among {:?} for {}, using {}",
                    platform,
                    arch,
                    names,
                    package.slug(),
                    first
                );
                first
            }
        };

        self.objects
            .presign_read(&object_key(&package.owner, &package.repo, asset), ttl)
            .await
    }

    async fn require(&self, owner: &str, repo: &str) -> Result<TrackedPackage, Error> {
        self.store
            .find_package(owner, repo)
            .await?
            .ok_or_else(|| Error::not_found(format!("{}/{} is not tracked", owner, repo)))
    }
}
