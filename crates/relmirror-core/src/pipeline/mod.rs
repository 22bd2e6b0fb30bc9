//! # Sync Pipeline
//!
//! One synchronization pass for one tracked package:
//!
//! 1. Load the package; an unknown id ends the pass without error
//! 2. Conditionally fetch the latest release with the stored entity tag
//! 3. "Not modified" only refreshes `last_polled`
//! 4. A new tag republishes every asset: download into a private working
//!    area, unpack archives, inspect ELF binaries for shared libraries, upload
//!    the original bytes to `{owner}/{repo}/{asset}`
//! 5. Map assets to platforms with the strict selector and commit the new
//!    version
//!
//! ## Atomicity
//!
//! Nothing is persisted for a new release unless every asset was republished.
//! If any asset fails the pass returns [`Error::PartialRelease`] and the stored
//! record (version, entity tag, mapping, `last_polled`) is left untouched, so
//! the next firing retries the whole release.
//!
//! ## Cleanup
//!
//! Working areas are [`tempfile::TempDir`]s. They are removed when dropped,
//! which covers success, error returns and cancellation of the pass. Archive
//! unpacking runs on the blocking pool; a cancelled pass still waits for it
//! (it stops at the next archive entry) so nothing writes into a working
//! area after it is gone.

pub mod archive;

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Error;
use crate::config::SyncConfig;
use crate::inspect::{BinaryKind, DependencyExtractor, find_executables};
use crate::model::{Arch, Platform, PlatformSet, Release, ReleaseAsset, TrackedPackage, object_key};
use crate::selector::SelectorProfile;
use crate::traits::{ObjectStore, OriginApi, PackageStore, ReleaseFetch};
use archive::ArchiveKind;

/// What a completed pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No package has the requested id
    PackageMissing,
    /// The origin answered "not modified"
    NotModified,
    /// The origin returned the release already mirrored
    UpToDate { tag: String },
    /// A new release was republished
    Updated { tag: String, assets: usize },
}

/// Result of republishing one asset
#[derive(Debug)]
struct AssetReport {
    name: String,
    bytes: u64,
    /// Libraries required by the ELF binaries found inside, if the asset was unpacked
    linux_dependencies: Option<BTreeSet<String>>,
}

/// Runs synchronization passes
///
/// Cloning is cheap; every collaborator is shared.
#[derive(Clone)]
pub struct SyncPipeline {
    origin: Arc<dyn OriginApi>,
    objects: Arc<dyn ObjectStore>,
    store: Arc<dyn PackageStore>,
    extractor: Arc<dyn DependencyExtractor>,
    selector: Arc<SelectorProfile>,
    config: Arc<SyncConfig>,
}

impl SyncPipeline {
    pub fn new(
        origin: Arc<dyn OriginApi>,
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn PackageStore>,
        extractor: Arc<dyn DependencyExtractor>,
        selector: SelectorProfile,
        config: SyncConfig,
    ) -> Self {
        Self {
            origin,
            objects,
            store,
            extractor,
            selector: Arc::new(selector),
            config: Arc::new(config),
        }
    }

    /// Run one pass for `package_id`
    pub async fn sync(
        &self,
        package_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome, Error> {
        let Some(mut package) = self.store.get_package(package_id).await? else {
            tracing::error!("Cannot find package with id {}", package_id);
            return Ok(SyncOutcome::PackageMissing);
        };
        let slug = package.slug();

        let fetch = cancellable(
            &cancel,
            self.origin
                .latest_release(&package.owner, &package.repo, package.etag.as_deref()),
        )
        .await?;

        let (release, etag) = match fetch {
            ReleaseFetch::NotModified => {
                tracing::info!("{} is already up to date", slug);
                package.last_polled = Some(Utc::now());
                self.store.save_package(&package).await?;
                return Ok(SyncOutcome::NotModified);
            }
            ReleaseFetch::Fetched { release, etag } => (release, etag),
        };

        if package.version.as_deref() == Some(release.tag.as_str()) {
            tracing::info!("{} still at {}", slug, release.tag);
            if etag.is_some() {
                package.etag = etag;
            }
            package.last_polled = Some(Utc::now());
            self.store.save_package(&package).await?;
            return Ok(SyncOutcome::UpToDate { tag: release.tag });
        }

        tracing::info!(
            "{}: new release {} (was {}), {} assets",
            slug,
            release.tag,
            package.version.as_deref().unwrap_or("none"),
            release.assets.len()
        );

        let reports = self.republish(&package, &release, &cancel).await?;
        let assets = reports.len();

        self.commit(&mut package, &release, etag, reports);
        self.store.save_package(&package).await?;

        tracing::info!("{}: mirrored {} with {} assets", slug, release.tag, assets);
        Ok(SyncOutcome::Updated {
            tag: release.tag,
            assets,
        })
    }

    /// Process every asset, at most `max_concurrent_assets` at a time
    async fn republish(
        &self,
        package: &TrackedPackage,
        release: &Release,
        cancel: &CancellationToken,
    ) -> Result<Vec<AssetReport>, Error> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_assets));
        let mut tasks = JoinSet::new();

        for asset in release.assets.iter().cloned() {
            let this = self.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let key = object_key(&package.owner, &package.repo, &asset.name);

            tasks.spawn(async move {
                let name = asset.name.clone();
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => this.process_asset(asset, key, cancel).await,
                    Err(_) => Err(Error::cancelled("asset permits closed")),
                };
                (name, result)
            });
        }

        let mut reports = Vec::with_capacity(release.assets.len());
        let mut failed = Vec::new();

        // drained fully so every working area is gone before returning
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => {
                    tracing::debug!("Republished {} ({} bytes)", report.name, report.bytes);
                    reports.push(report);
                }
                Ok((name, Err(e))) => {
                    if !e.is_cancelled() {
                        tracing::error!("Asset {} of {} failed: {}", name, release.tag, e);
                    }
                    failed.push(name);
                }
                Err(e) => {
                    tracing::error!("Asset task for {} failed: {}", release.tag, e);
                    failed.push("<unknown>".to_string());
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!(
                "sync of {} cancelled",
                package.slug()
            )));
        }

        if !failed.is_empty() {
            failed.sort();
            return Err(Error::PartialRelease {
                tag: release.tag.clone(),
                failed,
            });
        }

        Ok(reports)
    }

    /// Download, inspect and upload one asset inside its own working area
    async fn process_asset(
        &self,
        asset: ReleaseAsset,
        key: String,
        cancel: CancellationToken,
    ) -> Result<AssetReport, Error> {
        let root = self.config.work_root();
        let work = tempfile::Builder::new().prefix("relmirror-").tempdir_in(&root)?;

        let download_path = work.path().join(local_file_name(&asset.name));

        let timeout = self.config.download_timeout();
        let download = async {
            match tokio::time::timeout(timeout, self.origin.download_asset(&asset, &download_path))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::origin(format!(
                    "download of {} timed out after {:?}",
                    asset.name, timeout
                ))),
            }
        };
        let bytes = cancellable(&cancel, download).await?;

        tracing::debug!("Downloaded {} ({} bytes)", asset.name, bytes);

        let linux_dependencies = match ArchiveKind::detect(&asset.name) {
            Some(kind) => Some(
                self.inspect_archive(kind, &work, &download_path, &asset.name, &cancel)
                    .await?,
            ),
            None => None,
        };

        let mut file = tokio::fs::File::open(&download_path).await?;
        let uploaded = cancellable(&cancel, self.objects.put(&key, &mut file)).await?;
        tracing::debug!("Uploaded {} to {} ({} bytes)", asset.name, key, uploaded);

        Ok(AssetReport {
            name: asset.name,
            bytes: uploaded,
            linux_dependencies,
        })
    }

    /// Unpack an archive and collect the shared libraries of its ELF binaries
    ///
    /// A broken archive only loses the dependency information; the asset is
    /// still uploaded.
    async fn inspect_archive(
        &self,
        kind: ArchiveKind,
        work: &TempDir,
        archive_path: &Path,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>, Error> {
        let extract_dir = work.path().join(format!("extract-{}", Uuid::new_v4().simple()));

        let mut task = {
            let archive_path = archive_path.to_path_buf();
            let extract_dir = extract_dir.clone();
            let name = name.to_string();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                match archive::extract(kind, &archive_path, &extract_dir, &cancel) {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => return Vec::new(),
                    Err(e) => {
                        tracing::warn!("Cannot unpack {}: {}", name, e);
                        return Vec::new();
                    }
                }
                if cancel.is_cancelled() {
                    return Vec::new();
                }
                find_executables(&extract_dir)
            })
        };

        // the blocking side writes into `work`, so it is joined on every path
        let executables = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = (&mut task).await;
                return Err(Error::cancelled(format!("unpacking of {} cancelled", name)));
            }
            joined = &mut task => joined?,
        };

        let mut dependencies = BTreeSet::new();
        for executable in executables.iter().filter(|e| e.kind == BinaryKind::Elf) {
            let libs = self.extractor.extract(&executable.path, cancel.clone()).await;
            tracing::debug!(
                "{}: {} needs {:?}",
                name,
                relative_display(&extract_dir, &executable.path),
                libs
            );
            dependencies.extend(libs);
        }

        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("inspection of {} cancelled", name)));
        }

        Ok(dependencies)
    }

    /// Fold a fully republished release into the package record
    fn commit(
        &self,
        package: &mut TrackedPackage,
        release: &Release,
        etag: Option<String>,
        reports: Vec<AssetReport>,
    ) {
        // only an existing Linux entry is extended
        if let Some(linux) = package.dependencies.get_mut(&Platform::Linux) {
            for report in &reports {
                if let Some(deps) = &report.linux_dependencies {
                    linux.extend(deps.iter().cloned());
                }
            }
        }

        let mapping = self.map_assets(&release.assets);
        let mapped: PlatformSet = mapping.keys().copied().collect();
        for (platform, names) in &mapping {
            tracing::debug!("{}: {} -> {:?}", package.slug(), platform, names);
        }

        package.release_assets = mapping;
        package.supported_platforms = package.supported_platforms.union(mapped);
        package.version = Some(release.tag.clone());
        package.last_released = Some(release.published_at);
        if etag.is_some() {
            package.etag = etag;
        }
        package.last_polled = Some(Utc::now());
    }

    /// Strict selector matches for every platform, unioned over architectures
    pub fn map_assets(&self, assets: &[ReleaseAsset]) -> BTreeMap<Platform, BTreeSet<String>> {
        let mut mapping: BTreeMap<Platform, BTreeSet<String>> = BTreeMap::new();
        for platform in Platform::ALL {
            for arch in Arch::ALL {
                for asset in self.selector.select_best(assets, platform, arch, true) {
                    mapping
                        .entry(platform)
                        .or_default()
                        .insert(asset.name.clone());
                }
            }
        }
        mapping
    }
}

/// Await `fut` unless `cancel` fires first
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled("sync pass cancelled")),
        result = fut => result,
    }
}

/// File name an asset is downloaded to inside its working area
fn local_file_name(asset_name: &str) -> PathBuf {
    match Path::new(asset_name).file_name() {
        Some(name) if name != ".." => PathBuf::from(name),
        _ => PathBuf::from("asset"),
    }
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
