//! Test doubles and fixtures for the contract tests
//!
//! The doubles record what the engine asks of its collaborators so tests can
//! assert on calls, not just on results.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use relmirror_core::config::{JobConfig, SyncConfig};
use relmirror_core::error::{Error, Result};
use relmirror_core::inspect::DependencyExtractor;
use relmirror_core::job::{JobPlanner, JobRunner};
use relmirror_core::model::{Platform, Release, ReleaseAsset, SyncJobArgs, TrackedPackage};
use relmirror_core::pipeline::SyncPipeline;
use relmirror_core::selector::SelectorProfile;
use relmirror_core::state::{MemoryObjectStore, MemoryPackageStore};
use relmirror_core::traits::{JobScheduler, ObjectStore, OriginApi, PackageStore, ReleaseFetch};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// How the scripted origin serves one asset
#[derive(Debug, Clone)]
pub enum AssetScript {
    Bytes(Vec<u8>),
    Fail,
    /// Write the bytes, then never finish
    Stall(Vec<u8>),
}

/// An origin that replays queued responses
pub struct ScriptedOrigin {
    responses: Mutex<VecDeque<Result<ReleaseFetch>>>,
    assets: Mutex<HashMap<String, AssetScript>>,
    presented_etags: Mutex<Vec<Option<String>>>,
    release_calls: Arc<AtomicUsize>,
    download_calls: Arc<AtomicUsize>,
    downloads_finished: Arc<AtomicUsize>,
}

impl ScriptedOrigin {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            assets: Mutex::new(HashMap::new()),
            presented_etags: Mutex::new(Vec::new()),
            release_calls: Arc::new(AtomicUsize::new(0)),
            download_calls: Arc::new(AtomicUsize::new(0)),
            downloads_finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a "not modified" answer
    pub fn not_modified(&self) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(ReleaseFetch::NotModified));
    }

    /// Queue a release answer
    pub fn release(&self, release: Release, etag: Option<&str>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(ReleaseFetch::Fetched {
                release,
                etag: etag.map(str::to_string),
            }));
    }

    /// Queue a failed request
    pub fn fail(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(Error::origin(message)));
    }

    pub fn serve(&self, name: &str, script: AssetScript) {
        self.assets.lock().unwrap().insert(name.to_string(), script);
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Downloads that wrote their whole body
    pub fn downloads_finished(&self) -> usize {
        self.downloads_finished.load(Ordering::SeqCst)
    }

    pub fn presented_etags(&self) -> Vec<Option<String>> {
        self.presented_etags.lock().unwrap().clone()
    }
}

#[async_trait]
impl OriginApi for ScriptedOrigin {
    async fn latest_release(
        &self,
        _owner: &str,
        _repo: &str,
        if_none_match: Option<&str>,
    ) -> Result<ReleaseFetch> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.presented_etags
            .lock()
            .unwrap()
            .push(if_none_match.map(str::to_string));

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::origin("no scripted response left")))
    }

    async fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        let script = self.assets.lock().unwrap().get(&asset.name).cloned();
        match script {
            Some(AssetScript::Bytes(bytes)) => {
                tokio::fs::write(dest, &bytes).await?;
                self.downloads_finished.fetch_add(1, Ordering::SeqCst);
                Ok(bytes.len() as u64)
            }
            Some(AssetScript::Stall(bytes)) => {
                tokio::fs::write(dest, &bytes).await?;
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(AssetScript::Fail) => Err(Error::origin(format!("HTTP 502 for {}", asset.name))),
            None => Err(Error::origin(format!("HTTP 404 for {}", asset.name))),
        }
    }

    fn origin_name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

/// Memory object store that refuses uploads for chosen keys
pub struct FlakyObjectStore {
    pub inner: MemoryObjectStore,
    failing_keys: Mutex<HashSet<String>>,
}

impl FlakyObjectStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            failing_keys: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(&self, key: &str, body: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(Error::object_store(format!("upload of {} refused", key)));
        }
        self.inner.put(key, body).await
    }

    async fn presign_read(&self, key: &str, ttl: std::time::Duration) -> Result<String> {
        self.inner.presign_read(key, ttl).await
    }

    fn store_name(&self) -> &'static str {
        "flaky"
    }
}

// ---------------------------------------------------------------------------
// Job scheduler
// ---------------------------------------------------------------------------

/// A scheduler that only records what was armed
#[derive(Default)]
pub struct RecordingScheduler {
    armed: Mutex<Vec<(SyncJobArgs, DateTime<Utc>)>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> Vec<(SyncJobArgs, DateTime<Utc>)> {
        self.armed.lock().unwrap().clone()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().unwrap().len()
    }
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn arm(&self, args: SyncJobArgs, at: DateTime<Utc>) -> Result<()> {
        self.armed.lock().unwrap().push((args, at));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dependency extractor
// ---------------------------------------------------------------------------

/// Returns the same libraries for every binary and records what it saw
pub struct FakeDependencyExtractor {
    libraries: Vec<String>,
    inspected: Mutex<Vec<PathBuf>>,
}

impl FakeDependencyExtractor {
    pub fn new(libraries: &[&str]) -> Self {
        Self {
            libraries: libraries.iter().map(|s| s.to_string()).collect(),
            inspected: Mutex::new(Vec::new()),
        }
    }

    pub fn inspected(&self) -> Vec<PathBuf> {
        self.inspected.lock().unwrap().clone()
    }
}

#[async_trait]
impl DependencyExtractor for FakeDependencyExtractor {
    async fn extract(&self, path: &Path, _cancel: CancellationToken) -> Vec<String> {
        self.inspected.lock().unwrap().push(path.to_path_buf());
        self.libraries.clone()
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const ELF_MAGIC: &[u8] = &[0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01, 0x01, 0x00];
pub const PE_MAGIC: &[u8] = &[0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00];
pub const MACHO_MAGIC: &[u8] = &[0xCF, 0xFA, 0xED, 0xFE, 0x07, 0x00];

/// Build a `.tar.gz` holding `entries`
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *body).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Build a `.zip` holding `entries`
pub fn zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (path, body) in entries {
        writer
            .start_file(*path, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn published(days_ago: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days_ago)
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

/// A release whose assets download from `https://origin.test/{tag}/{name}`
pub fn release(tag: &str, published_at: DateTime<Utc>, names: &[&str]) -> Release {
    Release {
        tag: tag.to_string(),
        published_at,
        assets: names
            .iter()
            .map(|name| {
                ReleaseAsset::new(*name, format!("https://origin.test/{}/{}", tag, name), 0)
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Pipeline and runner wired to test doubles
pub struct Harness {
    pub origin: Arc<ScriptedOrigin>,
    pub store: Arc<MemoryPackageStore>,
    pub objects: Arc<FlakyObjectStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub extractor: Arc<FakeDependencyExtractor>,
    pub work_dir: tempfile::TempDir,
    pub pipeline: SyncPipeline,
    pub runner: JobRunner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_libraries(&["libc.so.6", "libssl.so.3"])
    }

    pub fn with_libraries(libraries: &[&str]) -> Self {
        let origin = Arc::new(ScriptedOrigin::new());
        let store = Arc::new(MemoryPackageStore::new());
        let objects = Arc::new(FlakyObjectStore::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let extractor = Arc::new(FakeDependencyExtractor::new(libraries));
        let work_dir = tempfile::tempdir().unwrap();

        let sync_config = SyncConfig {
            work_dir: Some(work_dir.path().to_path_buf()),
            ..SyncConfig::default()
        };

        let pipeline = SyncPipeline::new(
            origin.clone(),
            objects.clone(),
            store.clone(),
            extractor.clone(),
            SelectorProfile::default(),
            sync_config,
        );

        let planner = JobPlanner::new(store.clone(), scheduler.clone(), JobConfig::default());
        let runner = JobRunner::new(pipeline.clone(), planner);

        Self {
            origin,
            store,
            objects,
            scheduler,
            extractor,
            work_dir,
            pipeline,
            runner,
        }
    }

    /// Insert a package already mirrored at `version`
    ///
    /// It has a Linux dependency entry holding `libz.so.1` and a one-asset
    /// Linux mapping.
    pub async fn track_mirrored(&self, version: &str, released_days_ago: i64) -> TrackedPackage {
        let mut package = TrackedPackage::new("acme", "tool");
        package.version = Some(version.to_string());
        package.last_released = Some(published(released_days_ago));
        package.etag = Some("\"etag-1\"".to_string());
        package.last_polled = Some(Utc::now() - Duration::hours(2));
        package
            .dependencies
            .insert(Platform::Linux, BTreeSet::from(["libz.so.1".to_string()]));
        package.release_assets.insert(
            Platform::Linux,
            BTreeSet::from([format!("tool-{}-linux-amd64.tar.gz", version)]),
        );
        package.supported_platforms.insert(Platform::Linux);

        self.store.insert_package(&package).await.unwrap();
        package
    }

    pub async fn reload(&self, package: &TrackedPackage) -> TrackedPackage {
        self.store.get_package(package.id).await.unwrap().unwrap()
    }

    /// Entries left in the working-area root
    pub fn work_entries(&self) -> usize {
        std::fs::read_dir(self.work_dir.path()).unwrap().count()
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Assert `at` lies within `center ± slack`
pub fn assert_near(at: DateTime<Utc>, center: DateTime<Utc>, slack: Duration) {
    assert!(
        at >= center - slack && at <= center + slack,
        "{} is not within {} of {}",
        at,
        slack,
        center
    );
}
