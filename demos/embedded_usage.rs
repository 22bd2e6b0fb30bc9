//! Minimal embedding example for relmirror-core
//!
//! This example uses relmirror-core as a library with application-supplied
//! collaborators: an in-process origin, in-memory stores and a dependency
//! extractor that needs no external tool. The scheduler lifecycle is fully
//! managed by the application.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use relmirror_core::config::{JobConfig, SyncConfig};
use relmirror_core::job::{JobPlanner, JobRunner};
use relmirror_core::model::{Arch, Platform, PlatformSet, Release, ReleaseAsset};
use relmirror_core::state::{MemoryObjectStore, MemoryPackageStore};
use relmirror_core::tracker::{DEFAULT_LINK_TTL, PackageTracker};
use relmirror_core::traits::{JobHandler, OriginApi, PackageStore, ReleaseFetch};
use relmirror_core::{
    DependencyExtractor, Result, SelectorProfile, SyncPipeline, TokioJobScheduler,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Origin serving one fixed release from memory
struct EmbeddedOrigin {
    release: Release,
    etag: String,
    requests: AtomicUsize,
}

impl EmbeddedOrigin {
    fn new() -> Self {
        let names = ["hello-linux-amd64.bin", "hello-windows-amd64.exe", "SHA256SUMS"];
        Self {
            release: Release {
                tag: "v0.3.0".to_string(),
                published_at: Utc::now() - Duration::days(2),
                assets: names
                    .iter()
                    .map(|n| ReleaseAsset::new(*n, format!("embedded://{}", n), 0))
                    .collect(),
            },
            etag: "\"v0.3.0\"".to_string(),
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OriginApi for EmbeddedOrigin {
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        if_none_match: Option<&str>,
    ) -> Result<ReleaseFetch> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        println!("[Origin] latest release of {}/{}", owner, repo);

        if if_none_match == Some(self.etag.as_str()) {
            return Ok(ReleaseFetch::NotModified);
        }
        Ok(ReleaseFetch::Fetched {
            release: self.release.clone(),
            etag: Some(self.etag.clone()),
        })
    }

    async fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64> {
        let body = format!("contents of {}\n", asset.name);
        tokio::fs::write(dest, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }

    fn origin_name(&self) -> &'static str {
        "embedded"
    }
}

/// Extractor that reports a fixed library set
struct StaticExtractor;

#[async_trait]
impl DependencyExtractor for StaticExtractor {
    async fn extract(&self, _path: &Path, _cancel: CancellationToken) -> Vec<String> {
        vec!["libc.so.6".to_string()]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("=== Embedded relmirror-core Example ===\n");

    // Create custom components
    let origin = Arc::new(EmbeddedOrigin::new());
    let store = Arc::new(MemoryPackageStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let scheduler = Arc::new(TokioJobScheduler::new());

    println!("1. Wiring pipeline and job runner...");
    let pipeline = SyncPipeline::new(
        origin.clone(),
        objects.clone(),
        store.clone(),
        Arc::new(StaticExtractor),
        SelectorProfile::default(),
        SyncConfig::default(),
    );
    let planner = JobPlanner::new(store.clone(), scheduler.clone(), JobConfig::default());
    let (runner, mut events) = JobRunner::new(pipeline, planner).with_events(16);

    let event_listener = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    println!("2. Starting scheduler in background...");
    let shutdown = CancellationToken::new();
    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        let handler: Arc<dyn JobHandler> = Arc::new(runner);
        tokio::spawn(async move { scheduler.run(handler, shutdown).await })
    };

    println!("3. Tracking acme/hello (first sync is armed immediately)...");
    let tracker = PackageTracker::new(
        origin.clone(),
        store.clone(),
        objects.clone(),
        scheduler.clone(),
        SelectorProfile::default(),
    );
    let platforms: PlatformSet = "linux,windows".parse()?;
    let package = tracker.ensure_tracked("acme", "hello", platforms).await?;

    // Wait for the first sync to commit
    for _ in 0..50 {
        let current = store.get_package(package.id).await?;
        if current.is_some_and(|p| p.version.is_some()) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    if let Some(mirrored) = store.get_package(package.id).await? {
        println!("\n4. Mirrored {} at {:?}", mirrored.slug(), mirrored.version);
        println!("   assets:       {:?}", mirrored.release_assets);
        println!("   dependencies: {:?}", mirrored.dependencies);
        println!("   objects:      {:?}", objects.keys().await);
    }

    tracker.report_install("acme", "hello", 3).await?;
    let link = tracker
        .download_link("acme", "hello", Platform::Linux, Arch::Amd64, DEFAULT_LINK_TTL)
        .await?;
    println!("\n5. Linux download link: {}", link);

    println!("\n6. Stopping scheduler...");
    shutdown.cancel();
    if let Ok(result) = scheduler_handle.await {
        result?;
    }
    let _ = tokio::time::timeout(std::time::Duration::from_millis(100), event_listener).await;

    println!(
        "\nOrigin answered {} request(s)",
        origin.requests.load(Ordering::SeqCst)
    );
    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- Scheduler lifecycle is fully controlled by the application");
    println!("- No global state");
    println!("- Every collaborator is custom (not relmirrord defaults)");

    Ok(())
}
