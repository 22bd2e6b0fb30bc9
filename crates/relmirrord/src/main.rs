// # relmirrord - Release Mirror Daemon
//
// A thin integration layer. Sync, selection and scheduling logic live in
// relmirror-core; this binary only wires backends together from the
// environment and runs the job scheduler until a shutdown signal.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering origin and object store backends
// 4. Arming one sync job per tracked package, then ensuring `RELMIRROR_TRACK`
// 5. Running the scheduler and shutting it down cleanly
//
// ## Configuration
//
// ### Origin
// - `RELMIRROR_GITHUB_TOKEN`: GitHub token (optional, raises the rate limit)
// - `RELMIRROR_USER_AGENT`: User-Agent sent to GitHub
//
// ### Object Store
// - `RELMIRROR_OBJECTS_DIR`: Directory assets are republished into
//   (in-memory store when unset)
// - `RELMIRROR_OBJECTS_BASE_URL`: URL the directory is served from
// - `RELMIRROR_OBJECTS_SIGNING_KEY`: Key for signed download links
//
// ### Package Store
// - `RELMIRROR_STORE_TYPE`: file or memory
// - `RELMIRROR_STORE_PATH`: Path to the state file (for file store)
//
// ### Packages
// - `RELMIRROR_TRACK`: Comma-separated `owner/repo` list to track
// - `RELMIRROR_TRACK_PLATFORMS`: Platforms seeded for those packages
//   (default `linux,windows,darwin`)
//
// ### Jobs
// - `RELMIRROR_MAX_REFIRES`: Failed firings before one is skipped
// - `RELMIRROR_JITTER_SECS`: Jitter bound for next runs
// - `RELMIRROR_MAX_CONCURRENT_ASSETS`: Assets processed at once per release
// - `RELMIRROR_WORK_DIR`: Parent directory for working areas
// - `RELMIRROR_INSPECTOR_TOOL`: objdump-compatible tool
//
// ## Example
//
// ```bash
// export RELMIRROR_OBJECTS_DIR=/srv/mirror
// export RELMIRROR_OBJECTS_BASE_URL=https://mirror.example.org
// export RELMIRROR_OBJECTS_SIGNING_KEY=change-me
// export RELMIRROR_STORE_PATH=/var/lib/relmirror/state.json
// export RELMIRROR_TRACK=BurntSushi/ripgrep,sharkdp/fd
//
// relmirrord
// ```

use anyhow::Result;
use relmirror_core::config::{
    JobConfig, ObjectStoreConfig, OriginConfig, PackageStoreConfig, SyncConfig, parse_slug,
};
use relmirror_core::job::{JobBootstrap, JobEvent, JobPlanner, JobRunner};
use relmirror_core::traits::{JobHandler, ObjectStore, OriginApi, PackageStore};
use relmirror_core::{
    BackendRegistry, MirrorConfig, ObjdumpExtractor, PackageTracker, PlatformSet, SyncPipeline,
    TokioJobScheduler,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time in-flight sync passes get to wind down after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum MirrorExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<MirrorExitCode> for ExitCode {
    fn from(code: MirrorExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    github_token: Option<String>,
    user_agent: Option<String>,
    objects_dir: Option<String>,
    objects_base_url: Option<String>,
    objects_signing_key: Option<String>,
    store_type: String,
    store_path: Option<String>,
    track: Vec<String>,
    track_platforms: String,
    max_refires: Option<u32>,
    jitter_secs: Option<u64>,
    max_concurrent_assets: Option<usize>,
    work_dir: Option<String>,
    inspector_tool: Option<String>,
    log_level: String,
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} is not a valid number: '{}'", name, value)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            github_token: env::var("RELMIRROR_GITHUB_TOKEN").ok(),
            user_agent: env::var("RELMIRROR_USER_AGENT").ok(),
            objects_dir: env::var("RELMIRROR_OBJECTS_DIR").ok(),
            objects_base_url: env::var("RELMIRROR_OBJECTS_BASE_URL").ok(),
            objects_signing_key: env::var("RELMIRROR_OBJECTS_SIGNING_KEY").ok(),
            store_type: env::var("RELMIRROR_STORE_TYPE").unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("RELMIRROR_STORE_PATH").ok(),
            track: env::var("RELMIRROR_TRACK")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            track_platforms: env::var("RELMIRROR_TRACK_PLATFORMS")
                .unwrap_or_else(|_| "linux,windows,darwin".to_string()),
            max_refires: parse_var("RELMIRROR_MAX_REFIRES")?,
            jitter_secs: parse_var("RELMIRROR_JITTER_SECS")?,
            max_concurrent_assets: parse_var("RELMIRROR_MAX_CONCURRENT_ASSETS")?,
            work_dir: env::var("RELMIRROR_WORK_DIR").ok(),
            inspector_tool: env::var("RELMIRROR_INSPECTOR_TOOL").ok(),
            log_level: env::var("RELMIRROR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the settings the core config cannot check
    fn validate(&self) -> Result<()> {
        match self.store_type.as_str() {
            "file" => {
                let Some(path) = self.store_path.as_deref().filter(|p| !p.is_empty()) else {
                    anyhow::bail!(
                        "RELMIRROR_STORE_PATH is required when RELMIRROR_STORE_TYPE=file. \
                        Set it via: export RELMIRROR_STORE_PATH=/var/lib/relmirror/state.json"
                    );
                };
                if let Some(parent) = std::path::Path::new(path).parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    anyhow::bail!(
                        "RELMIRROR_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
            }
            "memory" => {}
            other => anyhow::bail!(
                "RELMIRROR_STORE_TYPE '{}' is not supported. Supported types: file, memory",
                other
            ),
        }

        if self.objects_dir.is_some() {
            if self.objects_base_url.as_ref().is_none_or(|u| u.is_empty()) {
                anyhow::bail!("RELMIRROR_OBJECTS_BASE_URL is required with RELMIRROR_OBJECTS_DIR");
            }
            if let Some(url) = &self.objects_base_url
                && !url.starts_with("https://")
                && !url.starts_with("http://")
            {
                anyhow::bail!(
                    "RELMIRROR_OBJECTS_BASE_URL must use HTTP or HTTPS scheme. Got: {}",
                    url
                );
            }
            let key_len = self.objects_signing_key.as_ref().map_or(0, String::len);
            if key_len < 16 {
                anyhow::bail!(
                    "RELMIRROR_OBJECTS_SIGNING_KEY must be at least 16 characters ({} given)",
                    key_len
                );
            }
        }

        if let Some(max_refires) = self.max_refires
            && !(1..=20).contains(&max_refires)
        {
            anyhow::bail!("RELMIRROR_MAX_REFIRES must be between 1 and 20. Got: {}", max_refires);
        }

        if let Some(jitter) = self.jitter_secs
            && jitter > 3600
        {
            anyhow::bail!("RELMIRROR_JITTER_SECS must be at most 3600. Got: {}", jitter);
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "RELMIRROR_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build and validate the core configuration
    fn mirror_config(&self) -> Result<(MirrorConfig, PlatformSet)> {
        let mut origin = OriginConfig::default();
        if let OriginConfig::Github {
            token, user_agent, ..
        } = &mut origin
        {
            *token = self.github_token.clone().filter(|t| !t.is_empty());
            if let Some(agent) = &self.user_agent {
                *user_agent = agent.clone();
            }
        }

        let object_store = match &self.objects_dir {
            Some(dir) => ObjectStoreConfig::Filesystem {
                root: PathBuf::from(dir),
                base_url: self.objects_base_url.clone().unwrap_or_default(),
                signing_key: self.objects_signing_key.clone().unwrap_or_default(),
            },
            None => ObjectStoreConfig::Memory,
        };

        let package_store = match self.store_type.as_str() {
            "memory" => PackageStoreConfig::Memory,
            _ => PackageStoreConfig::File {
                path: PathBuf::from(self.store_path.clone().unwrap_or_default()),
            },
        };

        let mut sync = SyncConfig::default();
        if let Some(n) = self.max_concurrent_assets {
            sync.max_concurrent_assets = n;
        }
        if let Some(dir) = &self.work_dir {
            sync.work_dir = Some(PathBuf::from(dir));
        }
        if let Some(tool) = &self.inspector_tool {
            sync.inspector_tool = tool.clone();
        }

        let mut jobs = JobConfig::default();
        if let Some(n) = self.max_refires {
            jobs.max_refires = n;
        }
        if let Some(secs) = self.jitter_secs {
            jobs.jitter_secs = secs;
        }

        let config = MirrorConfig {
            origin,
            object_store,
            package_store,
            sync,
            jobs,
            track: self.track.clone(),
            ..MirrorConfig::default()
        };
        config.validate()?;

        let platforms: PlatformSet = self.track_platforms.parse()?;
        Ok((config, platforms))
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return MirrorExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return MirrorExitCode::ConfigError.into();
    }

    let (mirror, platforms) = match config.mirror_config() {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Configuration validation error: {}", e);
            return MirrorExitCode::ConfigError.into();
        }
    };

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return MirrorExitCode::ConfigError.into();
    }

    info!("Starting relmirrord");
    info!(
        "Configuration loaded: {} package(s) to ensure, store {}, objects {}",
        mirror.track.len(),
        mirror.package_store.type_name(),
        mirror.object_store.type_name()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return MirrorExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(mirror, platforms).await {
            error!("Daemon error: {}", e);
            MirrorExitCode::RuntimeError
        } else {
            MirrorExitCode::CleanShutdown
        }
    });

    result.into()
}

fn build_registry() -> BackendRegistry {
    let registry = BackendRegistry::with_builtins();

    #[cfg(feature = "github")]
    {
        info!("Registering GitHub origin");
        relmirror_origin_github::register(&registry);
    }

    #[cfg(feature = "fs-objects")]
    {
        info!("Registering filesystem object store");
        relmirror_objects_fs::register(&registry);
    }

    registry
}

/// Run the daemon
async fn run_daemon(mirror: MirrorConfig, platforms: PlatformSet) -> Result<()> {
    let registry = build_registry();

    let origin: Arc<dyn OriginApi> = Arc::from(registry.create_origin(&mirror.origin)?);
    let objects: Arc<dyn ObjectStore> =
        Arc::from(registry.create_object_store(&mirror.object_store)?);
    let store: Arc<dyn PackageStore> =
        Arc::from(registry.create_package_store(&mirror.package_store).await?);
    let scheduler = Arc::new(TokioJobScheduler::new());

    let pipeline = SyncPipeline::new(
        origin.clone(),
        objects.clone(),
        store.clone(),
        Arc::new(ObjdumpExtractor::from_config(&mirror.sync)),
        mirror.selector.clone(),
        mirror.sync.clone(),
    );
    let planner = JobPlanner::new(store.clone(), scheduler.clone(), mirror.jobs.clone());
    let (runner, events) = JobRunner::new(pipeline, planner.clone()).with_events(256);

    let shutdown = CancellationToken::new();
    let event_log = tokio::spawn(log_events(events));

    let armed = JobBootstrap::new(store.clone(), planner, mirror.jobs.bootstrap_batch_size)
        .arm_all(shutdown.clone())
        .await?;
    info!("Armed {} tracked package(s)", armed);

    let tracker = PackageTracker::new(
        origin,
        store.clone(),
        objects,
        scheduler.clone(),
        mirror.selector.clone(),
    );
    for slug in &mirror.track {
        let (owner, repo) = parse_slug(slug)?;
        match tracker.ensure_tracked(&owner, &repo, platforms).await {
            Ok(package) => info!("Tracking {} ({})", package.slug(), package.id),
            Err(e) => warn!("Cannot track {}: {}", slug, e),
        }
    }

    let scheduler_task = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        let handler: Arc<dyn JobHandler> = Arc::new(runner);
        tokio::spawn(async move { scheduler.run(handler, shutdown).await })
    };

    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown_signal().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler_task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => anyhow::bail!("Scheduler task failed: {}", e),
        Err(_) => anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT),
    }

    store.flush().await?;
    // the runner, and with it the event sender, is gone once the scheduler stopped
    let _ = event_log.await;

    info!("Shutdown complete");
    Ok(())
}

async fn log_events(mut events: tokio::sync::mpsc::Receiver<JobEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::Synced {
                package_id,
                outcome,
            } => debug!("Package {} synced: {:?}", package_id, outcome),
            JobEvent::Skipped {
                package_id,
                refire_count,
            } => warn!(
                "Package {} skipped after {} failed attempts",
                package_id, refire_count
            ),
            JobEvent::Failed {
                package_id,
                refire_count,
                error,
            } => warn!(
                "Package {} failed (attempt {}): {}",
                package_id,
                refire_count + 1,
                error
            ),
            JobEvent::Rescheduled {
                package_id, at, ..
            } => debug!("Package {} next sync at {}", package_id, at),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
