//! In-process job scheduler
//!
//! [`TokioJobScheduler`] keeps armed firings as timers on the tokio runtime.
//! Nothing survives a restart; the daemon re-arms every package at startup
//! with [`crate::job::JobBootstrap`].
//!
//! ## Overlap
//!
//! Each package id owns an async mutex. A firing takes it before invoking the
//! handler, so two firings for the same package run one after the other even
//! if their timers expire together. Different packages never wait on each
//! other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Error;
use crate::model::SyncJobArgs;
use crate::traits::{JobHandler, JobScheduler};

#[derive(Debug, Clone, Copy)]
struct ArmRequest {
    args: SyncJobArgs,
    at: DateTime<Utc>,
}

type PackageLocks = Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>;

/// Timer-based scheduler running firings on the current tokio runtime
pub struct TokioJobScheduler {
    tx: mpsc::UnboundedSender<ArmRequest>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ArmRequest>>>,
}

impl TokioJobScheduler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Dispatch armed firings to `handler` until `shutdown` is cancelled
    ///
    /// On shutdown, pending timers are dropped and in-flight firings see a
    /// cancelled token; this returns once they have all finished. May only be
    /// called once.
    pub async fn run(
        &self,
        handler: Arc<dyn JobHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), Error> {
        let mut rx = self
            .rx
            .lock()
            .map_err(|_| Error::job_scheduler("scheduler state poisoned"))?
            .take()
            .ok_or_else(|| Error::job_scheduler("scheduler is already running"))?;

        let locks: PackageLocks = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();

        info!("Job scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Job scheduler shutting down, {} firings outstanding", tasks.len());
                    break;
                }

                Some(request) = rx.recv() => {
                    tasks.spawn(fire(
                        request,
                        handler.clone(),
                        locks.clone(),
                        shutdown.clone(),
                    ));
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Job firing task failed: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Job firing task failed during shutdown: {}", e);
            }
        }

        info!("Job scheduler stopped");
        Ok(())
    }
}

impl Default for TokioJobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn fire(
    request: ArmRequest,
    handler: Arc<dyn JobHandler>,
    locks: PackageLocks,
    shutdown: CancellationToken,
) {
    let ArmRequest { args, at } = request;
    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let lock = match locks.lock() {
        Ok(mut map) => map.entry(args.package_id).or_default().clone(),
        Err(_) => {
            error!("Package lock table poisoned, dropping firing for {}", args.package_id);
            return;
        }
    };

    let _running = tokio::select! {
        _ = shutdown.cancelled() => return,
        guard = lock.lock_owned() => guard,
    };

    debug!(
        "Firing sync for {} (refire {})",
        args.package_id, args.refire_count
    );

    if let Err(e) = handler.execute(args, shutdown.child_token()).await {
        warn!("Sync job for {} returned an error: {}", args.package_id, e);
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn arm(&self, args: SyncJobArgs, at: DateTime<Utc>) -> Result<(), Error> {
        self.tx
            .send(ArmRequest { args, at })
            .map_err(|_| Error::job_scheduler("scheduler has stopped"))
    }
}
