//! # Job Runner
//!
//! The recurring unit of work bound to one package.
//!
//! ```text
//! Start ─┬─ refire_count < max ──► SyncPipeline ─┬─ Ok ──┐
//!        │                                       └─ Err ─┤
//!        └─ refire_count ≥ max ── skip ──────────────────┤
//!                                                        ▼
//!                                   Reschedule (reload, NextRun + jitter, arm)
//!                                                        │
//!                                                        ▼
//!                                         End (pipeline error re-raised)
//! ```
//!
//! Every firing arms exactly one successor for the same package. The
//! successor carries the retry counter:
//!
//! - pass succeeded: counter reset to 0
//! - pass failed: counter + 1
//! - firing skipped because the budget was spent: counter reset to 0
//!
//! The reschedule runs on every exit path. The normal path awaits it before
//! returning; if the firing future is dropped mid-pass, a [`RescheduleGuard`]
//! spawns it from `Drop`.

pub mod bootstrap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Error;
use crate::config::JobConfig;
use crate::model::{SyncJobArgs, TrackedPackage};
use crate::pipeline::{SyncOutcome, SyncPipeline};
use crate::schedule::{SchedulingPolicy, apply_jitter};
use crate::traits::{JobHandler, JobScheduler, PackageStore};

pub use bootstrap::JobBootstrap;

/// Events emitted by the job runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A sync pass completed
    Synced {
        package_id: Uuid,
        outcome: SyncOutcome,
    },

    /// A firing was skipped because its retry budget was spent
    Skipped { package_id: Uuid, refire_count: u32 },

    /// A sync pass failed
    Failed {
        package_id: Uuid,
        refire_count: u32,
        error: String,
    },

    /// The successor firing was armed
    Rescheduled {
        package_id: Uuid,
        at: DateTime<Utc>,
        refire_count: u32,
    },
}

/// Arms sync jobs at `NextRun + jitter`
///
/// Shared by the job runner, the startup bootstrap and the package tracker.
#[derive(Clone)]
pub struct JobPlanner {
    store: Arc<dyn PackageStore>,
    policy: Arc<SchedulingPolicy>,
    scheduler: Arc<dyn JobScheduler>,
    config: JobConfig,
}

impl JobPlanner {
    pub fn new(
        store: Arc<dyn PackageStore>,
        scheduler: Arc<dyn JobScheduler>,
        config: JobConfig,
    ) -> Self {
        Self {
            policy: Arc::new(SchedulingPolicy::new(store.clone())),
            store,
            scheduler,
            config,
        }
    }

    /// Reload the package and arm `args` for it
    ///
    /// Returns `Ok(None)` when the package is no longer tracked, which ends
    /// the chain.
    pub async fn rearm(&self, args: SyncJobArgs) -> Result<Option<DateTime<Utc>>, Error> {
        match self.store.get_package(args.package_id).await? {
            Some(package) => self.arm_package(&package, args).await.map(Some),
            None => {
                info!(
                    "Package {} is no longer tracked, not rescheduling",
                    args.package_id
                );
                Ok(None)
            }
        }
    }

    /// Arm `args` for `package` at its next run plus jitter
    ///
    /// When no next run can be computed the job is still armed, at the
    /// fallback interval, and the scheduling error is returned afterwards.
    pub async fn arm_package(
        &self,
        package: &TrackedPackage,
        args: SyncJobArgs,
    ) -> Result<DateTime<Utc>, Error> {
        let now = Utc::now();

        let (next, schedule_error) = match self.policy.next_run(package, now).await {
            Ok(next) => (next, None),
            Err(e) => {
                error!(
                    "Cannot compute next run for {}: {}. Falling back to {}s.",
                    package.slug(),
                    e,
                    self.config.fallback_interval_secs
                );
                (now + self.config.fallback_interval(), Some(e))
            }
        };

        let at = apply_jitter(next, self.config.jitter()).max(now);
        self.scheduler.arm(args, at).await?;
        debug!(
            "Armed sync of {} at {} (refire {})",
            package.slug(),
            at,
            args.refire_count
        );

        match schedule_error {
            Some(e) => Err(e),
            None => Ok(at),
        }
    }
}

/// Re-arms the successor if a firing is dropped before it rescheduled
///
/// [`RescheduleGuard::complete`] disarms the guard and reschedules inline.
pub struct RescheduleGuard {
    planner: Option<JobPlanner>,
    args: SyncJobArgs,
}

impl RescheduleGuard {
    pub fn new(planner: JobPlanner, args: SyncJobArgs) -> Self {
        Self {
            planner: Some(planner),
            args,
        }
    }

    /// Arm `successor` and disarm the guard
    pub async fn complete(
        mut self,
        successor: SyncJobArgs,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        match self.planner.take() {
            Some(planner) => planner.rearm(successor).await,
            None => Ok(None),
        }
    }
}

impl Drop for RescheduleGuard {
    fn drop(&mut self) {
        let Some(planner) = self.planner.take() else {
            return;
        };
        let args = self.args;

        warn!(
            "Sync of {} interrupted, rescheduling in the background",
            args.package_id
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = planner.rearm(args).await {
                        error!("Failed to reschedule {}: {}", args.package_id, e);
                    }
                });
            }
            Err(_) => {
                error!(
                    "No runtime available to reschedule {}; its job chain has stopped",
                    args.package_id
                );
            }
        }
    }
}

/// Runs sync jobs
///
/// ## Lifecycle
///
/// 1. Create with [`JobRunner::new()`]
/// 2. Hand it to a scheduler as its [`JobHandler`]
/// 3. Each firing calls [`JobRunner::run()`]
pub struct JobRunner {
    pipeline: SyncPipeline,
    planner: JobPlanner,
    max_refires: u32,
    event_tx: Option<mpsc::Sender<JobEvent>>,
}

impl JobRunner {
    pub fn new(pipeline: SyncPipeline, planner: JobPlanner) -> Self {
        let max_refires = planner.config.max_refires;
        Self {
            pipeline,
            planner,
            max_refires,
            event_tx: None,
        }
    }

    /// Emit [`JobEvent`]s on a bounded channel
    pub fn with_events(mut self, capacity: usize) -> (Self, mpsc::Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.event_tx = Some(tx);
        (self, rx)
    }

    /// Run one firing
    ///
    /// The successor is armed before this returns, whatever the pass did. A
    /// pipeline error is returned after the reschedule; a reschedule error is
    /// returned only if the pass itself succeeded.
    pub async fn run(&self, args: SyncJobArgs, cancel: CancellationToken) -> Result<(), Error> {
        let package_id = args.package_id;
        let guard = RescheduleGuard::new(self.planner.clone(), args);

        let (result, successor) = if args.refire_count >= self.max_refires {
            warn!(
                "Skipping sync of {}: {} consecutive failures reached the limit of {}",
                package_id, args.refire_count, self.max_refires
            );
            self.emit_event(JobEvent::Skipped {
                package_id,
                refire_count: args.refire_count,
            });
            (Ok(()), SyncJobArgs::new(package_id))
        } else {
            match self.pipeline.sync(package_id, cancel).await {
                Ok(outcome) => {
                    debug!("Sync of {} finished: {:?}", package_id, outcome);
                    self.emit_event(JobEvent::Synced {
                        package_id,
                        outcome,
                    });
                    (Ok(()), SyncJobArgs::new(package_id))
                }
                Err(e) => {
                    error!(
                        "Sync of {} failed (refire {}): {}",
                        package_id, args.refire_count, e
                    );
                    self.emit_event(JobEvent::Failed {
                        package_id,
                        refire_count: args.refire_count,
                        error: e.to_string(),
                    });
                    (Err(e), args.refired())
                }
            }
        };

        let rescheduled = guard.complete(successor).await;

        match &rescheduled {
            Ok(Some(at)) => self.emit_event(JobEvent::Rescheduled {
                package_id,
                at: *at,
                refire_count: successor.refire_count,
            }),
            Ok(None) => {}
            Err(e) => error!("Rescheduling {} did not complete cleanly: {}", package_id, e),
        }

        result?;
        rescheduled.map(|_| ())
    }

    fn emit_event(&self, event: JobEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                warn!("Job event channel full, dropping event");
            }
        }
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn execute(&self, args: SyncJobArgs, cancel: CancellationToken) -> Result<(), Error> {
        self.run(args, cancel).await
    }
}
