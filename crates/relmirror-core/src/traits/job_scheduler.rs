// # Job Scheduling Traits
//
// - [`JobScheduler`]: arms a future sync invocation for a package
// - [`JobHandler`]: the body the scheduler runs when an invocation fires
//
// A scheduler must never run two firings for the same package id at the
// same time. Firings for different packages may overlap freely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::model::SyncJobArgs;

/// Trait for job scheduler implementations
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Arm one invocation of the sync job for `args.package_id` at `at`
    async fn arm(&self, args: SyncJobArgs, at: DateTime<Utc>) -> Result<(), crate::Error>;
}

/// The job body a scheduler invokes
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one firing
    ///
    /// `cancel` is triggered when the scheduler shuts down.
    async fn execute(&self, args: SyncJobArgs, cancel: CancellationToken)
    -> Result<(), crate::Error>;
}
