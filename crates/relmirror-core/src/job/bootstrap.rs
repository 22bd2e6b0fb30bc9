//! Startup arming of sync jobs
//!
//! Job schedulers without durable storage lose their armed jobs on restart.
//! [`JobBootstrap::arm_all`] pages through every tracked package and arms one
//! firing each.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::JobPlanner;
use crate::Error;
use crate::model::SyncJobArgs;
use crate::traits::PackageStore;

/// Arms the first firing of every tracked package
pub struct JobBootstrap {
    store: Arc<dyn PackageStore>,
    planner: JobPlanner,
    batch_size: usize,
}

impl JobBootstrap {
    pub fn new(store: Arc<dyn PackageStore>, planner: JobPlanner, batch_size: usize) -> Self {
        Self {
            store,
            planner,
            batch_size: batch_size.max(1),
        }
    }

    /// Arm one firing per tracked package, in id order
    ///
    /// Packages without a computable next run are armed at the fallback
    /// interval by the planner and logged here. Returns the number of
    /// packages armed.
    pub async fn arm_all(&self, cancel: CancellationToken) -> Result<usize, Error> {
        let mut after: Option<Uuid> = None;
        let mut armed = 0;

        while !cancel.is_cancelled() {
            let batch = self.store.list_package_ids(after, self.batch_size).await?;
            let Some(last) = batch.last().copied() else {
                break;
            };
            after = Some(last);

            for id in batch {
                let Some(package) = self.store.get_package(id).await? else {
                    continue;
                };

                match self.planner.arm_package(&package, SyncJobArgs::new(id)).await {
                    Ok(_) => armed += 1,
                    Err(e @ Error::JobScheduler(_)) => return Err(e),
                    Err(e) => {
                        warn!("{} armed at fallback interval: {}", package.slug(), e);
                        armed += 1;
                    }
                }
            }
        }

        info!("Armed sync jobs for {} packages", armed);
        Ok(armed)
    }
}
