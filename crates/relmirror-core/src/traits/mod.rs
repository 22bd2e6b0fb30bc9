//! Core traits for the relmirror system
//!
//! This module defines the abstract capabilities the engine consumes.
//!
//! - [`OriginApi`]: Fetch release metadata and asset bytes
//! - [`ObjectStore`]: Store republished assets and mint read links
//! - [`PackageStore`]: Persist packages and popularity statistics
//! - [`JobScheduler`] / [`JobHandler`]: Arm and run future sync invocations

pub mod job_scheduler;
pub mod object_store;
pub mod origin;
pub mod package_store;

pub use job_scheduler::{JobHandler, JobScheduler};
pub use object_store::{ObjectStore, ObjectStoreFactory};
pub use origin::{OriginApi, OriginFactory, ReleaseFetch};
pub use package_store::{PackageStore, PackageStoreFactory};
