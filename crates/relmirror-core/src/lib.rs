// # relmirror-core
//
// Core library for the relmirror release mirroring engine.
//
// ## Architecture Overview
//
// - **OriginApi**: Trait for fetching release metadata and asset bytes
// - **ObjectStore**: Trait for storing republished assets and minting read links
// - **PackageStore**: Trait for persisting packages and popularity statistics
// - **JobScheduler**: Trait for arming future sync invocations
// - **SyncPipeline**: One conditional-fetch / republish pass for a package
// - **SchedulingPolicy**: Tiered re-poll cadence from release age and popularity
// - **JobRunner**: Retry budget plus unconditional reschedule around the pipeline
// - **BackendRegistry**: Plugin-based registry for collaborators
//
// ## Design Principles
//
// 1. **Library-First**: The daemon is a thin wrapper around this crate
// 2. **Plugin-Based**: Collaborators are registered by type name
// 3. **Always Reschedule**: Every firing arms exactly one successor
// 4. **All-or-Nothing Releases**: A release is recorded only once every asset is mirrored

pub mod config;
pub mod error;
pub mod inspect;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod tracker;
pub mod traits;

// Re-export core types for convenience
pub use config::MirrorConfig;
pub use error::{Error, Result};
pub use inspect::{DependencyExtractor, ObjdumpExtractor};
pub use job::{JobBootstrap, JobEvent, JobPlanner, JobRunner};
pub use model::{Arch, Platform, PlatformSet, SyncJobArgs, TrackedPackage};
pub use pipeline::{SyncOutcome, SyncPipeline};
pub use registry::BackendRegistry;
pub use schedule::{SchedulingPolicy, Tier};
pub use scheduler::TokioJobScheduler;
pub use selector::SelectorProfile;
pub use state::{FilePackageStore, MemoryObjectStore, MemoryPackageStore};
pub use tracker::PackageTracker;
pub use traits::{JobHandler, JobScheduler, ObjectStore, OriginApi, PackageStore};
