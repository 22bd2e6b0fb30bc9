// # Store Implementations
//
// Reference implementations of the PackageStore and ObjectStore traits.

pub mod file;
pub mod memory;
pub mod objects;
mod table;

pub use file::{FilePackageStore, FilePackageStoreFactory};
pub use memory::{MemoryPackageStore, MemoryPackageStoreFactory};
pub use objects::{MemoryObjectStore, MemoryObjectStoreFactory};
