//! Release binary inspection
//!
//! - [`binary`]: executable format detection and discovery
//! - [`deps`]: shared-library dependency extraction

pub mod binary;
pub mod deps;

pub use binary::{BinaryKind, Executable, classify, find_executables};
pub use deps::{DependencyExtractor, ObjdumpExtractor, parse_needed};
