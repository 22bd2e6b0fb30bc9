//! Error types for the relmirror system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for relmirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the relmirror system
#[derive(Error, Debug)]
pub enum Error {
    /// Origin release API errors (network failures, non-2xx statuses)
    #[error("Origin error: {0}")]
    Origin(String),

    /// Object store errors
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Package store errors
    #[error("Package store error: {0}")]
    PackageStore(String),

    /// Archive extraction errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// A schedule could not be computed for a package
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Job scheduler errors (arming a future invocation failed)
    #[error("Job scheduler error: {0}")]
    JobScheduler(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One or more assets of a release could not be republished
    #[error("Release {tag} incomplete, failed assets: {}", failed.join(", "))]
    PartialRelease {
        /// Release tag that was being processed
        tag: String,
        /// Names of the assets that failed
        failed: Vec<String>,
    },

    /// The operation was cancelled or timed out
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an origin error
    pub fn origin(msg: impl Into<String>) -> Self {
        Self::Origin(msg.into())
    }

    /// Create an object store error
    pub fn object_store(msg: impl Into<String>) -> Self {
        Self::ObjectStore(msg.into())
    }

    /// Create a package store error
    pub fn package_store(msg: impl Into<String>) -> Self {
        Self::PackageStore(msg.into())
    }

    /// Create an archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    /// Create a scheduling error
    pub fn scheduling(msg: impl Into<String>) -> Self {
        Self::Scheduling(msg.into())
    }

    /// Create a job scheduler error
    pub fn job_scheduler(msg: impl Into<String>) -> Self {
        Self::JobScheduler(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Whether this error means the operation was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled("task aborted".to_string())
        } else {
            Self::Other(format!("task panicked: {}", err))
        }
    }
}
