// # Origin Release API Trait
//
// Defines the interface to the upstream release host (e.g. GitHub).
//
// ## Implementations
//
// - GitHub REST API: `relmirror-origin-github` crate
//
// ## Usage
//
// ```rust,ignore
// use relmirror_core::traits::{OriginApi, ReleaseFetch};
//
// match origin.latest_release("acme", "tool", package.etag.as_deref()).await? {
//     ReleaseFetch::NotModified => { /* nothing new since the stored etag */ }
//     ReleaseFetch::Fetched { release, etag } => { /* inspect release.tag */ }
// }
// ```

use async_trait::async_trait;
use std::path::Path;

use crate::model::{Release, ReleaseAsset};

/// Outcome of a conditional "latest release" request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseFetch {
    /// The origin answered "not modified" for the presented validator
    NotModified,
    /// The origin returned release data
    Fetched {
        release: Release,
        /// Fresh validator to present on the next request, if the origin sent one
        etag: Option<String>,
    },
}

/// Trait for origin release API implementations
///
/// # Responsibilities
///
/// - Perform exactly one request per call
/// - Surface "not modified" distinctly from data and from failure
/// - Return an error for every other non-success status
///
/// Implementations must not retry; the job runner owns the retry budget.
#[async_trait]
pub trait OriginApi: Send + Sync {
    /// Fetch the latest release of `owner/repo`
    ///
    /// # Parameters
    ///
    /// - `if_none_match`: Validator stored from a previous fetch, if any
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        if_none_match: Option<&str>,
    ) -> Result<ReleaseFetch, crate::Error>;

    /// Download an asset's bytes to `dest`, returning the number of bytes written
    async fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64, crate::Error>;

    /// Origin name used in logs (e.g. "github")
    fn origin_name(&self) -> &'static str;
}

/// Helper trait for constructing origins from configuration
pub trait OriginFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::OriginConfig,
    ) -> Result<Box<dyn OriginApi>, crate::Error>;
}
