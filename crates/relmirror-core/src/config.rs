//! Configuration types for the relmirror system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::selector::SelectorProfile;

/// Main mirror configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Origin release API configuration
    #[serde(default)]
    pub origin: OriginConfig,

    /// Object store configuration
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Package store configuration
    #[serde(default)]
    pub package_store: PackageStoreConfig,

    /// Sync pipeline settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Job runner settings
    #[serde(default)]
    pub jobs: JobConfig,

    /// Asset scoring tables
    #[serde(default)]
    pub selector: SelectorProfile,

    /// `owner/repo` pairs to ensure are tracked at startup
    #[serde(default)]
    pub track: Vec<String>,
}

impl MirrorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.origin.validate()?;
        self.object_store.validate()?;
        self.package_store.validate()?;
        self.sync.validate()?;
        self.jobs.validate()?;
        self.selector.validate()?;

        for entry in &self.track {
            parse_slug(entry)?;
        }

        Ok(())
    }
}

/// Split an `owner/repo` string
pub fn parse_slug(slug: &str) -> Result<(String, String), crate::Error> {
    let (owner, repo) = slug
        .trim()
        .split_once('/')
        .ok_or_else(|| crate::Error::config(format!("'{}' is not an owner/repo pair", slug)))?;
    validate_name("owner", owner)?;
    validate_name("repository", repo)?;
    Ok((owner.to_string(), repo.to_string()))
}

/// Check one half of an `owner/repo` pair
pub fn validate_name(what: &str, value: &str) -> Result<(), crate::Error> {
    if value.is_empty() {
        return Err(crate::Error::invalid_input(format!("{} cannot be empty", what)));
    }
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(crate::Error::invalid_input(format!(
            "{} '{}' contains '/' or whitespace",
            what, value
        )));
    }
    Ok(())
}

/// Origin release API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OriginConfig {
    /// GitHub REST API
    Github {
        /// Personal access token (optional, raises the rate limit)
        token: Option<String>,
        /// User-Agent header (GitHub rejects requests without one)
        #[serde(default = "default_user_agent")]
        user_agent: String,
        /// API base URL
        #[serde(default = "default_github_api")]
        api_base: String,
    },

    /// Custom origin
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl OriginConfig {
    /// Validate the origin configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            OriginConfig::Github {
                user_agent,
                api_base,
                ..
            } => {
                if user_agent.is_empty() {
                    return Err(crate::Error::config("GitHub user agent cannot be empty"));
                }
                if api_base.is_empty() {
                    return Err(crate::Error::config("GitHub API base URL cannot be empty"));
                }
                Ok(())
            }
            OriginConfig::Custom { factory, config } => validate_custom("origin", factory, config),
        }
    }

    /// Get the origin type name
    pub fn type_name(&self) -> &str {
        match self {
            OriginConfig::Github { .. } => "github",
            OriginConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        OriginConfig::Github {
            token: None,
            user_agent: default_user_agent(),
            api_base: default_github_api(),
        }
    }
}

/// Object store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// Local directory served under `base_url`
    Filesystem {
        /// Directory objects are written into
        root: PathBuf,
        /// Public URL prefix the directory is served from
        base_url: String,
        /// Key used to sign read links
        signing_key: String,
    },

    /// In-memory object store (not persistent)
    #[default]
    Memory,

    /// Custom object store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ObjectStoreConfig {
    /// Validate the object store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ObjectStoreConfig::Filesystem {
                root,
                base_url,
                signing_key,
            } => {
                if root.as_os_str().is_empty() {
                    return Err(crate::Error::config("Object store root cannot be empty"));
                }
                if base_url.is_empty() {
                    return Err(crate::Error::config("Object store base URL cannot be empty"));
                }
                if signing_key.is_empty() {
                    return Err(crate::Error::config("Object store signing key cannot be empty"));
                }
                Ok(())
            }
            ObjectStoreConfig::Memory => Ok(()),
            ObjectStoreConfig::Custom { factory, config } => {
                validate_custom("object store", factory, config)
            }
        }
    }

    /// Get the object store type name
    pub fn type_name(&self) -> &str {
        match self {
            ObjectStoreConfig::Filesystem { .. } => "filesystem",
            ObjectStoreConfig::Memory => "memory",
            ObjectStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Package store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PackageStoreConfig {
    /// JSON file package store
    File {
        /// Path to the state file
        path: PathBuf,
    },

    /// In-memory package store (not persistent)
    #[default]
    Memory,

    /// Custom package store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl PackageStoreConfig {
    /// Validate the package store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            PackageStoreConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::config("Package store path cannot be empty"));
                }
                Ok(())
            }
            PackageStoreConfig::Memory => Ok(()),
            PackageStoreConfig::Custom { factory, config } => {
                validate_custom("package store", factory, config)
            }
        }
    }

    /// Get the package store type name
    pub fn type_name(&self) -> &str {
        match self {
            PackageStoreConfig::File { .. } => "file",
            PackageStoreConfig::Memory => "memory",
            PackageStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

fn validate_custom(
    what: &str,
    factory: &str,
    config: &serde_json::Value,
) -> Result<(), crate::Error> {
    if factory.is_empty() {
        return Err(crate::Error::config(format!(
            "Custom {} factory cannot be empty",
            what
        )));
    }
    if config.is_null() {
        return Err(crate::Error::config(format!(
            "Custom {} config cannot be null",
            what
        )));
    }
    Ok(())
}

/// Sync pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Assets of one release processed at the same time
    #[serde(default = "default_max_concurrent_assets")]
    pub max_concurrent_assets: usize,

    /// Upper bound for one asset download (in seconds)
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Upper bound for one dependency inspection (in seconds)
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Executable invoked as `<tool> -p -- <binary>`
    #[serde(default = "default_inspector_tool")]
    pub inspector_tool: String,

    /// Parent directory for per-asset working areas
    ///
    /// Defaults to the system temporary directory.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl SyncConfig {
    /// Validate the sync configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_concurrent_assets == 0 {
            return Err(crate::Error::config("max_concurrent_assets must be > 0"));
        }
        if self.download_timeout_secs == 0 {
            return Err(crate::Error::config("download_timeout_secs must be > 0"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(crate::Error::config("tool_timeout_secs must be > 0"));
        }
        if self.inspector_tool.is_empty() {
            return Err(crate::Error::config("inspector_tool cannot be empty"));
        }
        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Directory working areas are created in
    pub fn work_root(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_assets: default_max_concurrent_assets(),
            download_timeout_secs: default_download_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            inspector_tool: default_inspector_tool(),
            work_dir: None,
        }
    }
}

/// Job runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Consecutive failed firings after which one firing is skipped
    #[serde(default = "default_max_refires")]
    pub max_refires: u32,

    /// Bound of the uniform jitter added to every next run (in seconds)
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Delay used when no next run can be computed (in seconds)
    #[serde(default = "default_fallback_interval_secs")]
    pub fallback_interval_secs: u64,

    /// Packages loaded per page when arming jobs at startup
    #[serde(default = "default_bootstrap_batch_size")]
    pub bootstrap_batch_size: usize,
}

impl JobConfig {
    /// Validate the job configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.fallback_interval_secs == 0 {
            return Err(crate::Error::config("fallback_interval_secs must be > 0"));
        }
        if self.bootstrap_batch_size == 0 {
            return Err(crate::Error::config("bootstrap_batch_size must be > 0"));
        }
        Ok(())
    }

    pub fn fallback_interval(&self) -> chrono::Duration {
        seconds(self.fallback_interval_secs)
    }

    pub fn jitter(&self) -> chrono::Duration {
        seconds(self.jitter_secs)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_refires: default_max_refires(),
            jitter_secs: default_jitter_secs(),
            fallback_interval_secs: default_fallback_interval_secs(),
            bootstrap_batch_size: default_bootstrap_batch_size(),
        }
    }
}

/// Saturating conversion of a configured second count
fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_user_agent() -> String {
    concat!("relmirror/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_max_concurrent_assets() -> usize {
    4
}

fn default_download_timeout_secs() -> u64 {
    600
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_inspector_tool() -> String {
    "objdump".to_string()
}

fn default_max_refires() -> u32 {
    3
}

fn default_jitter_secs() -> u64 {
    300
}

fn default_fallback_interval_secs() -> u64 {
    3600
}

fn default_bootstrap_batch_size() -> usize {
    100
}
