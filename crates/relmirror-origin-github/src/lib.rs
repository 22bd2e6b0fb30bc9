// # GitHub Release Origin
//
// This crate implements `OriginApi` against the GitHub REST API.
//
// ## Behavior
//
// - One request per call: the latest-release lookup or one asset download
// - Conditional requests: the stored entity tag goes out as `If-None-Match`
//   and a `304` comes back as `ReleaseFetch::NotModified`
// - Non-2xx statuses become `Error::Origin` (404 becomes `Error::NotFound`)
// - Asset bodies are streamed to disk chunk by chunk
// - No retries and no backoff; the job runner's refire counter owns both
//
// ## Security Requirements
//
// - The access token NEVER appears in logs or `Debug` output
// - Without a token requests are anonymous (60 requests/hour)
//
// ## API Reference
//
// - Latest release: GET `/repos/:owner/:repo/releases/latest`
// - Asset download: GET `browser_download_url` (redirects to the CDN)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relmirror_core::config::OriginConfig;
use relmirror_core::model::{Release, ReleaseAsset};
use relmirror_core::traits::{OriginApi, OriginFactory, ReleaseFetch};
use relmirror_core::{Error, Result};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ETAG, HeaderMap, HeaderValue, IF_NONE_MATCH, USER_AGENT};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Timeout for API requests (30 seconds)
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for every request, downloads included
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const GITHUB_JSON: &str = "application/vnd.github+json";

/// GitHub release origin
///
/// Download time is bounded by the sync pipeline, so only API requests carry
/// a total timeout here.
pub struct GithubOrigin {
    /// Access token
    /// ⚠️ NEVER log this value
    token: Option<String>,

    api_base: String,

    client: reqwest::Client,
}

impl std::fmt::Debug for GithubOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubOrigin")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GithubOrigin {
    /// Create a GitHub origin
    ///
    /// An empty token is treated as no token.
    pub fn new(
        token: Option<String>,
        user_agent: &str,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|_| Error::config(format!("Invalid User-Agent: {}", user_agent)))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, user_agent);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::origin(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            token: token.filter(|t| !t.is_empty()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn latest_release_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/repos/{}/{}/releases/latest", self.api_base, owner, repo)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl OriginApi for GithubOrigin {
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        if_none_match: Option<&str>,
    ) -> Result<ReleaseFetch> {
        let url = self.latest_release_url(owner, repo);

        let mut request = self
            .authorized(self.client.get(&url))
            .header(ACCEPT, GITHUB_JSON)
            .timeout(API_TIMEOUT);
        if let Some(etag) = if_none_match {
            request = request.header(IF_NONE_MATCH, etag);
        }

        tracing::debug!(
            "Fetching latest release of {}/{} (conditional: {})",
            owner,
            repo,
            if_none_match.is_some()
        );

        let response = request
            .send()
            .await
            .map_err(|e| Error::origin(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(ReleaseFetch::NotModified);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(
                status,
                &body,
                &format!("latest release of {}/{}", owner, repo),
            ));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| Error::origin(format!("Failed to read response: {}", e)))?;
        let release = parse_release(&body)?;

        Ok(ReleaseFetch::Fetched { release, etag })
    }

    async fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64> {
        let mut response = self
            .authorized(self.client.get(&asset.download_url))
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await
            .map_err(|e| Error::origin(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status, &body, &format!("asset {}", asset.name)));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::origin(format!("Download of {} interrupted: {}", asset.name, e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if asset.size > 0 && written != asset.size {
            tracing::warn!(
                "{}: expected {} bytes, received {}",
                asset.name,
                asset.size,
                written
            );
        }

        Ok(written)
    }

    fn origin_name(&self) -> &'static str {
        "github"
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseBody {
    tag_name: String,
    published_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<AssetBody>,
}

#[derive(Debug, Deserialize)]
struct AssetBody {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

/// Parse a release object returned by the API
fn parse_release(body: &str) -> Result<Release> {
    let release: ReleaseBody = serde_json::from_str(body)
        .map_err(|e| Error::origin(format!("Failed to parse release: {}", e)))?;

    let published_at = release
        .published_at
        .or(release.created_at)
        .ok_or_else(|| {
            Error::origin(format!("Release {} has no publication time", release.tag_name))
        })?;

    Ok(Release {
        tag: release.tag_name,
        published_at,
        assets: release
            .assets
            .into_iter()
            .map(|a| ReleaseAsset::new(a.name, a.browser_download_url, a.size))
            .collect(),
    })
}

/// Map a non-2xx status to an error
fn status_error(status: StatusCode, body: &str, what: &str) -> Error {
    match status.as_u16() {
        401 => Error::origin(format!(
            "Authentication failed for {}: invalid token. Status: {}",
            what, status
        )),
        403 | 429 => Error::origin(format!(
            "Rate limited or forbidden fetching {}. Status: {}",
            what, status
        )),
        404 => Error::not_found(format!("GitHub has no {}", what)),
        500..=599 => Error::origin(format!(
            "GitHub server error (transient) fetching {}: {} - {}",
            what, status, body
        )),
        _ => Error::origin(format!("Fetching {} failed: {} - {}", what, status, body)),
    }
}

/// Factory for creating GitHub origins
pub struct GithubOriginFactory;

impl OriginFactory for GithubOriginFactory {
    fn create(&self, config: &OriginConfig) -> Result<Box<dyn OriginApi>> {
        match config {
            OriginConfig::Github {
                token,
                user_agent,
                api_base,
            } => {
                if token.as_deref().is_none_or(str::is_empty) {
                    tracing::warn!("No GitHub token configured, requests are anonymous");
                }
                Ok(Box::new(GithubOrigin::new(
                    token.clone(),
                    user_agent,
                    api_base.clone(),
                )?))
            }
            _ => Err(Error::config("Invalid config for GitHub origin")),
        }
    }
}

/// Register the GitHub origin with a registry
///
/// # Example
///
/// ```rust
/// use relmirror_core::BackendRegistry;
///
/// let registry = BackendRegistry::new();
/// relmirror_origin_github::register(&registry);
/// assert!(registry.has_origin("github"));
/// ```
pub fn register(registry: &relmirror_core::BackendRegistry) {
    registry.register_origin("github", Box::new(GithubOriginFactory));
}
