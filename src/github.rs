//! GitHub release API types and manifest source

use serde::Deserialize;

use crate::update::catalog::{AssetDescriptor, ReleaseManifest};
use crate::update::UpdateError;

/// GitHub release metadata
#[derive(Deserialize, Debug, Clone)]
pub struct GithubRelease {
    pub tag_name: String,
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

/// GitHub release asset
#[derive(Deserialize, Debug, Clone)]
pub struct GithubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl From<GithubRelease> for ReleaseManifest {
    fn from(release: GithubRelease) -> Self {
        ReleaseManifest {
            tag: release.tag_name,
            notes: release.body.unwrap_or_default(),
            assets: release
                .assets
                .into_iter()
                .map(|a| AssetDescriptor {
                    name: a.name,
                    download_url: a.browser_download_url,
                    size_bytes: a.size,
                })
                .collect(),
        }
    }
}

/// Parse a release document (`releases/latest` response body)
pub fn parse_release(json: &str) -> Result<ReleaseManifest, serde_json::Error> {
    let release: GithubRelease = serde_json::from_str(json)?;
    Ok(release.into())
}

// ============================================================================
// Manifest Source
// ============================================================================

/// Read-only access to the latest published release
pub trait ManifestSource: Send + Sync {
    fn fetch_manifest(&self) -> Result<ReleaseManifest, UpdateError>;
}

/// Fetches `releases/latest` from the GitHub API
#[cfg(feature = "network")]
pub struct GithubReleases {
    url: String,
    user_agent: String,
}

#[cfg(feature = "network")]
impl GithubReleases {
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn from_config(config: &crate::config::UpdaterConfig) -> Self {
        Self::new(config.releases_url(), config.user_agent.clone())
    }
}

#[cfg(feature = "network")]
impl ManifestSource for GithubReleases {
    fn fetch_manifest(&self) -> Result<ReleaseManifest, UpdateError> {
        let fetch_error = |reason: String| UpdateError::ManifestFetch {
            url: self.url.clone(),
            reason,
        };

        let response = ureq::get(&self.url)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| fetch_error(e.to_string()))?;

        let release: GithubRelease = response
            .into_json()
            .map_err(|e| fetch_error(format!("invalid release JSON: {}", e)))?;

        Ok(release.into())
    }
}
