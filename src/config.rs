use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::update::catalog::SelectionRules;

/// Upper bound for the installer's wait after terminating the application.
pub const MAX_GRACE_DELAY_SECS: u64 = 10;

// ============================================================================
// Updater Config
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UpdaterConfig {
    /// GitHub `owner/name` the releases are published under
    pub repository: String,
    pub user_agent: String,
    /// Asset names must start with this (case-insensitive) to be a code update
    pub product_prefix: String,
    pub archive_extension: String,
    /// Assets that match prefix/extension but are separate downloads
    pub excluded_assets: Vec<String>,
    pub default_asset: String,
    /// Build output folders the payload may be nested in, in priority order
    pub payload_dirs: Vec<String>,
    pub executable_name: String,
    /// Optional auxiliary bundle fetched by exact name
    pub cache_asset: String,
    pub grace_delay_secs: u64,
    /// Overrides the per-user temp working directory
    pub temp_root: Option<PathBuf>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            repository: "heisthecat31/Spark".to_string(),
            user_agent: "Spark-Updater".to_string(),
            product_prefix: "Spark".to_string(),
            archive_extension: ".zip".to_string(),
            excluded_assets: vec!["SparkTTSCache.zip".to_string()],
            default_asset: "Spark.zip".to_string(),
            payload_dirs: vec![
                "net6.0-windows10.0.17763.0".to_string(),
                "net6.0-windows".to_string(),
            ],
            executable_name: default_executable_name().to_string(),
            cache_asset: "SparkTTSCache.zip".to_string(),
            grace_delay_secs: 2,
            temp_root: None,
        }
    }
}

fn default_executable_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "Spark.exe"
    } else {
        "Spark"
    }
}

impl UpdaterConfig {
    fn get_path() -> PathBuf {
        crate::spark_path!("updater.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::get_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(config) = serde_json::from_str(&content) {
                    return config;
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) {
        self.save_to(&Self::get_path());
    }

    pub fn save_to(&self, path: &Path) {
        // Ensure parent dir exists
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = fs::write(path, json);
        }
    }

    /// GitHub API endpoint for the latest release
    pub fn releases_url(&self) -> String {
        format!("https://api.github.com/repos/{}/releases/latest", self.repository)
    }

    pub fn selection_rules(&self) -> SelectionRules {
        SelectionRules {
            prefix: self.product_prefix.clone(),
            extension: self.archive_extension.clone(),
            excluded: self.excluded_assets.clone(),
            default_name: self.default_asset.clone(),
        }
    }

    /// Grace delay after terminating the application, clamped to `MAX_GRACE_DELAY_SECS`
    pub fn grace_delay(&self) -> Duration {
        Duration::from_secs(self.grace_delay_secs.min(MAX_GRACE_DELAY_SECS))
    }

    /// Per-user temp working directory (`<data dir>/Temp` unless overridden)
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| crate::spark_path!("Temp"))
    }

    /// Where the installer records files it could not replace
    pub fn swap_report_path(&self) -> PathBuf {
        self.temp_root().join("swap-report.txt")
    }

    /// Folder the auxiliary cache bundle is unpacked into
    pub fn cache_dir(&self) -> PathBuf {
        let stem = Path::new(&self.cache_asset)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "SparkTTSCache".to_string());
        std::env::temp_dir().join(stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_delay_is_clamped() {
        let config = UpdaterConfig {
            grace_delay_secs: 120,
            ..Default::default()
        };
        assert_eq!(config.grace_delay(), Duration::from_secs(MAX_GRACE_DELAY_SECS));

        let config = UpdaterConfig {
            grace_delay_secs: 3,
            ..Default::default()
        };
        assert_eq!(config.grace_delay(), Duration::from_secs(3));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: UpdaterConfig =
            serde_json::from_str(r#"{"product_prefix":"Product"}"#).unwrap();
        assert_eq!(config.product_prefix, "Product");
        assert_eq!(config.default_asset, "Spark.zip");
        assert_eq!(config.grace_delay_secs, 2);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("updater.json");

        let config = UpdaterConfig {
            repository: "someone/Product".to_string(),
            excluded_assets: vec!["ProductTTSCache.zip".to_string()],
            ..Default::default()
        };
        config.save_to(&path);

        assert_eq!(UpdaterConfig::load_from(&path), config);
    }

    #[test]
    fn unreadable_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updater.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(UpdaterConfig::load_from(&path), UpdaterConfig::default());
    }

    #[test]
    fn temp_root_override_is_respected() {
        let config = UpdaterConfig {
            temp_root: Some(PathBuf::from("/tmp/spark-test-root")),
            ..Default::default()
        };
        assert_eq!(config.temp_root(), PathBuf::from("/tmp/spark-test-root"));
        assert_eq!(
            config.swap_report_path(),
            PathBuf::from("/tmp/spark-test-root/swap-report.txt")
        );
    }

    #[test]
    fn cache_dir_is_named_after_bundle() {
        let config = UpdaterConfig::default();
        assert!(config.cache_dir().ends_with("SparkTTSCache"));
    }

    #[test]
    fn releases_url_points_at_latest() {
        let config = UpdaterConfig::default();
        assert_eq!(
            config.releases_url(),
            "https://api.github.com/repos/heisthecat31/Spark/releases/latest"
        );
    }
}
