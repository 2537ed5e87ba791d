use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::integrity::ChecksumAlgorithm;
use crate::tiler::TilingConfig;
use crate::transport::TransportConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub tiling: TilingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

/// Where originals and tiles live on disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub originals_dir: PathBuf,
    pub tiles_dir: PathBuf,
}

/// Job store database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mediafetch.db")
}

/// Tracking catalogue the discover action reads candidates from.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_path")]
    pub path: PathBuf,
    /// Overrides the candidate query. Must select, in order:
    /// centre, pipeline, genotype, strain, procedure, parameter, measurement, url.
    #[serde(default)]
    pub query: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            path: default_tracker_path(),
            query: None,
        }
    }
}

fn default_tracker_path() -> PathBuf {
    PathBuf::from("tracker.db")
}

/// Discovery filters and image classification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Extensions (lowercase, without the dot) treated as images.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    /// URLs matching any of these patterns are hosted internally and never fetched.
    #[serde(default)]
    pub internal_url_patterns: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            internal_url_patterns: Vec::new(),
        }
    }
}

pub fn default_image_extensions() -> Vec<String> {
    ["bmp", "dcm", "jpeg", "jpg", "png", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IntegrityConfig {
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecoveryConfig {
    /// Rename interrupted downloads aside instead of deleting them.
    #[serde(default)]
    pub preserve_partial_files: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_dir")]
    pub dir: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: default_lock_dir(),
        }
    }
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
[storage]
originals_dir = "/data/originals"
tiles_dir = "/data/tiles"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.originals_dir, PathBuf::from("/data/originals"));
        assert_eq!(config.database.path, PathBuf::from("mediafetch.db"));
        assert_eq!(config.transport.max_attempts, 3);
        assert_eq!(config.integrity.algorithm, ChecksumAlgorithm::Sha1);
        assert!(!config.recovery.preserve_partial_files);
        assert_eq!(config.discovery.image_extensions.len(), 7);
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[storage]
originals_dir = "/data/originals"
tiles_dir = "/data/tiles"

[tracker]
path = "/data/tracker.db"
query = "SELECT 1, 2, 3, 4, 5, 6, 7, 'http://x/y.jpg'"

[transport]
max_attempts = 4
retry_delay_ms = 250
skip_credentials_centres = [3, 7]

[discovery]
image_extensions = ["jpg", "png"]
internal_url_patterns = ["^https?://media\\.internal/"]

[integrity]
algorithm = "sha256"

[recovery]
preserve_partial_files = true

[lock]
dir = "/run/mediafetch"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.transport.max_attempts, 4);
        assert_eq!(config.transport.skip_credentials_centres, vec![3, 7]);
        assert_eq!(config.discovery.image_extensions, vec!["jpg", "png"]);
        assert_eq!(config.integrity.algorithm, ChecksumAlgorithm::Sha256);
        assert!(config.recovery.preserve_partial_files);
        assert_eq!(config.lock.dir, PathBuf::from("/run/mediafetch"));
        assert!(config.tracker.query.is_some());
    }

    #[test]
    fn test_deserialize_missing_storage_fails() {
        let toml = r#"
[database]
path = "jobs.db"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
