//! Settings the phase runners need, pulled out of the full [`Config`].

use crate::config::{default_image_extensions, Config};
use crate::integrity::ChecksumAlgorithm;

/// Per-run settings for [`PhaseOrchestrator`](super::PhaseOrchestrator).
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Tile edge in pixels, passed to the tiler and used for size recovery.
    pub tile_size: u32,
    /// Zoom levels in percent.
    pub scales: Vec<u32>,
    pub preserve_partial_files: bool,
    pub image_extensions: Vec<String>,
    pub internal_url_patterns: Vec<String>,
    /// Centres whose FTP access goes straight to anonymous login.
    pub skip_credentials_centres: Vec<i64>,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            checksum_algorithm: config.integrity.algorithm,
            tile_size: config.tiling.tile_size,
            scales: config.tiling.scales.clone(),
            preserve_partial_files: config.recovery.preserve_partial_files,
            image_extensions: config.discovery.image_extensions.clone(),
            internal_url_patterns: config.discovery.internal_url_patterns.clone(),
            skip_credentials_centres: config.transport.skip_credentials_centres.clone(),
        }
    }

    pub fn skips_credentials(&self, centre_id: i64) -> bool {
        self.skip_credentials_centres.contains(&centre_id)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            checksum_algorithm: ChecksumAlgorithm::default(),
            tile_size: 256,
            scales: vec![10, 25, 50, 75, 100],
            preserve_partial_files: false,
            image_extensions: default_image_extensions(),
            internal_url_patterns: Vec::new(),
            skip_credentials_centres: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_default_matches_config_defaults() {
        let config = load_config_from_str(
            r#"
[storage]
originals_dir = "/data/originals"
tiles_dir = "/data/tiles"
"#,
        )
        .unwrap();
        assert_eq!(OrchestratorConfig::from_config(&config), OrchestratorConfig::default());
    }

    #[test]
    fn test_from_config() {
        let config = load_config_from_str(
            r#"
[storage]
originals_dir = "/data/originals"
tiles_dir = "/data/tiles"

[transport]
skip_credentials_centres = [4]

[tiling]
tile_size = 512
scales = [50, 100]

[integrity]
algorithm = "md5"
"#,
        )
        .unwrap();

        let settings = OrchestratorConfig::from_config(&config);
        assert_eq!(settings.tile_size, 512);
        assert_eq!(settings.scales, vec![50, 100]);
        assert_eq!(settings.checksum_algorithm, ChecksumAlgorithm::Md5);
        assert!(settings.skips_credentials(4));
        assert!(!settings.skips_credentials(5));
    }
}
