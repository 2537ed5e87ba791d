//! Configuration for the tiler module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the script-based tiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilingConfig {
    /// Executable invoked as `script <original> <tiles_root> <tile_size> <scales>`.
    #[serde(default = "default_script")]
    pub script: PathBuf,

    /// Edge length of a square tile, in pixels.
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Zoom levels to generate, as percentages of the original.
    #[serde(default = "default_scales")]
    pub scales: Vec<u32>,

    /// Timeout for one script run in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_script() -> PathBuf {
    PathBuf::from("./generate_tiles_for_image.sh")
}

fn default_tile_size() -> u32 {
    256
}

fn default_scales() -> Vec<u32> {
    vec![10, 25, 50, 75, 100]
}

fn default_timeout() -> u64 {
    1800 // 30 minutes
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            script: default_script(),
            tile_size: default_tile_size(),
            scales: default_scales(),
            timeout_secs: default_timeout(),
        }
    }
}

impl TilingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TilingConfig::default();
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.scales, vec![10, 25, 50, 75, 100]);
        assert!(config.script.ends_with("generate_tiles_for_image.sh"));
    }

    #[test]
    fn test_partial_toml() {
        let config: TilingConfig = toml::from_str("scales = [100]\ntimeout_secs = 5").unwrap();
        assert_eq!(config.scales, vec![100]);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.tile_size, 256);
    }
}
