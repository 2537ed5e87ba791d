use std::fs;
use std::path::Path;

use regex_lite::Regex;

use super::{types::Config, ConfigError};
use crate::discovery::MAX_EXTENSION_LEN;

/// Validate configuration
/// Currently validates:
/// - Paths are non-empty
/// - Transport attempts, tile size and scales are usable
/// - Image extensions are lowercase alphanumeric
/// - Internal URL patterns compile
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for (name, path) in [
        ("storage.originals_dir", &config.storage.originals_dir),
        ("storage.tiles_dir", &config.storage.tiles_dir),
        ("database.path", &config.database.path),
        ("tiling.script", &config.tiling.script),
    ] {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                name
            )));
        }
    }

    if config.storage.originals_dir == config.storage.tiles_dir {
        return Err(ConfigError::ValidationError(
            "storage.originals_dir and storage.tiles_dir must differ".to_string(),
        ));
    }

    if config.transport.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "transport.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.tiling.tile_size == 0 {
        return Err(ConfigError::ValidationError(
            "tiling.tile_size cannot be 0".to_string(),
        ));
    }

    if config.tiling.scales.is_empty() {
        return Err(ConfigError::ValidationError(
            "tiling.scales cannot be empty".to_string(),
        ));
    }

    if let Some(scale) = config.tiling.scales.iter().find(|s| **s == 0 || **s > 100) {
        return Err(ConfigError::ValidationError(format!(
            "tiling.scales entry {} is outside 1..=100",
            scale
        )));
    }

    validate_image_extensions(&config.discovery.image_extensions)?;

    for pattern in &config.discovery.internal_url_patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::ValidationError(format!(
                "discovery.internal_url_patterns entry {:?} is invalid: {}",
                pattern, e
            ))
        })?;
    }

    Ok(())
}

fn validate_image_extensions(extensions: &[String]) -> Result<(), ConfigError> {
    if extensions.is_empty() {
        return Err(ConfigError::ValidationError(
            "discovery.image_extensions cannot be empty".to_string(),
        ));
    }

    for ext in extensions {
        let well_formed = !ext.is_empty()
            && ext.len() < MAX_EXTENSION_LEN
            && ext
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !well_formed {
            return Err(ConfigError::ValidationError(format!(
                "discovery.image_extensions entry {:?} must be a short lowercase alphanumeric extension",
                ext
            )));
        }
    }

    Ok(())
}

/// Make sure both storage roots exist and are writable.
///
/// Missing directories are created. A directory that cannot be created or
/// written to is a fatal configuration error.
pub fn ensure_storage_dirs(config: &Config) -> Result<(), ConfigError> {
    for dir in [&config.storage.originals_dir, &config.storage.tiles_dir] {
        ensure_writable_dir(dir)?;
    }
    Ok(())
}

fn ensure_writable_dir(dir: &Path) -> Result<(), ConfigError> {
    let inaccessible = |reason: String| ConfigError::InaccessibleDirectory {
        path: dir.display().to_string(),
        reason,
    };

    fs::create_dir_all(dir).map_err(|e| inaccessible(e.to_string()))?;

    let probe = dir.join(format!(".mediafetch-probe-{}", std::process::id()));
    fs::write(&probe, b"").map_err(|e| inaccessible(format!("not writable: {}", e)))?;
    fs::remove_file(&probe).map_err(|e| inaccessible(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use tempfile::TempDir;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[storage]
originals_dir = "/data/originals"
tiles_dir = "/data/tiles"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = base_config();
        config.transport.max_attempts = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_tile_size_fails() {
        let mut config = base_config();
        config.tiling.tile_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_scale_out_of_range_fails() {
        let mut config = base_config();
        config.tiling.scales = vec![50, 150];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_uppercase_extension_fails() {
        let mut config = base_config();
        config.discovery.image_extensions = vec!["JPG".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_extensions_fails() {
        let mut config = base_config();
        config.discovery.image_extensions.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bad_pattern_fails() {
        let mut config = base_config();
        config.discovery.internal_url_patterns = vec!["(unclosed".to_string()];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("internal_url_patterns"));
    }

    #[test]
    fn test_validate_same_storage_dirs_fails() {
        let mut config = base_config();
        config.storage.tiles_dir = config.storage.originals_dir.clone();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_ensure_storage_dirs_creates_missing() {
        let temp = TempDir::new().unwrap();
        let mut config = base_config();
        config.storage.originals_dir = temp.path().join("a/originals");
        config.storage.tiles_dir = temp.path().join("b/tiles");

        ensure_storage_dirs(&config).unwrap();

        assert!(config.storage.originals_dir.is_dir());
        assert!(config.storage.tiles_dir.is_dir());
        assert_eq!(fs::read_dir(&config.storage.tiles_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_storage_dirs_rejects_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let mut config = base_config();
        config.storage.originals_dir = blocker;
        config.storage.tiles_dir = temp.path().join("tiles");

        let err = ensure_storage_dirs(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InaccessibleDirectory { .. }));
    }
}
