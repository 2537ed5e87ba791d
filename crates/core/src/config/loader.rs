use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix for environment variable overrides, e.g. `MEDIAFETCH_TRANSPORT__MAX_ATTEMPTS=5`.
pub const ENV_PREFIX: &str = "MEDIAFETCH_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[storage]
originals_dir = "/srv/media/originals"
tiles_dir = "/srv/media/tiles"

[transport]
max_attempts = 5
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.transport.max_attempts, 5);
        assert_eq!(config.tiling.tile_size, 256);
    }

    #[test]
    fn test_load_config_from_str_missing_storage() {
        let toml = r#"
[transport]
max_attempts = 3
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/mediafetch.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/var/lib/mediafetch/jobs.db"

[storage]
originals_dir = "/srv/originals"
tiles_dir = "/srv/tiles"

[tiling]
tile_size = 512
scales = [50, 100]
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.tiling.tile_size, 512);
        assert_eq!(config.tiling.scales, vec![50, 100]);
        assert_eq!(
            config.database.path.to_string_lossy(),
            "/var/lib/mediafetch/jobs.db"
        );
    }
}
