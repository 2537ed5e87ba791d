//! Tiler backed by an external tile generation script.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::TilingConfig;
use super::error::TileError;
use super::size::recover_image_size;
use super::traits::{TileOutcome, TileRequest, Tiler};

/// Runs `script <original> <tiles_root> <tile_size> <scales>` and reads the
/// image size back from the tile tree once the script exits zero.
pub struct ScriptTiler {
    script: PathBuf,
    timeout: Duration,
}

impl ScriptTiler {
    pub fn new(config: &TilingConfig) -> Self {
        Self {
            script: config.script.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tiler for ScriptTiler {
    fn name(&self) -> &str {
        "script"
    }

    async fn tile(&self, request: &TileRequest) -> Result<TileOutcome, TileError> {
        if !request.original.exists() {
            return Err(TileError::InputNotFound {
                path: request.original.clone(),
            });
        }

        let scales = request
            .scales
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");

        debug!(
            script = %self.script.display(),
            original = %request.original.display(),
            tile_size = request.tile_size,
            scales = %scales,
            "Running tile script"
        );

        let child = Command::new(&self.script)
            .arg(&request.original)
            .arg(&request.tiles_root)
            .arg(request.tile_size.to_string())
            .arg(&scales)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TileError::ScriptNotFound {
                        path: self.script.clone(),
                    }
                } else {
                    TileError::Io(e)
                }
            })?;

        // Dropping the future on timeout kills the child.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(original = %request.original.display(), "Tile script timed out");
                return Err(TileError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(TileError::ScriptFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let size = recover_image_size(&request.tile_root, request.tile_size);
        info!(
            original = %request.original.display(),
            width = size.map(|s| s.width),
            height = size.map(|s| s.height),
            "Tile script finished"
        );
        Ok(TileOutcome { size })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tiler::ImageSize;
    use image::RgbImage;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("tile.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn tiler(script: PathBuf) -> ScriptTiler {
        ScriptTiler::new(&TilingConfig {
            script,
            ..Default::default()
        })
    }

    fn request(temp: &TempDir) -> TileRequest {
        let original = temp.path().join("42.jpg");
        RgbImage::new(300, 200).save(&original).unwrap();
        TileRequest {
            original,
            tiles_root: temp.path().join("tiles"),
            tile_root: temp.path().join("tiles/abcd/ef01"),
            tile_size: 256,
            scales: vec![50, 100],
        }
    }

    #[tokio::test]
    async fn test_successful_run_recovers_size() {
        let temp = TempDir::new().unwrap();
        let script = write_script(
            temp.path(),
            r#"[ "$3" = "256" ] && [ "$4" = "50,100" ] || exit 9
mkdir -p "$2/abcd/ef01" && cp "$1" "$2/abcd/ef01/original.jpg""#,
        );

        let outcome = tiler(script).tile(&request(&temp)).await.unwrap();
        assert_eq!(
            outcome.size,
            Some(ImageSize {
                width: 300,
                height: 200
            })
        );
    }

    #[tokio::test]
    async fn test_success_without_artifacts_has_no_size() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "exit 0");

        let outcome = tiler(script).tile(&request(&temp)).await.unwrap();
        assert_eq!(outcome.size, None);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "echo 'convert: bad header' >&2\nexit 3");

        let err = tiler(script).tile(&request(&temp)).await.unwrap_err();
        match err {
            TileError::ScriptFailed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "convert: bad header");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_script() {
        let temp = TempDir::new().unwrap();
        let err = tiler(temp.path().join("nope.sh"))
            .tile(&request(&temp))
            .await
            .unwrap_err();
        assert!(matches!(err, TileError::ScriptNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_original() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "exit 0");
        let mut req = request(&temp);
        req.original = temp.path().join("gone.jpg");

        let err = tiler(script).tile(&req).await.unwrap_err();
        assert!(matches!(err, TileError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "sleep 5");

        let err = tiler(script)
            .with_timeout(Duration::from_millis(200))
            .tile(&request(&temp))
            .await
            .unwrap_err();
        assert!(matches!(err, TileError::Timeout { .. }));
    }
}
