//! Trait definitions for the tiler module.

use std::path::PathBuf;

use async_trait::async_trait;

use super::error::TileError;
use super::size::ImageSize;

/// One original to tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub original: PathBuf,
    /// Root of all tile trees; the tool derives the per-checksum tree itself.
    pub tiles_root: PathBuf,
    /// Where this original's tiles are expected to land.
    pub tile_root: PathBuf,
    pub tile_size: u32,
    pub scales: Vec<u32>,
}

/// A tile run that exited successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileOutcome {
    /// `None` when nothing on disk gave the image size away.
    pub size: Option<ImageSize>,
}

/// Generates a tile pyramid for one image.
#[async_trait]
pub trait Tiler: Send + Sync {
    /// Returns the name of this tiler implementation.
    fn name(&self) -> &str;

    async fn tile(&self, request: &TileRequest) -> Result<TileOutcome, TileError>;
}
