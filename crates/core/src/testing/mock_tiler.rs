//! Mock tiler for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::tiler::{ImageSize, TileError, TileOutcome, TileRequest, Tiler};

/// Marker file the mock drops into every tile tree it "generates".
pub const MOCK_TILE_MARKER: &str = "tiles.mock";

/// Mock implementation of the Tiler trait.
///
/// Each successful run creates the request's tile root with a marker file
/// and reports the configured size (640x480 unless changed).
#[derive(Debug)]
pub struct MockTiler {
    /// Recorded requests.
    requests: Arc<RwLock<Vec<TileRequest>>>,
    /// Size reported by successful runs.
    size: Arc<RwLock<Option<ImageSize>>>,
    /// If set, the next run will fail with this error.
    next_error: Arc<RwLock<Option<TileError>>>,
}

impl Default for MockTiler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTiler {
    /// Create a new mock tiler.
    pub fn new() -> Self {
        Self {
            requests: Arc::new(RwLock::new(Vec::new())),
            size: Arc::new(RwLock::new(Some(ImageSize {
                width: 640,
                height: 480,
            }))),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Get all recorded requests.
    pub async fn recorded_requests(&self) -> Vec<TileRequest> {
        self.requests.read().await.clone()
    }

    /// Get the number of tile runs.
    pub async fn tile_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Set the size successful runs report. `None` simulates a run that
    /// exits cleanly but leaves nothing to read the size from.
    pub async fn set_size(&self, size: Option<ImageSize>) {
        *self.size.write().await = size;
    }

    /// Configure the next run to fail with the given error.
    pub async fn set_next_error(&self, error: TileError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl Tiler for MockTiler {
    fn name(&self) -> &str {
        "mock"
    }

    async fn tile(&self, request: &TileRequest) -> Result<TileOutcome, TileError> {
        self.requests.write().await.push(request.clone());

        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }

        tokio::fs::create_dir_all(&request.tile_root).await?;
        tokio::fs::write(request.tile_root.join(MOCK_TILE_MARKER), b"").await?;

        Ok(TileOutcome {
            size: *self.size.read().await,
        })
    }
}
