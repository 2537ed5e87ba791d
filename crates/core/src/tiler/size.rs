//! Recovering the original image size from a finished tile tree.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Full-size JPEG rendition that newer tile scripts leave in the tile root.
pub const ORIGINAL_TILE_NAME: &str = "original.jpg";

/// Scale directory holding the full-resolution tile grid.
const FULL_SCALE_DIR: &str = "100";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Reads the image size back from a tile tree.
///
/// `original.jpg` wins when it is readable. Otherwise the full-scale grid
/// under `<tile_size>/100/` is used: tiles there are named
/// `<columns>_<rows>_<row>_<col>.jpg`, and every tile but the bottom-right
/// one is exactly `tile_size` wide and high.
pub fn recover_image_size(tile_root: &Path, tile_size: u32) -> Option<ImageSize> {
    if let Ok((width, height)) = image::image_dimensions(tile_root.join(ORIGINAL_TILE_NAME)) {
        return Some(ImageSize { width, height });
    }
    size_from_grid(tile_root, tile_size)
}

fn size_from_grid(tile_root: &Path, tile_size: u32) -> Option<ImageSize> {
    let grid_dir = tile_root.join(tile_size.to_string()).join(FULL_SCALE_DIR);
    let entries = match std::fs::read_dir(&grid_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %grid_dir.display(), "No full-scale tile grid: {}", e);
            return None;
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".jpg"))
        .collect();
    names.sort();

    for name in names {
        let Some((columns, rows)) = parse_grid_dimensions(&name) else {
            continue;
        };
        let (last_col, last_row) = (columns - 1, rows - 1);
        let corner = grid_dir.join(format!("{}_{}_{}_{}.jpg", columns, rows, last_row, last_col));

        if let Ok((corner_width, corner_height)) = image::image_dimensions(&corner) {
            let width = tile_size.checked_mul(last_col)?.checked_add(corner_width)?;
            let height = tile_size.checked_mul(last_row)?.checked_add(corner_height)?;
            return Some(ImageSize { width, height });
        }
    }
    None
}

/// `"4_3_0_1.jpg"` gives `(4, 3)`.
fn parse_grid_dimensions(name: &str) -> Option<(u32, u32)> {
    let mut parts = name.split('_');
    let columns: u32 = parts.next()?.parse().ok()?;
    let rows: u32 = parts.next()?.parse().ok()?;
    (columns > 0 && rows > 0).then_some((columns, rows))
}
