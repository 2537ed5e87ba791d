//! Tile pyramid generation for image originals.
//!
//! The [`Tiler`] trait hides how tiles get made. [`ScriptTiler`] shells out
//! to an external tile generation script; afterwards the image size is
//! rebuilt from what the script left on disk (see [`recover_image_size`]).

mod config;
mod error;
mod script;
mod size;
mod traits;

pub use config::TilingConfig;
pub use error::TileError;
pub use script::ScriptTiler;
pub use size::{recover_image_size, ImageSize, ORIGINAL_TILE_NAME};
pub use traits::{TileOutcome, TileRequest, Tiler};
