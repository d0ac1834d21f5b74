//! Shared types for the tiled terrain streamer.
//!
//! # Invariants
//! - A [`GridKey`] is produced only for coordinates inside the codec's bound.
//! - Grid parameters are validated before any tiler is built from them.

mod config;
mod grid_key;
mod types;

pub use config::{
    ConfigError, GridConfig, MIN_GRID_EXTENT, SUPPORTED_TILE_SIZES, WindowSize,
    check_runtime_extent,
};
pub use grid_key::{DEFAULT_MAX_GRID_DIM, GridError, GridKey, KeyCodec};
pub use types::{Direction, Placement, TileCoord, tile_world_size};
