use tilestream_common::TileCoord;

use crate::tile::TileData;

/// Errors from loading a single tile. Always recovered at tile granularity.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("tile {0} not found")]
    NotFound(TileCoord),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed tile data: {0}")]
    Malformed(String),
    #[error("tile has {actual} heights, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Load collaborator for tile content.
///
/// Called from the loader thread only, one tile at a time, so implementations
/// need not be reentrant.
pub trait TileSource: Send {
    /// Load the surface data of tile `coord`.
    fn load(&mut self, coord: TileCoord) -> Result<TileData, LoadError>;

    /// Short human-readable description used in logs.
    fn describe(&self) -> String {
        "tile source".to_string()
    }
}

impl<F> TileSource for F
where
    F: FnMut(TileCoord) -> Result<TileData, LoadError> + Send,
{
    fn load(&mut self, coord: TileCoord) -> Result<TileData, LoadError> {
        self(coord)
    }

    fn describe(&self) -> String {
        "closure tile source".to_string()
    }
}
