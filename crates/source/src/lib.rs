//! Tiled terrain maps on disk: descriptors, `.hmap` tile files, and the tile
//! sources that read them.
//!
//! # Invariants
//! - A map is only handed out after its descriptor validates and its origin
//!   tile loads at the declared size.
//! - Sources report a missing tile as `LoadError::NotFound`, never as a panic.

mod archive;
pub mod codec;
mod descriptor;
pub mod layout;
mod loose;
mod map;
mod procedural;

pub use archive::{ArchiveTileSource, write_archives};
pub use descriptor::{MAP_VERSION, MapDescriptor, TileType};
pub use layout::StorageLayout;
pub use loose::{LooseTileSource, write_loose_tile};
pub use map::{OpenedMap, open_map, probe_origin, write_map};
pub use procedural::ProceduralSource;

use tilestream_common::ConfigError;
use tilestream_kernel::LoadError;

/// Errors from reading, validating, or writing a map.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("map descriptor line {line}: {msg}")]
    Descriptor { line: usize, msg: String },
    #[error("map descriptor is missing `{0}`")]
    MissingKey(&'static str),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid map: {0}")]
    Config(#[from] ConfigError),
    #[error("tile type `{0}` cannot be streamed as terrain")]
    UnsupportedTileType(TileType),
    #[error("origin tile could not be loaded: {0}")]
    OriginMissing(#[source] LoadError),
    #[error("origin tile is {actual} wide, map declares {expected}")]
    OriginSizeMismatch { expected: u32, actual: u32 },
    #[error("tile error: {0}")]
    Tile(#[from] LoadError),
}
