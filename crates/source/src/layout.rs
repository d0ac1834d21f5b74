use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tilestream_common::TileCoord;

/// Tiles per directory block along each axis.
pub const BLOCK_TILES: i32 = 64;

/// Extension of heightmap tile files.
pub const TILE_EXTENSION: &str = "hmap";

/// How tile files are stored under the map root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayout {
    /// `DIR-xxzz/TILE-xxzz.hmap` files on disk.
    #[default]
    Loose,
    /// One `DIR-xxzz.tar` archive per directory block. Always edit-locked.
    Archived,
}

impl StorageLayout {
    pub fn from_archived(archived: bool) -> Self {
        if archived { Self::Archived } else { Self::Loose }
    }

    pub fn is_archived(self) -> bool {
        self == Self::Archived
    }
}

/// `DIR-xxzz`: the 64x64 block holding `coord`.
pub fn dir_name(coord: TileCoord) -> String {
    format!(
        "DIR-{:02}{:02}",
        coord.x / BLOCK_TILES,
        coord.z / BLOCK_TILES
    )
}

/// `TILE-xxzz.hmap`: file name within the block.
pub fn tile_file_name(coord: TileCoord) -> String {
    format!(
        "TILE-{:02}{:02}.{TILE_EXTENSION}",
        coord.x % BLOCK_TILES,
        coord.z % BLOCK_TILES
    )
}

pub fn archive_name(coord: TileCoord) -> String {
    format!("{}.tar", dir_name(coord))
}

/// Path of a loose tile file under `root`.
pub fn loose_tile_path(root: &Path, coord: TileCoord) -> PathBuf {
    root.join(dir_name(coord)).join(tile_file_name(coord))
}

pub fn archive_path(root: &Path, coord: TileCoord) -> PathBuf {
    root.join(archive_name(coord))
}
