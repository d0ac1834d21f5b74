use serde::{Deserialize, Serialize};

use crate::grid_key::{DEFAULT_MAX_GRID_DIM, KeyCodec};
use crate::types::{TileCoord, tile_world_size};

/// Tile edge lengths (in heightmap cells) a map may declare.
pub const SUPPORTED_TILE_SIZES: [u32; 4] = [256, 512, 1024, 2048];

/// Smallest grid extent accepted at construction.
pub const MIN_GRID_EXTENT: u32 = 16;

/// Construction-time and runtime configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("grid extent {axis}={value} must be a power of two in [{min}, {max}]")]
    InvalidExtent {
        axis: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("unsupported tile size {0} (expected one of 256, 512, 1024, 2048)")]
    UnsupportedTileSize(u32),
    #[error("tile scale must be a positive integer")]
    ZeroScale,
    #[error("window size {0} must be one of 3, 5, 7, 9")]
    InvalidWindowSize(u32),
    #[error("maximum grid dimension {0} must be at least {MIN_GRID_EXTENT}")]
    InvalidMaxGridDim(u32),
}

/// Static description of a tiled grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of tiles along X.
    pub num_tiles_x: u32,
    /// Number of tiles along Z.
    pub num_tiles_z: u32,
    /// Heightmap cells along one tile edge (the tile holds `tile_size + 1` vertices per side).
    pub tile_size: u32,
    /// World units per heightmap cell.
    pub tile_scale: u32,
    /// Bound on addressable coordinates, shared by both axes.
    #[serde(default = "default_max_grid_dim")]
    pub max_grid_dim: u32,
}

fn default_max_grid_dim() -> u32 {
    DEFAULT_MAX_GRID_DIM
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            num_tiles_x: 16,
            num_tiles_z: 16,
            tile_size: 256,
            tile_scale: 1,
            max_grid_dim: DEFAULT_MAX_GRID_DIM,
        }
    }
}

impl GridConfig {
    /// Validate every field and return the key codec for this grid.
    pub fn validate(&self) -> Result<KeyCodec, ConfigError> {
        let codec = KeyCodec::new(self.max_grid_dim)
            .ok()
            .filter(|_| self.max_grid_dim >= MIN_GRID_EXTENT)
            .ok_or(ConfigError::InvalidMaxGridDim(self.max_grid_dim))?;
        check_extent("num_tiles_x", self.num_tiles_x, MIN_GRID_EXTENT, self.max_grid_dim)?;
        check_extent("num_tiles_z", self.num_tiles_z, MIN_GRID_EXTENT, self.max_grid_dim)?;
        if !SUPPORTED_TILE_SIZES.contains(&self.tile_size) {
            return Err(ConfigError::UnsupportedTileSize(self.tile_size));
        }
        if self.tile_scale == 0 {
            return Err(ConfigError::ZeroScale);
        }
        Ok(codec)
    }

    /// World-space edge length of one tile.
    pub fn tile_world_size(&self) -> f32 {
        tile_world_size(self.tile_size, self.tile_scale)
    }

    /// Whether `coord` lies inside `[0, num_tiles_x) x [0, num_tiles_z)`.
    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.x >= 0
            && coord.z >= 0
            && (coord.x as u32) < self.num_tiles_x
            && (coord.z as u32) < self.num_tiles_z
    }
}

/// Extent check used by runtime resizing: a power of two, `> 4`, within the key bound.
pub fn check_runtime_extent(axis: &'static str, value: u32, max_grid_dim: u32) -> Result<(), ConfigError> {
    check_extent(axis, value, 8, max_grid_dim)
}

fn check_extent(axis: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if value.is_power_of_two() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidExtent {
            axis,
            value,
            min,
            max,
        })
    }
}

/// Side length of the square of tiles kept resident around the viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum WindowSize {
    #[default]
    Three,
    Five,
    Seven,
    Nine,
}

impl WindowSize {
    pub fn get(self) -> u32 {
        match self {
            Self::Three => 3,
            Self::Five => 5,
            Self::Seven => 7,
            Self::Nine => 9,
        }
    }

    /// Tiles on each side of the centre tile.
    pub fn half(self) -> i32 {
        (self.get() / 2) as i32
    }
}

impl TryFrom<u32> for WindowSize {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(Self::Three),
            5 => Ok(Self::Five),
            7 => Ok(Self::Seven),
            9 => Ok(Self::Nine),
            other => Err(ConfigError::InvalidWindowSize(other)),
        }
    }
}

impl From<WindowSize> for u32 {
    fn from(size: WindowSize) -> Self {
        size.get()
    }
}
