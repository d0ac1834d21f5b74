use serde::{Deserialize, Serialize};

use crate::types::TileCoord;

/// Default bound on addressable tile coordinates along either axis.
pub const DEFAULT_MAX_GRID_DIM: u32 = 4096;

/// Single-integer encoding of a tile coordinate: `x + z * max_dim`.
///
/// Keys order by row (`z`) first, then column (`x`), which gives the
/// reconciler its deterministic scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridKey(pub u64);

impl std::fmt::Display for GridKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors from grid key encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("tile coordinate ({x}, {z}) outside addressable grid [0, {max})")]
    OutOfRange { x: i64, z: i64, max: u32 },
    #[error("grid key {key} outside addressable grid of dimension {max}")]
    KeyOutOfRange { key: u64, max: u32 },
    #[error("invalid grid dimension bound {0}")]
    InvalidBound(u32),
}

/// Bijection between tile coordinates and [`GridKey`]s for one bounded grid.
///
/// The bound is per instance so independent tilers with different limits can
/// coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodec {
    max_dim: u32,
}

impl KeyCodec {
    /// Create a codec addressing `[0, max_dim)` on both axes.
    pub fn new(max_dim: u32) -> Result<Self, GridError> {
        if max_dim == 0 || max_dim > i32::MAX as u32 {
            return Err(GridError::InvalidBound(max_dim));
        }
        Ok(Self { max_dim })
    }

    /// Upper bound (exclusive) on either coordinate.
    pub fn max_dim(&self) -> u32 {
        self.max_dim
    }

    /// Encode `(x, z)`. Fails when either axis is negative or `>= max_dim`.
    pub fn encode(&self, x: i32, z: i32) -> Result<GridKey, GridError> {
        let max = i64::from(self.max_dim);
        let (xi, zi) = (i64::from(x), i64::from(z));
        if !(0..max).contains(&xi) || !(0..max).contains(&zi) {
            return Err(GridError::OutOfRange {
                x: xi,
                z: zi,
                max: self.max_dim,
            });
        }
        Ok(GridKey(xi as u64 + zi as u64 * u64::from(self.max_dim)))
    }

    /// Encode a [`TileCoord`].
    pub fn encode_coord(&self, coord: TileCoord) -> Result<GridKey, GridError> {
        self.encode(coord.x, coord.z)
    }

    /// Exact inverse of [`KeyCodec::encode`].
    pub fn decode(&self, key: GridKey) -> Result<TileCoord, GridError> {
        let dim = u64::from(self.max_dim);
        if key.0 >= dim * dim {
            return Err(GridError::KeyOutOfRange {
                key: key.0,
                max: self.max_dim,
            });
        }
        Ok(TileCoord::new((key.0 % dim) as i32, (key.0 / dim) as i32))
    }
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self {
            max_dim: DEFAULT_MAX_GRID_DIM,
        }
    }
}
