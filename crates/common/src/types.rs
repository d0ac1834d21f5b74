use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// A 2D tile coordinate in the terrain grid (Y is height and not partitioned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub z: i32,
}

impl TileCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Tile containing a world position, for tiles `tile_world_size` units wide.
    pub fn from_world(pos: Vec3, tile_world_size: f32) -> Self {
        Self::from_world_xz(Vec2::new(pos.x, pos.z), tile_world_size)
    }

    /// Tile containing a world `(x, z)` point.
    pub fn from_world_xz(xz: Vec2, tile_world_size: f32) -> Self {
        Self {
            x: (xz.x / tile_world_size).floor() as i32,
            z: (xz.y / tile_world_size).floor() as i32,
        }
    }

    /// The coordinate one step away in `dir`, without bounds checking.
    pub fn step(self, dir: Direction) -> Self {
        let (dx, dz) = dir.offset();
        Self::new(self.x.saturating_add(dx), self.z.saturating_add(dz))
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Grid-aligned neighbour direction used for LOD stitching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// +x, the "right" neighbour.
    PosX,
    /// -x, the "left" neighbour.
    NegX,
    /// +z, the "down" neighbour.
    PosZ,
    /// -z, the "top" neighbour.
    NegZ,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::PosX,
        Direction::NegX,
        Direction::PosZ,
        Direction::NegZ,
    ];

    pub fn offset(self) -> (i32, i32) {
        match self {
            Self::PosX => (1, 0),
            Self::NegX => (-1, 0),
            Self::PosZ => (0, 1),
            Self::NegZ => (0, -1),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::PosX => Self::NegX,
            Self::NegX => Self::PosX,
            Self::PosZ => Self::NegZ,
            Self::NegZ => Self::PosZ,
        }
    }

    /// Stable index into per-direction arrays.
    pub fn index(self) -> usize {
        match self {
            Self::PosX => 0,
            Self::NegX => 1,
            Self::PosZ => 2,
            Self::NegZ => 3,
        }
    }
}

/// World-space placement of a tile, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Centre of the tile in world space.
    pub translation: Vec3,
    /// Horizontal scale is the tile scale; vertical scale is 1.
    pub scale: Vec3,
}

impl Placement {
    /// Placement of tile `coord` for a grid of `tile_size` vertices scaled by `tile_scale`.
    pub fn for_tile(coord: TileCoord, tile_size: u32, tile_scale: u32) -> Self {
        let ws = tile_world_size(tile_size, tile_scale);
        let half = ws / 2.0;
        Self {
            translation: Vec3::new(
                coord.x as f32 * ws + half,
                0.0,
                coord.z as f32 * ws + half,
            ),
            scale: Vec3::new(tile_scale as f32, 1.0, tile_scale as f32),
        }
    }

    /// World-space `(x, z)` of the tile's minimum corner.
    pub fn corner(&self, tile_world_size: f32) -> Vec2 {
        let half = tile_world_size / 2.0;
        Vec2::new(self.translation.x - half, self.translation.z - half)
    }
}

/// World-space edge length of one tile.
pub fn tile_world_size(tile_size: u32, tile_scale: u32) -> f32 {
    (u64::from(tile_size) * u64::from(tile_scale)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_world_floors_positions() {
        assert_eq!(
            TileCoord::from_world(Vec3::new(10.0, 5.0, 300.0), 256.0),
            TileCoord::new(0, 1)
        );
        assert_eq!(
            TileCoord::from_world(Vec3::new(-1.0, 0.0, 0.0), 256.0),
            TileCoord::new(-1, 0)
        );
    }

    #[test]
    fn step_and_opposite_cancel() {
        let c = TileCoord::new(5, 5);
        for dir in Direction::ALL {
            assert_eq!(c.step(dir).step(dir.opposite()), c);
        }
    }

    #[test]
    fn direction_indices_are_distinct() {
        let mut seen = [false; 4];
        for dir in Direction::ALL {
            assert!(!seen[dir.index()]);
            seen[dir.index()] = true;
        }
    }

    #[test]
    fn placement_centres_tile() {
        let p = Placement::for_tile(TileCoord::new(2, 3), 256, 2);
        assert_eq!(p.translation, Vec3::new(2.0 * 512.0 + 256.0, 0.0, 3.0 * 512.0 + 256.0));
        assert_eq!(p.scale, Vec3::new(2.0, 1.0, 2.0));
        assert_eq!(p.corner(512.0), Vec2::new(1024.0, 1536.0));
    }
}
