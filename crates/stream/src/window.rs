use glam::Vec3;
use tilestream_common::{GridConfig, TileCoord, WindowSize};

/// The square of tiles that should be resident around the viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewWindow {
    pub center: TileCoord,
    pub size: WindowSize,
}

impl ViewWindow {
    pub fn new(center: TileCoord, size: WindowSize) -> Self {
        Self { center, size }
    }

    /// Window centred on the tile containing `position`.
    pub fn around(position: Vec3, tile_world_size: f32, size: WindowSize) -> Self {
        Self::new(TileCoord::from_world(position, tile_world_size), size)
    }

    /// Whether `coord` lies in the unclipped window.
    pub fn contains(&self, coord: TileCoord) -> bool {
        let half = i64::from(self.size.half());
        (i64::from(coord.x) - i64::from(self.center.x)).abs() <= half
            && (i64::from(coord.z) - i64::from(self.center.z)).abs() <= half
    }

    /// Whether `coord` is desired: inside the window and inside the grid.
    pub fn desires(&self, coord: TileCoord, grid: &GridConfig) -> bool {
        self.contains(coord) && grid.contains(coord)
    }

    /// Desired coordinates clipped to the grid, row by row (z, then x).
    pub fn desired(&self, grid: &GridConfig) -> Vec<TileCoord> {
        let half = self.size.half();
        let mut result = Vec::with_capacity((self.size.get() * self.size.get()) as usize);
        for dz in -half..=half {
            for dx in -half..=half {
                let coord = TileCoord::new(
                    self.center.x.saturating_add(dx),
                    self.center.z.saturating_add(dz),
                );
                if grid.contains(coord) {
                    result.push(coord);
                }
            }
        }
        result
    }
}
