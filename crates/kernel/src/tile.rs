use glam::{Vec2, Vec3};
use parking_lot::RwLock;
use tilestream_common::{GridKey, Placement, TileCoord, tile_world_size};

use crate::source::LoadError;

/// Material assigned to placeholder tiles so holes stay visible.
pub const PLACEHOLDER_MATERIAL: &str = "placeholder/wireframe";

/// Raw tile content as produced by a [`crate::TileSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    /// Row-major heights, `(tile_size + 1)^2` of them, row = z.
    pub heights: Vec<f32>,
    pub material: Option<String>,
}

impl TileData {
    /// A flat tile of the given size.
    pub fn flat(tile_size: u32) -> Self {
        let side = tile_size as usize + 1;
        Self {
            heights: vec![0.0; side * side],
            material: None,
        }
    }
}

/// Whether a tile holds real data or stands in for a failed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileKind {
    Loaded,
    Placeholder,
}

/// Mutable part of a tile: heights and material.
pub struct TileSurface {
    side: usize,
    heights: Vec<f32>,
    material: Option<String>,
}

impl TileSurface {
    /// Vertices along one edge.
    pub fn side(&self) -> usize {
        self.side
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn material(&self) -> Option<&str> {
        self.material.as_deref()
    }

    /// Height of vertex `(i, j)`, clamped to the tile edge.
    pub fn vertex(&self, i: usize, j: usize) -> f32 {
        let last = self.side - 1;
        self.heights[j.min(last) * self.side + i.min(last)]
    }

    fn vertex_mut(&mut self, i: usize, j: usize) -> &mut f32 {
        &mut self.heights[j * self.side + i]
    }
}

impl std::fmt::Debug for TileSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSurface")
            .field("side", &self.side)
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

/// One square patch of terrain.
///
/// Position and size are fixed at creation; only the surface is mutable.
pub struct Tile {
    coord: TileCoord,
    key: GridKey,
    name: String,
    kind: TileKind,
    placement: Placement,
    tile_size: u32,
    tile_scale: u32,
    surface: RwLock<TileSurface>,
}

impl Tile {
    /// Build a tile from loaded data, checking its size against the grid.
    pub fn loaded(
        coord: TileCoord,
        key: GridKey,
        data: TileData,
        tile_size: u32,
        tile_scale: u32,
    ) -> Result<Self, LoadError> {
        let side = tile_size as usize + 1;
        if data.heights.len() != side * side {
            return Err(LoadError::SizeMismatch {
                expected: side * side,
                actual: data.heights.len(),
            });
        }
        Ok(Self::build(
            coord,
            key,
            TileKind::Loaded,
            tile_name(coord),
            data,
            tile_size,
            tile_scale,
        ))
    }

    /// A flat stand-in for a tile that failed to load.
    pub fn placeholder(coord: TileCoord, key: GridKey, tile_size: u32, tile_scale: u32) -> Self {
        let data = TileData {
            material: Some(PLACEHOLDER_MATERIAL.to_string()),
            ..TileData::flat(tile_size)
        };
        Self::build(
            coord,
            key,
            TileKind::Placeholder,
            placeholder_name(coord),
            data,
            tile_size,
            tile_scale,
        )
    }

    fn build(
        coord: TileCoord,
        key: GridKey,
        kind: TileKind,
        name: String,
        data: TileData,
        tile_size: u32,
        tile_scale: u32,
    ) -> Self {
        Self {
            coord,
            key,
            name,
            kind,
            placement: Placement::for_tile(coord, tile_size, tile_scale),
            tile_size,
            tile_scale,
            surface: RwLock::new(TileSurface {
                side: tile_size as usize + 1,
                heights: data.heights,
                material: data.material,
            }),
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn key(&self) -> GridKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TileKind {
        self.kind
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == TileKind::Placeholder
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// World-space edge length.
    pub fn world_size(&self) -> f32 {
        tile_world_size(self.tile_size, self.tile_scale)
    }

    /// Read access to the surface data.
    pub fn surface(&self) -> parking_lot::RwLockReadGuard<'_, TileSurface> {
        self.surface.read()
    }

    /// Copy of the full heightmap.
    pub fn heightmap(&self) -> Vec<f32> {
        self.surface.read().heights.clone()
    }

    pub fn material(&self) -> Option<String> {
        self.surface.read().material.clone()
    }

    pub fn set_material(&self, material: Option<String>) {
        self.surface.write().material = material;
    }

    /// World `(x, z)` to fractional vertex coordinates, `None` outside this tile.
    fn to_local(&self, xz: Vec2) -> Option<Vec2> {
        let local = (xz - self.placement.corner(self.world_size())) / self.tile_scale as f32;
        let max = self.tile_size as f32;
        (local.x >= 0.0 && local.y >= 0.0 && local.x <= max && local.y <= max).then_some(local)
    }

    fn nearest_vertex(&self, xz: Vec2) -> Option<(usize, usize)> {
        self.to_local(xz)
            .map(|l| (l.x.round() as usize, l.y.round() as usize))
    }

    /// Bilinearly interpolated height at a world point.
    pub fn height(&self, xz: Vec2) -> Option<f32> {
        let local = self.to_local(xz)?;
        let surface = self.surface.read();
        let i = (local.x.floor() as usize).min(surface.side - 2);
        let j = (local.y.floor() as usize).min(surface.side - 2);
        let fx = local.x - i as f32;
        let fz = local.y - j as f32;
        let top = lerp(surface.vertex(i, j), surface.vertex(i + 1, j), fx);
        let bottom = lerp(surface.vertex(i, j + 1), surface.vertex(i + 1, j + 1), fx);
        Some(lerp(top, bottom, fz))
    }

    /// Unscaled heightmap value at the vertex nearest a world point.
    pub fn heightmap_height(&self, xz: Vec2) -> Option<f32> {
        let (i, j) = self.nearest_vertex(xz)?;
        Some(self.surface.read().vertex(i, j))
    }

    /// Surface normal at the vertex nearest a world point (central differences).
    pub fn normal(&self, xz: Vec2) -> Option<Vec3> {
        let (i, j) = self.nearest_vertex(xz)?;
        let surface = self.surface.read();
        let spacing = self.tile_scale as f32;
        let dx = surface.vertex(i + 1, j) - surface.vertex(i.saturating_sub(1), j);
        let dz = surface.vertex(i, j + 1) - surface.vertex(i, j.saturating_sub(1));
        Some(Vec3::new(-dx, 2.0 * spacing, -dz).normalize())
    }

    /// Set the vertex nearest `xz`. Returns false when the point is outside the tile.
    pub fn set_height(&self, xz: Vec2, height: f32) -> bool {
        self.edit_vertex(xz, |h| *h = height)
    }

    /// Raise or lower the vertex nearest `xz`.
    pub fn adjust_height(&self, xz: Vec2, delta: f32) -> bool {
        self.edit_vertex(xz, |h| *h += delta)
    }

    fn edit_vertex(&self, xz: Vec2, edit: impl FnOnce(&mut f32)) -> bool {
        let Some((i, j)) = self.nearest_vertex(xz) else {
            return false;
        };
        edit(self.surface.write().vertex_mut(i, j));
        true
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("name", &self.name)
            .field("coord", &self.coord)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Name of a loaded tile, matching its file stem.
pub fn tile_name(coord: TileCoord) -> String {
    format!("TILE-{:02}{:02}", coord.x % 64, coord.z % 64)
}

/// Name of a placeholder tile: `OOB` + block and offset of each axis.
pub fn placeholder_name(coord: TileCoord) -> String {
    format!(
        "OOB{:02}{:02}{:02}{:02}",
        coord.x / 64,
        coord.x % 64,
        coord.z / 64,
        coord.z % 64
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_tile(coord: TileCoord, scale: u32) -> Tile {
        // Height rises by 1 per vertex along x.
        let side = 257;
        let heights = (0..side * side).map(|n| (n % side) as f32).collect();
        let data = TileData {
            heights,
            material: Some("grass".into()),
        };
        Tile::loaded(coord, GridKey(0), data, 256, scale).unwrap()
    }

    #[test]
    fn loaded_tile_rejects_wrong_size() {
        let data = TileData::flat(128);
        let err = Tile::loaded(TileCoord::new(0, 0), GridKey(0), data, 256, 1).unwrap_err();
        assert!(matches!(err, LoadError::SizeMismatch { expected: 66049, .. }));
    }

    #[test]
    fn placeholder_is_distinguishable() {
        let tile = Tile::placeholder(TileCoord::new(65, 3), GridKey(1), 256, 1);
        assert!(tile.is_placeholder());
        assert_eq!(tile.name(), "OOB01010003");
        assert_eq!(tile.material().as_deref(), Some(PLACEHOLDER_MATERIAL));
        assert_eq!(tile.height(Vec2::new(65.0 * 256.0 + 10.0, 3.0 * 256.0)), Some(0.0));
    }

    #[test]
    fn loaded_tile_named_after_file() {
        let tile = ramp_tile(TileCoord::new(3, 70), 1);
        assert_eq!(tile.name(), "TILE-0306");
        assert!(!tile.is_placeholder());
    }

    #[test]
    fn interpolates_between_vertices() {
        let tile = ramp_tile(TileCoord::new(1, 0), 2);
        // Tile (1, 0) with scale 2 starts at world x = 512.
        let h = tile.height(Vec2::new(512.0 + 3.0, 10.0)).unwrap();
        assert!((h - 1.5).abs() < 1e-5);
        assert_eq!(tile.heightmap_height(Vec2::new(512.0 + 3.9, 10.0)), Some(2.0));
        assert!(tile.height(Vec2::new(100.0, 10.0)).is_none());
    }

    #[test]
    fn normal_tilts_against_slope() {
        let tile = ramp_tile(TileCoord::new(0, 0), 1);
        let n = tile.normal(Vec2::new(100.0, 100.0)).unwrap();
        assert!(n.x < 0.0);
        assert!(n.y > 0.0);
        assert!(n.z.abs() < 1e-6);
        assert!((n.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn edits_touch_nearest_vertex_only() {
        let tile = Tile::placeholder(TileCoord::new(0, 0), GridKey(0), 256, 1);
        assert!(tile.set_height(Vec2::new(10.2, 20.0), 5.0));
        assert!(tile.adjust_height(Vec2::new(10.0, 20.0), -1.5));
        assert_eq!(tile.surface().vertex(10, 20), 3.5);
        assert_eq!(tile.surface().vertex(11, 20), 0.0);
        assert!(!tile.set_height(Vec2::new(-5.0, 0.0), 1.0));
    }

    #[test]
    fn material_can_be_replaced() {
        let tile = ramp_tile(TileCoord::new(0, 0), 1);
        tile.set_material(Some("rock".into()));
        assert_eq!(tile.material().as_deref(), Some("rock"));
    }
}
