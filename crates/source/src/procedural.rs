use std::collections::HashSet;

use tilestream_common::TileCoord;
use tilestream_kernel::{LoadError, TileData, TileSource};

/// Synthetic rolling terrain, continuous across tile seams.
///
/// Heights are a function of the global vertex position, so edge vertices
/// shared by two tiles always agree.
#[derive(Debug, Clone)]
pub struct ProceduralSource {
    tile_size: u32,
    amplitude: f32,
    wavelength: f32,
    seed: u32,
    missing: HashSet<TileCoord>,
}

impl ProceduralSource {
    pub fn new(tile_size: u32, seed: u32) -> Self {
        Self {
            tile_size,
            amplitude: 40.0,
            wavelength: 180.0,
            seed,
            missing: HashSet::new(),
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Report these tiles as missing, to exercise placeholder handling.
    pub fn with_missing(mut self, coords: impl IntoIterator<Item = TileCoord>) -> Self {
        self.missing.extend(coords);
        self
    }

    /// Height at global vertex `(gx, gz)`.
    pub fn height_at(&self, gx: i64, gz: i64) -> f32 {
        let phase = (self.seed % 997) as f32 * 0.173;
        let (x, z) = (gx as f32 / self.wavelength, gz as f32 / self.wavelength);
        let broad = (x + phase).sin() * (z * 0.7 - phase).cos();
        let detail = 0.25 * ((x * 3.1 + z * 2.3).sin() + (z * 4.7 - x * 1.9 + phase).cos());
        self.amplitude * (broad + detail)
    }

    pub fn generate(&self, coord: TileCoord) -> TileData {
        let side = self.tile_size as usize + 1;
        let base_x = i64::from(coord.x) * i64::from(self.tile_size);
        let base_z = i64::from(coord.z) * i64::from(self.tile_size);
        let mut heights = Vec::with_capacity(side * side);
        for j in 0..side as i64 {
            for i in 0..side as i64 {
                heights.push(self.height_at(base_x + i, base_z + j));
            }
        }
        TileData {
            heights,
            material: Some("terrain/procedural".to_string()),
        }
    }
}

impl TileSource for ProceduralSource {
    fn load(&mut self, coord: TileCoord) -> Result<TileData, LoadError> {
        if self.missing.contains(&coord) {
            return Err(LoadError::NotFound(coord));
        }
        Ok(self.generate(coord))
    }

    fn describe(&self) -> String {
        format!("procedural terrain (seed {})", self.seed)
    }
}
