use glam::Vec3;
use tilestream_common::{GridKey, TileCoord};
use tilestream_kernel::{FlagCounts, LifecycleFlag};
use tilestream_stream::{NeighborResolver, StreamContext, TerrainTiler, TileRenderer, ViewWindow};

/// Read-only queries against a running tiler for debugging and CLI output.
pub struct TilerInspector;

impl TilerInspector {
    pub fn summary<R: TileRenderer>(tiler: &TerrainTiler<R>) -> TilerSummary {
        let stats = tiler.stats();
        TilerSummary {
            counts: stats.counts,
            placeholders: stats.placeholders,
            window: stats.window,
            loader_running: stats.loader_running,
            loader_cycles: stats.loader_cycles,
            load_failures: stats.load_failures,
            transitions: stats.transitions,
            quiescent: tiler.is_quiescent(),
        }
    }

    /// Everything known about the tile at `coord`, whatever its flag.
    pub fn inspect_tile(ctx: &StreamContext, coord: TileCoord) -> Option<TileInfo> {
        let key = ctx.codec().encode_coord(coord).ok()?;
        let (tile, flag) = ctx.store().get_with_flag(key)?;
        let (min_height, max_height) = {
            let surface = tile.surface();
            surface
                .heights()
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| (lo.min(*h), hi.max(*h)))
        };
        let resident_neighbors = NeighborResolver::new(ctx).neighbors(&tile).count();
        Some(TileInfo {
            coord,
            key,
            name: tile.name().to_string(),
            flag,
            placeholder: tile.is_placeholder(),
            center: tile.placement().translation,
            min_height,
            max_height,
            material: tile.material(),
            resident_neighbors,
        })
    }

    /// Every occupied key with its flag, ascending.
    pub fn list_tiles(ctx: &StreamContext) -> Vec<(GridKey, LifecycleFlag)> {
        ctx.store().snapshot()
    }

    /// One character per tile in `window`: `L` loading, `R` resident,
    /// `E` pending eviction, `F` pending free, `.` empty, space off-grid.
    pub fn flag_map(ctx: &StreamContext, window: &ViewWindow) -> String {
        let grid = ctx.settings().grid;
        let half = window.size.half();
        let mut out = String::new();
        for dz in -half..=half {
            for dx in -half..=half {
                let coord = TileCoord::new(
                    window.center.x.saturating_add(dx),
                    window.center.z.saturating_add(dz),
                );
                let glyph = if !grid.contains(coord) {
                    ' '
                } else {
                    ctx.codec()
                        .encode_coord(coord)
                        .ok()
                        .and_then(|key| ctx.store().flag(key))
                        .map_or('.', flag_glyph)
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}

fn flag_glyph(flag: LifecycleFlag) -> char {
    match flag {
        LifecycleFlag::Loading => 'L',
        LifecycleFlag::Resident => 'R',
        LifecycleFlag::PendingEviction => 'E',
        LifecycleFlag::PendingFree => 'F',
    }
}

#[derive(Debug, Clone)]
pub struct TilerSummary {
    pub counts: FlagCounts,
    pub placeholders: usize,
    pub window: Option<ViewWindow>,
    pub loader_running: bool,
    pub loader_cycles: u64,
    pub load_failures: u64,
    pub transitions: u64,
    pub quiescent: bool,
}

impl std::fmt::Display for TilerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.counts;
        write!(
            f,
            "Tiles: loading={} resident={} evicting={} freeing={} placeholders={} | transitions={} load_failures={}",
            c.loading, c.resident, c.pending_eviction, c.pending_free, self.placeholders,
            self.transitions, self.load_failures
        )?;
        if let Some(w) = self.window {
            write!(f, " | window {}x{} at {}", w.size.get(), w.size.get(), w.center)?;
        }
        if self.quiescent {
            write!(f, " | quiescent")?;
        }
        Ok(())
    }
}

/// Detailed info about one stored tile.
#[derive(Debug, Clone)]
pub struct TileInfo {
    pub coord: TileCoord,
    pub key: GridKey,
    pub name: String,
    pub flag: LifecycleFlag,
    pub placeholder: bool,
    pub center: Vec3,
    pub min_height: f32,
    pub max_height: f32,
    pub material: Option<String>,
    pub resident_neighbors: usize,
}

impl std::fmt::Display for TileInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} key={} flag={:?} center=({:.1}, {:.1}) height=[{:.2}, {:.2}] material={} neighbors={}",
            self.name,
            self.coord,
            self.key,
            self.flag,
            self.center.x,
            self.center.z,
            self.min_height,
            self.max_height,
            self.material.as_deref().unwrap_or("-"),
            self.resident_neighbors,
        )
    }
}
