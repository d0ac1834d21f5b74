use std::collections::HashMap;
use std::sync::Arc;

use tilestream_common::{Direction, GridKey, TileCoord};
use tilestream_kernel::{LifecycleFlag, Tile};

use crate::context::StreamContext;

/// Adjacency lookups for seam stitching.
///
/// Only `Resident` neighbours are reported; a tile that is still loading or
/// already draining counts as absent.
#[derive(Clone, Copy)]
pub struct NeighborResolver<'a> {
    ctx: &'a StreamContext,
}

impl<'a> NeighborResolver<'a> {
    pub fn new(ctx: &'a StreamContext) -> Self {
        Self { ctx }
    }

    pub fn neighbor(&self, tile: &Tile, dir: Direction) -> Option<Arc<Tile>> {
        self.neighbor_of(tile.coord(), dir)
    }

    /// Resident tile adjacent to `coord`, bounds-checked against the grid.
    pub fn neighbor_of(&self, coord: TileCoord, dir: Direction) -> Option<Arc<Tile>> {
        let grid = self.ctx.settings().grid;
        let (dx, dz) = dir.offset();
        let x = i64::from(coord.x) + i64::from(dx);
        let z = i64::from(coord.z) + i64::from(dz);
        if x < 0 || z < 0 || x >= i64::from(grid.num_tiles_x) || z >= i64::from(grid.num_tiles_z) {
            return None;
        }
        let key = self.ctx.codec().encode(x as i32, z as i32).ok()?;
        match self.ctx.store().get_with_flag(key)? {
            (tile, LifecycleFlag::Resident) => Some(tile),
            _ => None,
        }
    }

    pub fn neighbors(&self, tile: &Tile) -> Neighbors {
        let mut links = Neighbors::default();
        for dir in Direction::ALL {
            links.slots[dir.index()] = self.neighbor(tile, dir);
        }
        links
    }
}

/// The four resident neighbours of one tile.
#[derive(Clone, Default)]
pub struct Neighbors {
    slots: [Option<Arc<Tile>>; 4],
}

impl Neighbors {
    pub fn get(&self, dir: Direction) -> Option<&Arc<Tile>> {
        self.slots[dir.index()].as_ref()
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn keys(&self) -> [Option<GridKey>; 4] {
        self.slots.each_ref().map(|s| s.as_ref().map(|t| t.key()))
    }
}

impl std::fmt::Debug for Neighbors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                Direction::ALL
                    .iter()
                    .map(|d| (d, self.get(*d).map(|t| t.name().to_string()))),
            )
            .finish()
    }
}

/// Caller-side cache of neighbour links, dropped wholesale whenever the
/// topology generation moves.
#[derive(Default)]
pub struct NeighborCache {
    generation: u64,
    links: HashMap<GridKey, Neighbors>,
}

impl NeighborCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn neighbors(&mut self, ctx: &StreamContext, tile: &Tile) -> Neighbors {
        let generation = ctx.topology_generation();
        if generation != self.generation {
            self.links.clear();
            self.generation = generation;
        }
        self.links
            .entry(tile.key())
            .or_insert_with(|| NeighborResolver::new(ctx).neighbors(tile))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
