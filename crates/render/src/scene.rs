use std::collections::BTreeMap;
use std::sync::Arc;

use tilestream_common::{Direction, Placement, TileCoord};
use tilestream_kernel::Tile;
use tilestream_stream::TileRenderer;

/// One attached tile as the scene sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub coord: TileCoord,
    pub placement: Placement,
    pub placeholder: bool,
    /// Which of the four neighbours are attached, indexed by [`Direction::index`].
    pub stitched: [bool; 4],
    /// Seam refreshes received since attach.
    pub seam_updates: u32,
}

impl SceneNode {
    pub fn stitched_count(&self) -> usize {
        self.stitched.iter().filter(|s| **s).count()
    }
}

/// In-memory scene of attached tiles, driven by the reconciler.
#[derive(Debug, Default)]
pub struct TileScene {
    nodes: BTreeMap<TileCoord, SceneNode>,
    attaches: u64,
    detaches: u64,
}

impl TileScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, coord: TileCoord) -> Option<&SceneNode> {
        self.nodes.get(&coord)
    }

    /// Attached nodes in coordinate order.
    pub fn nodes(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn attaches(&self) -> u64 {
        self.attaches
    }

    pub fn detaches(&self) -> u64 {
        self.detaches
    }

    fn stitch(&self, coord: TileCoord) -> [bool; 4] {
        let mut links = [false; 4];
        for dir in Direction::ALL {
            links[dir.index()] = self.nodes.contains_key(&coord.step(dir));
        }
        links
    }
}

impl TileRenderer for TileScene {
    fn attach(&mut self, tile: &Arc<Tile>) {
        let coord = tile.coord();
        let node = SceneNode {
            name: tile.name().to_string(),
            coord,
            placement: tile.placement(),
            placeholder: tile.is_placeholder(),
            stitched: self.stitch(coord),
            seam_updates: 0,
        };
        if self.nodes.insert(coord, node).is_some() {
            tracing::warn!(tile = tile.name(), "tile attached twice");
        }
        self.attaches += 1;
    }

    fn detach(&mut self, tile: &Arc<Tile>) {
        if self.nodes.remove(&tile.coord()).is_none() {
            tracing::warn!(tile = tile.name(), "detach of tile not in scene");
        }
        self.detaches += 1;
    }

    fn notify_neighbor_changed(&mut self, tile: &Arc<Tile>) {
        let coord = tile.coord();
        let links = self.stitch(coord);
        if let Some(node) = self.nodes.get_mut(&coord) {
            node.stitched = links;
            node.seam_updates += 1;
        }
    }
}
