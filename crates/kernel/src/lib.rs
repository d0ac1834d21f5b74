//! Tile kernel: authoritative tile state shared by the loader and the consumer.
//!
//! # Invariants
//! - At most one tile per grid key at any time.
//! - Single-key store operations are atomic; nothing locks the whole store.
//! - A tile's placement never changes after creation; only its surface does.

mod source;
mod store;
mod tile;

pub use source::{LoadError, TileSource};
pub use store::{FlagCounts, LifecycleFlag, StoreError, TileStore};
pub use tile::{PLACEHOLDER_MATERIAL, Tile, TileData, TileKind, TileSurface, placeholder_name, tile_name};
