//! Developer tooling: tile store inspector and streaming summaries.
//!
//! # Invariants
//! - Inspection is read-only; nothing here changes a flag or a tile.

mod inspector;

pub use inspector::{TileInfo, TilerInspector, TilerSummary};
