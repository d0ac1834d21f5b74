//! Streaming: background tile loader, lifecycle reconciler, neighbour lookup,
//! tile events.
//!
//! # Invariants
//! - The loader only inserts `Loading` entries and flags live entries for
//!   eviction; it never attaches or detaches.
//! - The reconciler never decides which tiles are desired and applies at most
//!   one transition per tick.
//! - Store flags are the only coordination between the two sides.
//! - Renderer and observer callbacks run on the consumer thread only.

mod context;
mod loader;
mod neighbor;
mod observer;
mod reconciler;
mod tiler;
mod viewpoint;
mod window;

pub use context::{ActivitySignal, StreamContext, StreamCounters, StreamSettings};
pub use loader::{CycleOutcome, Loader, LoaderSignal};
pub use neighbor::{NeighborCache, NeighborResolver, Neighbors};
pub use observer::{ObserverError, Subscribers, TileEvent, TileObserver};
pub use reconciler::{NullRenderer, Reconciler, TileRenderer, Transition};
pub use tiler::{TerrainTiler, TilerConfig, TilerError, TilerStats};
pub use viewpoint::{TrackedViewpoint, Viewpoint};
pub use window::ViewWindow;
