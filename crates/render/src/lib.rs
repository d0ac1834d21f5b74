//! Renderer-side collaborators for the tile streamer.
//!
//! # Invariants
//! - The scene only changes through reconciler callbacks.
//! - Rendering reads the scene and never touches the tile store.

mod renderer;
mod scene;

pub use renderer::{DebugTextRenderer, RenderView, Renderer};
pub use scene::{SceneNode, TileScene};
