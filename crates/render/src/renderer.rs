use std::fmt::Write;

use glam::Vec3;
use tilestream_common::TileCoord;

use crate::scene::TileScene;

/// What part of the scene to draw.
#[derive(Debug, Clone, Copy)]
pub struct RenderView {
    /// Viewpoint in world space.
    pub eye: Vec3,
    /// World-space edge length of one tile.
    pub tile_world_size: f32,
    /// Tiles drawn on each side of the eye's tile.
    pub radius: i32,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            eye: Vec3::ZERO,
            tile_world_size: 256.0,
            radius: 5,
        }
    }
}

/// Renderer-agnostic interface over the attached-tile scene.
pub trait Renderer {
    type Output;

    fn render(&self, scene: &TileScene, view: &RenderView) -> Self::Output;
}

/// Draws the scene as an ASCII map around the eye.
///
/// `#` loaded tile, `?` placeholder, `.` nothing attached, `@` the eye's
/// tile when attached, `o` when not.
#[derive(Debug, Default)]
pub struct DebugTextRenderer;

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&self, scene: &TileScene, view: &RenderView) -> String {
        let center = TileCoord::from_world(view.eye, view.tile_world_size);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "=== Tiles (attached={}, eye=({:.1}, {:.1}, {:.1}) tile={}) ===",
            scene.len(),
            view.eye.x,
            view.eye.y,
            view.eye.z,
            center
        );
        for dz in -view.radius..=view.radius {
            for dx in -view.radius..=view.radius {
                let coord = TileCoord::new(
                    center.x.saturating_add(dx),
                    center.z.saturating_add(dz),
                );
                let node = scene.node(coord);
                let glyph = match (coord == center, node) {
                    (true, Some(_)) => '@',
                    (true, None) => 'o',
                    (false, Some(n)) if n.placeholder => '?',
                    (false, Some(_)) => '#',
                    (false, None) => '.',
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tilestream_common::KeyCodec;
    use tilestream_kernel::Tile;
    use tilestream_stream::TileRenderer;

    fn attach(scene: &mut TileScene, x: i32, z: i32) {
        let key = KeyCodec::default().encode(x, z).unwrap();
        scene.attach(&Arc::new(Tile::placeholder(TileCoord::new(x, z), key, 256, 1)));
    }

    #[test]
    fn empty_scene_draws_eye_marker() {
        let view = RenderView {
            radius: 1,
            ..RenderView::default()
        };
        let out = DebugTextRenderer::new().render(&TileScene::new(), &view);
        assert!(out.contains("attached=0"));
        assert!(out.ends_with("...\n.o.\n...\n"));
    }

    #[test]
    fn placeholders_and_eye_drawn() {
        let mut scene = TileScene::new();
        attach(&mut scene, 5, 5);
        attach(&mut scene, 6, 5);
        let view = RenderView {
            eye: Vec3::new(5.0 * 256.0 + 1.0, 0.0, 5.0 * 256.0 + 1.0),
            radius: 1,
            ..RenderView::default()
        };
        let out = DebugTextRenderer::new().render(&scene, &view);
        let rows: Vec<&str> = out.lines().skip(1).collect();
        assert_eq!(rows, vec!["...", ".@?", "..."]);
    }
}
