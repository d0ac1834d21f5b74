use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use glam::{Vec2, Vec3};
use tilestream_common::{
    ConfigError, Direction, GridConfig, GridError, TileCoord, WindowSize, check_runtime_extent,
};
use tilestream_kernel::{FlagCounts, LifecycleFlag, Tile, TileSource};

use crate::context::{StreamContext, StreamCounters};
use crate::loader::{CycleOutcome, Loader, LoaderSignal};
use crate::neighbor::{NeighborResolver, Neighbors};
use crate::observer::TileObserver;
use crate::reconciler::{NullRenderer, Reconciler, TileRenderer, Transition};
use crate::viewpoint::Viewpoint;
use crate::window::ViewWindow;

/// Construction parameters for a [`TerrainTiler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilerConfig {
    pub grid: GridConfig,
    pub window_size: WindowSize,
    /// Refuse height and material edits.
    pub locked: bool,
    /// Tiles come from archives; the tiler stays locked.
    pub archived: bool,
    /// How long the loader waits between polls of the viewpoint.
    pub poll_interval: Duration,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            window_size: WindowSize::default(),
            locked: true,
            archived: false,
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TilerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    OutOfRange(#[from] GridError),
    #[error("terrain is locked against edits")]
    Locked,
    #[error("archived maps cannot be unlocked")]
    Archived,
    #[error("operation requires the loader to be stopped")]
    LoaderRunning,
    #[error("loader thread was lost")]
    LoaderLost,
    #[error("failed to spawn loader thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Point-in-time view of the tiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilerStats {
    pub counts: FlagCounts,
    pub placeholders: usize,
    pub loader_running: bool,
    pub loader_cycles: u64,
    pub window_scans: u64,
    pub tiles_loaded: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub transitions: u64,
    pub subscribers: usize,
    pub window: Option<ViewWindow>,
}

enum LoaderState {
    Idle(Loader),
    Running {
        handle: JoinHandle<Loader>,
        control: Sender<LoaderSignal>,
    },
    Lost,
}

/// Tiled terrain streamer: one background loader plus a reconciler ticked by
/// the host.
///
/// The loader starts stopped. Either call [`start`](Self::start) to run it on
/// its own thread, or drive it synchronously with
/// [`step_loader`](Self::step_loader).
pub struct TerrainTiler<R: TileRenderer = NullRenderer> {
    ctx: Arc<StreamContext>,
    viewpoint: Arc<dyn Viewpoint>,
    reconciler: Reconciler<R>,
    loader: LoaderState,
    locked: bool,
    archived: bool,
    poll_interval: Duration,
}

impl<R: TileRenderer> TerrainTiler<R> {
    /// Validate `config` and build a stopped tiler.
    pub fn new(
        config: TilerConfig,
        source: Box<dyn TileSource>,
        viewpoint: Arc<dyn Viewpoint>,
        renderer: R,
    ) -> Result<Self, TilerError> {
        let ctx = Arc::new(StreamContext::new(config.grid, config.window_size)?);
        tracing::info!(
            tiles_x = config.grid.num_tiles_x,
            tiles_z = config.grid.num_tiles_z,
            tile_size = config.grid.tile_size,
            tile_scale = config.grid.tile_scale,
            window = config.window_size.get(),
            source = %source.describe(),
            "terrain tiler created"
        );
        let loader = Loader::new(Arc::clone(&ctx), source, Arc::clone(&viewpoint));
        Ok(Self {
            reconciler: Reconciler::new(Arc::clone(&ctx), renderer),
            ctx,
            viewpoint,
            loader: LoaderState::Idle(loader),
            locked: config.locked || config.archived,
            archived: config.archived,
            poll_interval: config.poll_interval,
        })
    }

    // --- loader control -------------------------------------------------

    /// Spawn the loader thread. No-op if it is already running.
    pub fn start(&mut self) -> Result<(), TilerError> {
        let loader = match std::mem::replace(&mut self.loader, LoaderState::Lost) {
            LoaderState::Idle(loader) => loader,
            running @ LoaderState::Running { .. } => {
                self.loader = running;
                return Ok(());
            }
            LoaderState::Lost => return Err(TilerError::LoaderLost),
        };
        let (control, rx) = crossbeam_channel::unbounded();
        let poll = self.poll_interval;
        let handle = thread::Builder::new()
            .name("tile-loader".to_string())
            .spawn(move || loader.run(rx, poll))
            .map_err(TilerError::Spawn)?;
        self.loader = LoaderState::Running { handle, control };
        Ok(())
    }

    /// Signal the loader to stop and wait for it. It flags every live tile
    /// for eviction on the way out; tick the reconciler to drain them.
    pub fn stop(&mut self) -> Result<(), TilerError> {
        match std::mem::replace(&mut self.loader, LoaderState::Lost) {
            LoaderState::Idle(loader) => {
                self.loader = LoaderState::Idle(loader);
                Ok(())
            }
            LoaderState::Running { handle, control } => {
                // A send failure means the thread already exited; join reports how.
                let _ = control.send(LoaderSignal::Stop);
                match handle.join() {
                    Ok(loader) => {
                        self.loader = LoaderState::Idle(loader);
                        Ok(())
                    }
                    Err(_) => {
                        tracing::error!("tile loader thread panicked");
                        Err(TilerError::LoaderLost)
                    }
                }
            }
            LoaderState::Lost => Err(TilerError::LoaderLost),
        }
    }

    /// Stop the loader and tick the reconciler until the store is empty.
    ///
    /// Returns whether the store fully drained.
    pub fn shutdown(&mut self) -> Result<bool, TilerError> {
        self.stop()?;
        if let LoaderState::Idle(loader) = &mut self.loader {
            loader.finish();
        }
        while !self.ctx.store().is_empty() {
            if self.reconciler.tick().is_none() {
                break;
            }
        }
        let drained = self.is_drained();
        tracing::info!(drained, remaining = self.ctx.store().len(), "terrain tiler shut down");
        Ok(drained)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.loader, LoaderState::Running { .. })
    }

    /// Run one loader cycle on the calling thread.
    pub fn step_loader(&mut self) -> Result<CycleOutcome, TilerError> {
        match &mut self.loader {
            LoaderState::Idle(loader) => Ok(loader.cycle()),
            LoaderState::Running { .. } => Err(TilerError::LoaderRunning),
            LoaderState::Lost => Err(TilerError::LoaderLost),
        }
    }

    /// Ask a running loader to poll the viewpoint now.
    pub fn wake(&self) {
        if let LoaderState::Running { control, .. } = &self.loader {
            let _ = control.send(LoaderSignal::Wake);
        }
    }

    // --- consumer side --------------------------------------------------

    /// Apply at most one lifecycle transition. Call once per host update.
    pub fn reconcile_tick(&mut self) -> Option<Transition> {
        self.reconciler.tick()
    }

    pub fn is_quiescent(&self) -> bool {
        self.reconciler.is_quiescent()
    }

    /// True once every tile has been freed.
    pub fn is_drained(&self) -> bool {
        self.ctx.store().is_empty()
    }

    pub fn subscribe(&self, observer: Arc<dyn TileObserver>) -> bool {
        self.reconciler.subscribers().subscribe(observer)
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn TileObserver>) -> bool {
        self.reconciler.subscribers().unsubscribe(observer)
    }

    pub fn neighbor(&self, tile: &Tile, dir: Direction) -> Option<Arc<Tile>> {
        NeighborResolver::new(&self.ctx).neighbor(tile, dir)
    }

    pub fn neighbors(&self, tile: &Tile) -> Neighbors {
        NeighborResolver::new(&self.ctx).neighbors(tile)
    }

    pub fn renderer(&self) -> &R {
        self.reconciler.renderer()
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        self.reconciler.renderer_mut()
    }

    pub fn context(&self) -> &Arc<StreamContext> {
        &self.ctx
    }

    pub fn viewpoint(&self) -> &Arc<dyn Viewpoint> {
        &self.viewpoint
    }

    /// Stream around a different viewpoint. Only while the loader is stopped;
    /// the next loader cycle rescans around the new position.
    pub fn set_viewpoint(&mut self, viewpoint: Arc<dyn Viewpoint>) -> Result<(), TilerError> {
        match &mut self.loader {
            LoaderState::Idle(loader) => loader.set_viewpoint(Arc::clone(&viewpoint)),
            LoaderState::Running { .. } => return Err(TilerError::LoaderRunning),
            LoaderState::Lost => return Err(TilerError::LoaderLost),
        }
        self.viewpoint = viewpoint;
        Ok(())
    }

    // --- queries --------------------------------------------------------

    /// Resident tile at grid coordinate `coord`.
    pub fn tile(&self, coord: TileCoord) -> Result<Option<Arc<Tile>>, TilerError> {
        let key = self.ctx.codec().encode_coord(coord)?;
        Ok(match self.ctx.store().get_with_flag(key) {
            Some((tile, LifecycleFlag::Resident)) => Some(tile),
            _ => None,
        })
    }

    /// Resident tile under world position `pos`.
    pub fn tile_at(&self, pos: Vec3) -> Option<Arc<Tile>> {
        let coord = TileCoord::from_world(pos, self.ctx.settings().grid.tile_world_size());
        self.tile(coord).ok().flatten()
    }

    /// Resident tile under the viewpoint.
    pub fn center_tile(&self) -> Option<Arc<Tile>> {
        self.tile_at(self.viewpoint.position())
    }

    /// Interpolated terrain height at world `pos`.
    pub fn height(&self, pos: Vec3) -> Option<f32> {
        self.tile_at(pos)?.height(xz(pos))
    }

    /// Raw heightmap value at the vertex nearest world `pos`.
    pub fn heightmap_height(&self, pos: Vec3) -> Option<f32> {
        self.tile_at(pos)?.heightmap_height(xz(pos))
    }

    pub fn normal(&self, pos: Vec3) -> Option<Vec3> {
        self.tile_at(pos)?.normal(xz(pos))
    }

    pub fn heightmap_at(&self, pos: Vec3) -> Option<Vec<f32>> {
        self.tile_at(pos).map(|t| t.heightmap())
    }

    pub fn center_heightmap(&self) -> Option<Vec<f32>> {
        self.center_tile().map(|t| t.heightmap())
    }

    pub fn material_at(&self, pos: Vec3) -> Option<String> {
        self.tile_at(pos)?.material()
    }

    // --- edits ----------------------------------------------------------

    pub fn set_material(&self, pos: Vec3, material: Option<String>) -> Result<bool, TilerError> {
        self.ensure_unlocked()?;
        Ok(self
            .tile_at(pos)
            .map(|tile| tile.set_material(material))
            .is_some())
    }

    /// Set the height of the vertex nearest `pos`. Returns false when no
    /// resident tile covers it.
    pub fn set_height(&self, pos: Vec3, height: f32) -> Result<bool, TilerError> {
        self.ensure_unlocked()?;
        Ok(self
            .tile_at(pos)
            .is_some_and(|tile| tile.set_height(xz(pos), height)))
    }

    pub fn adjust_height(&self, pos: Vec3, delta: f32) -> Result<bool, TilerError> {
        self.ensure_unlocked()?;
        Ok(self
            .tile_at(pos)
            .is_some_and(|tile| tile.adjust_height(xz(pos), delta)))
    }

    /// Set many heights across every resident tile. Points on a shared edge
    /// update both tiles. Returns the number of vertices written.
    pub fn set_heights(&self, points: &[(Vec3, f32)]) -> Result<usize, TilerError> {
        self.edit_resident(points, |tile, at, value| tile.set_height(at, value))
    }

    pub fn adjust_heights(&self, points: &[(Vec3, f32)]) -> Result<usize, TilerError> {
        self.edit_resident(points, |tile, at, delta| tile.adjust_height(at, delta))
    }

    fn edit_resident(
        &self,
        points: &[(Vec3, f32)],
        edit: impl Fn(&Tile, Vec2, f32) -> bool,
    ) -> Result<usize, TilerError> {
        self.ensure_unlocked()?;
        let mut written = 0;
        for tile in self.ctx.store().tiles_with_flag(LifecycleFlag::Resident) {
            written += points
                .iter()
                .filter(|(pos, value)| edit(&tile, xz(*pos), *value))
                .count();
        }
        Ok(written)
    }

    fn ensure_unlocked(&self) -> Result<(), TilerError> {
        if self.locked {
            Err(TilerError::Locked)
        } else {
            Ok(())
        }
    }

    // --- settings -------------------------------------------------------

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn set_locked(&mut self, locked: bool) -> Result<(), TilerError> {
        if self.archived && !locked {
            return Err(TilerError::Archived);
        }
        self.locked = locked;
        Ok(())
    }

    pub fn grid(&self) -> GridConfig {
        self.ctx.settings().grid
    }

    pub fn window_size(&self) -> WindowSize {
        self.ctx.settings().window
    }

    /// Resize the window. Takes effect at the loader's next cycle.
    pub fn set_window_size(&self, size: WindowSize) {
        self.ctx.update_settings(|s| s.window = size);
        self.wake();
    }

    pub fn set_num_tiles_x(&mut self, value: u32) -> Result<(), TilerError> {
        self.set_extent("num_tiles_x", value, |grid, v| grid.num_tiles_x = v)
    }

    pub fn set_num_tiles_z(&mut self, value: u32) -> Result<(), TilerError> {
        self.set_extent("num_tiles_z", value, |grid, v| grid.num_tiles_z = v)
    }

    fn set_extent(
        &mut self,
        axis: &'static str,
        value: u32,
        apply: impl FnOnce(&mut GridConfig, u32),
    ) -> Result<(), TilerError> {
        self.ensure_stopped()?;
        check_runtime_extent(axis, value, self.ctx.codec().max_dim())?;
        self.ctx.update_settings(|s| apply(&mut s.grid, value));
        Ok(())
    }

    pub fn set_tile_scale(&mut self, scale: u32) -> Result<(), TilerError> {
        self.ensure_stopped()?;
        if scale == 0 {
            return Err(ConfigError::ZeroScale.into());
        }
        self.ctx.update_settings(|s| s.grid.tile_scale = scale);
        Ok(())
    }

    fn ensure_stopped(&self) -> Result<(), TilerError> {
        if self.is_running() {
            Err(TilerError::LoaderRunning)
        } else {
            Ok(())
        }
    }

    pub fn stats(&self) -> TilerStats {
        let counters = self.ctx.counters();
        let placeholders = self
            .ctx
            .store()
            .keys()
            .into_iter()
            .filter_map(|k| self.ctx.store().get(k))
            .filter(|t| t.is_placeholder())
            .count();
        TilerStats {
            counts: self.ctx.store().counts(),
            placeholders,
            loader_running: self.is_running(),
            loader_cycles: StreamCounters::read(&counters.loader_cycles),
            window_scans: StreamCounters::read(&counters.window_scans),
            tiles_loaded: StreamCounters::read(&counters.tiles_loaded),
            load_failures: StreamCounters::read(&counters.load_failures),
            evictions: StreamCounters::read(&counters.evictions),
            transitions: self.reconciler.transitions(),
            subscribers: self.reconciler.subscribers().len(),
            window: self.ctx.window(),
        }
    }
}

impl<R: TileRenderer> Drop for TerrainTiler<R> {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                tracing::warn!(error = %err, "loader did not stop cleanly");
            }
        }
    }
}

fn xz(pos: Vec3) -> Vec2 {
    Vec2::new(pos.x, pos.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use parking_lot::Mutex;
    use tilestream_kernel::{LoadError, TileData};

    use crate::observer::ObserverError;
    use crate::viewpoint::TrackedViewpoint;

    fn centre_of(x: i32, z: i32) -> Vec3 {
        Vec3::new(x as f32 * 256.0 + 128.0, 0.0, z as f32 * 256.0 + 128.0)
    }

    fn sloped() -> Box<dyn TileSource> {
        Box::new(|_: TileCoord| -> Result<TileData, LoadError> {
            let side = 257;
            let heights = (0..side * side).map(|i| (i % side) as f32).collect();
            Ok(TileData {
                heights,
                material: Some("grass".to_string()),
            })
        })
    }

    fn tiler(config: TilerConfig, at: Vec3) -> (TerrainTiler, Arc<TrackedViewpoint>) {
        let vp = Arc::new(TrackedViewpoint::new(at));
        let tiler = TerrainTiler::new(config, sloped(), vp.clone(), NullRenderer).unwrap();
        (tiler, vp)
    }

    fn settle(tiler: &mut TerrainTiler) {
        tiler.step_loader().unwrap();
        while tiler.reconcile_tick().is_some() {}
    }

    /// Tick until `done` holds or the deadline passes.
    fn tick_until(tiler: &mut TerrainTiler, done: impl Fn(&TerrainTiler) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            tiler.reconcile_tick();
            if done(tiler) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn invalid_config_fails_construction() {
        let config = TilerConfig {
            grid: GridConfig {
                tile_size: 300,
                ..GridConfig::default()
            },
            ..TilerConfig::default()
        };
        let vp = Arc::new(TrackedViewpoint::default());
        let result = TerrainTiler::new(config, sloped(), vp, NullRenderer);
        assert!(matches!(
            result,
            Err(TilerError::Config(ConfigError::UnsupportedTileSize(300)))
        ));
    }

    #[test]
    fn queries_read_resident_tiles() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(5, 5));
        settle(&mut tiler);
        let pos = Vec3::new(5.0 * 256.0 + 10.5, 0.0, 5.0 * 256.0 + 3.0);
        assert_eq!(tiler.height(pos), Some(10.5));
        assert_eq!(tiler.heightmap_height(pos), Some(11.0));
        assert_eq!(tiler.material_at(pos).as_deref(), Some("grass"));
        assert!(tiler.normal(pos).is_some_and(|n| n.y > 0.0 && n.x < 0.0));
        assert_eq!(tiler.center_heightmap().map(|h| h.len()), Some(257 * 257));
        assert!(tiler.height(centre_of(12, 12)).is_none());
    }

    #[test]
    fn edits_require_unlock() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(5, 5));
        settle(&mut tiler);
        let pos = centre_of(5, 5);
        assert!(matches!(tiler.set_height(pos, 3.0), Err(TilerError::Locked)));

        tiler.set_locked(false).unwrap();
        assert!(tiler.set_height(pos, 3.0).unwrap());
        assert!(tiler.adjust_height(pos, 1.5).unwrap());
        assert_eq!(tiler.heightmap_height(pos), Some(4.5));
        assert!(!tiler.set_height(centre_of(12, 12), 1.0).unwrap());
    }

    #[test]
    fn batched_edit_updates_shared_edge_on_both_tiles() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(5, 5));
        settle(&mut tiler);
        tiler.set_locked(false).unwrap();
        let edge = Vec3::new(6.0 * 256.0, 0.0, 5.0 * 256.0 + 100.0);
        let written = tiler.set_heights(&[(edge, 42.0), (centre_of(14, 14), 1.0)]).unwrap();
        assert_eq!(written, 2);
        let west = tiler.tile(TileCoord::new(5, 5)).unwrap().unwrap();
        let east = tiler.tile(TileCoord::new(6, 5)).unwrap().unwrap();
        assert_eq!(west.heightmap_height(xz(edge)), Some(42.0));
        assert_eq!(east.heightmap_height(xz(edge)), Some(42.0));
    }

    #[test]
    fn archived_tiler_stays_locked() {
        let config = TilerConfig {
            locked: false,
            archived: true,
            ..TilerConfig::default()
        };
        let (mut tiler, _) = tiler(config, Vec3::ZERO);
        assert!(tiler.is_locked());
        assert!(matches!(tiler.set_locked(false), Err(TilerError::Archived)));
    }

    #[test]
    fn extent_setters_validate_and_require_stopped_loader() {
        let (mut tiler, _) = tiler(TilerConfig::default(), Vec3::ZERO);
        assert!(tiler.set_num_tiles_x(12).is_err());
        assert!(tiler.set_num_tiles_x(4).is_err());
        tiler.set_num_tiles_x(8).unwrap();
        tiler.set_num_tiles_z(32).unwrap();
        assert_eq!(tiler.grid().num_tiles_x, 8);
        assert_eq!(tiler.grid().num_tiles_z, 32);
        assert!(tiler.set_tile_scale(0).is_err());

        tiler.start().unwrap();
        assert!(matches!(tiler.set_tile_scale(2), Err(TilerError::LoaderRunning)));
        assert!(matches!(tiler.step_loader(), Err(TilerError::LoaderRunning)));
        tiler.stop().unwrap();
        tiler.set_tile_scale(2).unwrap();
    }

    #[test]
    fn shrinking_extent_evicts_tiles_past_new_edge() {
        let (mut tiler, vp) = tiler(TilerConfig::default(), centre_of(8, 8));
        settle(&mut tiler);
        tiler.set_num_tiles_x(8).unwrap();
        vp.set_position(centre_of(7, 8));
        settle(&mut tiler);
        let counts = tiler.stats().counts;
        assert_eq!(counts.resident, 6);
        assert_eq!(counts.total(), 6);
    }

    #[test]
    fn shrinking_extent_in_place_triggers_rescan() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(8, 8));
        settle(&mut tiler);
        tiler.set_num_tiles_x(8).unwrap();
        settle(&mut tiler);
        let counts = tiler.stats().counts;
        assert_eq!(counts.resident, 3);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn tile_scale_change_reloads_tiles_at_new_scale() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(2, 2));
        settle(&mut tiler);
        let pos = Vec3::new(700.0, 0.0, 700.0);
        assert!(tiler.height(pos).is_some());

        tiler.set_tile_scale(2).unwrap();
        let outcome = tiler.step_loader().unwrap();
        assert_eq!(outcome.evicted, 9);
        while tiler.reconcile_tick().is_some() {}
        // Keys still desired at the new scale come back once their old entry is freed.
        settle(&mut tiler);

        let counts = tiler.stats().counts;
        assert_eq!(counts.resident, 9);
        assert_eq!(counts.total(), 9);
        let tile = tiler.tile(TileCoord::new(1, 1)).unwrap().unwrap();
        assert_eq!(tile.placement().scale, Vec3::new(2.0, 1.0, 2.0));
        assert_eq!(tile.world_size(), 512.0);
        assert_eq!(tiler.tile_at(pos).map(|t| t.coord()), Some(TileCoord::new(1, 1)));
        assert!(tiler.height(pos).is_some());
    }

    #[test]
    fn viewpoint_can_be_replaced_while_stopped() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(2, 2));
        settle(&mut tiler);

        let next = Arc::new(TrackedViewpoint::new(centre_of(10, 10)));
        tiler.set_viewpoint(next.clone()).unwrap();
        settle(&mut tiler);
        assert_eq!(tiler.center_tile().map(|t| t.coord()), Some(TileCoord::new(10, 10)));
        assert_eq!(tiler.stats().counts.total(), 9);
        assert!(tiler.tile(TileCoord::new(2, 2)).unwrap().is_none());

        tiler.start().unwrap();
        assert!(matches!(
            tiler.set_viewpoint(Arc::new(TrackedViewpoint::new(Vec3::ZERO))),
            Err(TilerError::LoaderRunning)
        ));
        tiler.stop().unwrap();
    }

    #[test]
    fn window_resize_grows_resident_set() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(8, 8));
        settle(&mut tiler);
        tiler.set_window_size(WindowSize::Seven);
        settle(&mut tiler);
        assert_eq!(tiler.stats().counts.resident, 49);
    }

    #[derive(Default)]
    struct Counting {
        attached: Mutex<usize>,
        detached: Mutex<usize>,
    }

    impl TileObserver for Counting {
        fn on_attached(&self, _c: Vec3, _t: &Tile) -> Result<(), ObserverError> {
            *self.attached.lock() += 1;
            Ok(())
        }
        fn on_detached(&self, _c: Vec3, _t: &Tile) -> Result<(), ObserverError> {
            *self.detached.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn threaded_loader_streams_and_drains() {
        let (mut tiler, vp) = tiler(TilerConfig::default(), centre_of(5, 5));
        let observer = Arc::new(Counting::default());
        assert!(tiler.subscribe(observer.clone()));
        tiler.start().unwrap();
        assert!(tiler.is_running());

        assert!(tick_until(&mut tiler, |t| t.stats().counts.resident == 9));
        vp.set_position(centre_of(6, 5));
        tiler.wake();
        assert!(tick_until(&mut tiler, |t| {
            let c = t.stats().counts;
            c.resident == 9 && c.total() == 9 && t.tile(TileCoord::new(7, 5)).ok().flatten().is_some()
        }));
        assert_eq!(*observer.attached.lock(), 12);
        assert_eq!(*observer.detached.lock(), 3);

        assert!(tiler.shutdown().unwrap());
        assert!(tiler.is_drained());
        assert!(!tiler.is_running());
        assert_eq!(*observer.detached.lock(), 12);
    }

    #[test]
    fn loader_can_restart_after_stop() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(3, 3));
        tiler.start().unwrap();
        assert!(tick_until(&mut tiler, |t| t.stats().counts.resident == 9));
        tiler.stop().unwrap();
        assert!(tick_until(&mut tiler, |t| t.is_drained()));
        tiler.start().unwrap();
        assert!(tick_until(&mut tiler, |t| t.stats().counts.resident == 9));
    }

    #[test]
    fn failing_source_still_attaches_placeholders() {
        let vp = Arc::new(TrackedViewpoint::new(Vec3::ZERO));
        let source: Box<dyn TileSource> =
            Box::new(|c: TileCoord| -> Result<TileData, LoadError> { Err(LoadError::NotFound(c)) });
        let mut tiler = TerrainTiler::new(TilerConfig::default(), source, vp, NullRenderer).unwrap();
        settle(&mut tiler);
        let stats = tiler.stats();
        assert_eq!(stats.counts.resident, 4);
        assert_eq!(stats.placeholders, 4);
        assert_eq!(stats.load_failures, 4);
    }

    #[test]
    fn dropping_running_tiler_stops_loader() {
        let (mut tiler, _) = tiler(TilerConfig::default(), centre_of(5, 5));
        tiler.start().unwrap();
        let ctx = Arc::clone(tiler.context());
        drop(tiler);
        assert_eq!(ctx.store().counts().resident, 0);
        assert_eq!(ctx.store().counts().loading, 0);
    }
}
