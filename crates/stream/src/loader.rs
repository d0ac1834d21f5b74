use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tilestream_common::{GridConfig, GridKey, TileCoord};
use tilestream_kernel::{LifecycleFlag, StoreError, Tile, TileSource};

use crate::context::{StreamContext, StreamCounters};
use crate::viewpoint::Viewpoint;
use crate::window::ViewWindow;

/// Control messages for a running loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderSignal {
    /// Run the next cycle now instead of waiting out the poll interval.
    Wake,
    /// Exit at the next cycle boundary.
    Stop,
}

/// What one loader cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// The window changed (or this was the first cycle) and was rescanned.
    pub scanned: bool,
    /// Entries newly flagged `PendingEviction`.
    pub evicted: usize,
    /// Entries inserted as `Loading`, placeholders included.
    pub inserted: usize,
    /// Of those, how many are placeholders.
    pub placeholders: usize,
}

/// Background worker deciding which tiles should be resident.
///
/// Only ever inserts `Loading` entries and flags live entries for eviction;
/// it never attaches or detaches anything.
pub struct Loader {
    ctx: Arc<StreamContext>,
    source: Box<dyn TileSource>,
    viewpoint: Arc<dyn Viewpoint>,
    last_window: Option<ViewWindow>,
    last_grid: Option<GridConfig>,
    /// Desired keys that were still draining when last scanned.
    deferred: BTreeSet<GridKey>,
}

impl Loader {
    pub fn new(
        ctx: Arc<StreamContext>,
        source: Box<dyn TileSource>,
        viewpoint: Arc<dyn Viewpoint>,
    ) -> Self {
        Self {
            ctx,
            source,
            viewpoint,
            last_window: None,
            last_grid: None,
            deferred: BTreeSet::new(),
        }
    }

    /// Run one cycle: sample the viewpoint and rescan if the window moved or
    /// the grid was reconfigured.
    pub fn cycle(&mut self) -> CycleOutcome {
        StreamCounters::bump(&self.ctx.counters().loader_cycles, 1);
        let settings = self.ctx.settings();
        let window = ViewWindow::around(
            self.viewpoint.position(),
            settings.grid.tile_world_size(),
            settings.window,
        );

        let mut outcome = CycleOutcome::default();
        if self.last_window != Some(window) || self.last_grid != Some(settings.grid) {
            let _span = tracing::debug_span!("window_scan", center = %window.center).entered();
            self.last_window = Some(window);
            self.ctx.set_window(Some(window));
            StreamCounters::bump(&self.ctx.counters().window_scans, 1);

            outcome.scanned = true;
            if self.last_grid.is_some_and(|last| !same_geometry(&last, &settings.grid)) {
                // Resident tiles carry placements for the old geometry; reload all of them.
                tracing::debug!(
                    tile_size = settings.grid.tile_size,
                    tile_scale = settings.grid.tile_scale,
                    "tile geometry changed, evicting every live tile"
                );
                outcome.evicted = flag_live_for_eviction(&self.ctx, |_| true);
            }
            outcome.evicted += self.evict_outside(&window, &settings.grid);
            self.last_grid = Some(settings.grid);
            self.deferred.clear();
            for coord in window.desired(&settings.grid) {
                self.fill(coord, &settings.grid, &mut outcome);
            }
            tracing::debug!(
                evicted = outcome.evicted,
                inserted = outcome.inserted,
                placeholders = outcome.placeholders,
                "window scan complete"
            );
        } else if !self.deferred.is_empty() {
            self.retry_deferred(&window, &settings.grid, &mut outcome);
        }
        outcome
    }

    /// Flag every live entry for eviction. Run when the loader stops.
    pub fn finish(&mut self) -> usize {
        self.last_window = None;
        self.last_grid = None;
        self.deferred.clear();
        let flagged = flag_live_for_eviction(&self.ctx, |_| true);
        self.ctx.set_window(None);
        flagged
    }

    /// Loop until told to stop, then flag everything for eviction. Returns
    /// the loader so it can be restarted.
    pub fn run(mut self, control: Receiver<LoaderSignal>, poll_interval: Duration) -> Self {
        tracing::info!(source = %self.source.describe(), "tile loader started");
        loop {
            self.cycle();
            match control.recv_timeout(poll_interval) {
                Ok(LoaderSignal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(LoaderSignal::Wake) | Err(RecvTimeoutError::Timeout) => {
                    if control.try_iter().any(|signal| signal == LoaderSignal::Stop) {
                        break;
                    }
                }
            }
        }
        let flagged = self.finish();
        tracing::info!(flagged, "tile loader stopped");
        self
    }

    /// Track a different viewpoint from the next cycle on.
    pub fn set_viewpoint(&mut self, viewpoint: Arc<dyn Viewpoint>) {
        self.viewpoint = viewpoint;
    }

    pub fn into_source(self) -> Box<dyn TileSource> {
        self.source
    }

    fn evict_outside(&self, window: &ViewWindow, grid: &GridConfig) -> usize {
        let codec = self.ctx.codec();
        flag_live_for_eviction(&self.ctx, |key| {
            codec
                .decode(key)
                .map(|coord| !window.desires(coord, grid))
                .unwrap_or(true)
        })
    }

    fn fill(&mut self, coord: TileCoord, grid: &GridConfig, outcome: &mut CycleOutcome) {
        let key = match self.ctx.codec().encode_coord(coord) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(%coord, error = %err, "desired tile outside key range");
                return;
            }
        };
        match self.ctx.store().flag(key) {
            None => self.load_and_insert(coord, key, grid, outcome),
            Some(flag) if !flag.is_live() => {
                tracing::trace!(%coord, ?flag, "desired tile still draining, deferring");
                self.deferred.insert(key);
            }
            Some(_) => {}
        }
    }

    fn retry_deferred(&mut self, window: &ViewWindow, grid: &GridConfig, outcome: &mut CycleOutcome) {
        let codec = self.ctx.codec();
        let ready: Vec<GridKey> = self
            .deferred
            .iter()
            .copied()
            .filter(|key| !self.ctx.store().contains(*key))
            .collect();
        for key in ready {
            self.deferred.remove(&key);
            match codec.decode(key) {
                Ok(coord) if window.desires(coord, grid) => {
                    self.load_and_insert(coord, key, grid, outcome);
                }
                _ => {}
            }
        }
    }

    fn load_and_insert(
        &mut self,
        coord: TileCoord,
        key: GridKey,
        grid: &GridConfig,
        outcome: &mut CycleOutcome,
    ) {
        let tile = match self
            .source
            .load(coord)
            .and_then(|data| Tile::loaded(coord, key, data, grid.tile_size, grid.tile_scale))
        {
            Ok(tile) => tile,
            Err(err) => {
                tracing::warn!(%coord, error = %err, "tile load failed, substituting placeholder");
                StreamCounters::bump(&self.ctx.counters().load_failures, 1);
                outcome.placeholders += 1;
                Tile::placeholder(coord, key, grid.tile_size, grid.tile_scale)
            }
        };
        match self.ctx.store().try_insert(key, tile, LifecycleFlag::Loading) {
            Ok(_) => {
                StreamCounters::bump(&self.ctx.counters().tiles_loaded, 1);
                outcome.inserted += 1;
                self.ctx.activity().raise();
            }
            Err(StoreError::AlreadyPresent(_)) => {
                tracing::debug!(%coord, "tile appeared while loading, keeping existing entry");
            }
            Err(err) => tracing::warn!(%coord, error = %err, "tile insert failed"),
        }
    }
}

fn same_geometry(a: &GridConfig, b: &GridConfig) -> bool {
    a.tile_size == b.tile_size && a.tile_scale == b.tile_scale
}

/// Flag every live entry selected by `pick` as `PendingEviction`.
pub(crate) fn flag_live_for_eviction(ctx: &StreamContext, pick: impl Fn(GridKey) -> bool) -> usize {
    let mut flagged = 0;
    for key in ctx.store().keys() {
        if !pick(key) {
            continue;
        }
        let changed = ctx
            .store()
            .update_flag(key, |flag| flag.is_live().then_some(LifecycleFlag::PendingEviction));
        if let Ok(Some(_)) = changed {
            tracing::debug!(%key, "flagged for eviction");
            flagged += 1;
        }
    }
    if flagged > 0 {
        StreamCounters::bump(&ctx.counters().evictions, flagged as u64);
        ctx.activity().raise();
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use tilestream_common::{KeyCodec, TileCoord, WindowSize};
    use tilestream_kernel::{LoadError, TileData};

    use crate::viewpoint::TrackedViewpoint;

    fn context(window: WindowSize) -> Arc<StreamContext> {
        Arc::new(StreamContext::new(Default::default(), window).unwrap())
    }

    fn flat_source() -> Box<dyn TileSource> {
        Box::new(|_: TileCoord| -> Result<TileData, LoadError> { Ok(TileData::flat(256)) })
    }

    fn centre_of(x: i32, z: i32) -> Vec3 {
        Vec3::new(x as f32 * 256.0 + 128.0, 0.0, z as f32 * 256.0 + 128.0)
    }

    fn key(x: i32, z: i32) -> GridKey {
        KeyCodec::default().encode(x, z).unwrap()
    }

    #[test]
    fn first_cycle_at_origin_loads_clipped_corner() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(Vec3::ZERO));
        let mut loader = Loader::new(Arc::clone(&ctx), flat_source(), vp);

        let outcome = loader.cycle();
        assert!(outcome.scanned);
        assert_eq!(outcome.inserted, 4);

        let snapshot = ctx.store().snapshot();
        let expected: Vec<_> = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .into_iter()
            .map(|(x, z)| (key(x, z), LifecycleFlag::Loading))
            .collect();
        let mut expected = expected;
        expected.sort();
        assert_eq!(snapshot, expected);
        assert_eq!(ctx.activity().epoch(), 4);
    }

    #[test]
    fn unchanged_viewpoint_is_cheap_poll() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(centre_of(5, 5)));
        let mut loader = Loader::new(Arc::clone(&ctx), flat_source(), vp.clone());
        loader.cycle();
        vp.translate(Vec3::new(10.0, 50.0, -10.0));
        let outcome = loader.cycle();
        assert_eq!(outcome, CycleOutcome::default());
        assert_eq!(ctx.store().len(), 9);
    }

    #[test]
    fn moving_one_column_evicts_old_and_loads_new() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(centre_of(5, 5)));
        let mut loader = Loader::new(Arc::clone(&ctx), flat_source(), vp.clone());
        loader.cycle();
        for k in ctx.store().keys() {
            ctx.store().set_flag(k, LifecycleFlag::Resident).unwrap();
        }
        let kept: Vec<_> = (4..=6)
            .flat_map(|x| (4..=6).map(move |z| (x, z)))
            .map(|(x, z)| ctx.store().get(key(x, z)).unwrap())
            .collect();

        vp.set_position(centre_of(6, 5));
        let outcome = loader.cycle();
        assert_eq!(outcome.evicted, 3);
        assert_eq!(outcome.inserted, 3);

        for z in 4..=6 {
            assert_eq!(ctx.store().flag(key(3, z)), Some(LifecycleFlag::PendingEviction));
            assert_eq!(ctx.store().flag(key(7, z)), Some(LifecycleFlag::Loading));
            for x in 4..=6 {
                assert_eq!(ctx.store().flag(key(x, z)), Some(LifecycleFlag::Resident));
            }
        }
        for tile in kept {
            let current = ctx.store().get(tile.key()).unwrap();
            assert!(Arc::ptr_eq(&tile, &current));
        }
    }

    #[test]
    fn failed_loads_become_placeholders() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(centre_of(5, 5)));
        let source: Box<dyn TileSource> =
            Box::new(|coord: TileCoord| -> Result<TileData, LoadError> { Err(LoadError::NotFound(coord)) });
        let mut loader = Loader::new(Arc::clone(&ctx), source, vp);

        let outcome = loader.cycle();
        assert_eq!(outcome.inserted, 9);
        assert_eq!(outcome.placeholders, 9);
        for k in ctx.store().keys_with_flag(LifecycleFlag::Loading) {
            assert!(ctx.store().get(k).unwrap().is_placeholder());
        }
        assert_eq!(StreamCounters::read(&ctx.counters().load_failures), 9);
    }

    #[test]
    fn wrong_sized_data_becomes_placeholder() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(Vec3::ZERO));
        let source: Box<dyn TileSource> =
            Box::new(|_: TileCoord| -> Result<TileData, LoadError> { Ok(TileData::flat(512)) });
        let mut loader = Loader::new(Arc::clone(&ctx), source, vp);
        assert_eq!(loader.cycle().placeholders, 4);
    }

    #[test]
    fn window_size_change_triggers_rescan() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(centre_of(8, 8)));
        let mut loader = Loader::new(Arc::clone(&ctx), flat_source(), vp);
        loader.cycle();
        ctx.update_settings(|s| s.window = WindowSize::Five);
        let outcome = loader.cycle();
        assert!(outcome.scanned);
        assert_eq!(outcome.inserted, 16);
        assert_eq!(ctx.store().len(), 25);
    }

    #[test]
    fn draining_key_is_reloaded_once_freed() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(centre_of(5, 5)));
        let mut loader = Loader::new(Arc::clone(&ctx), flat_source(), vp.clone());
        loader.cycle();

        // Move away and straight back before the old column is drained.
        vp.set_position(centre_of(6, 5));
        loader.cycle();
        for z in 4..=6 {
            ctx.store().set_flag(key(3, z), LifecycleFlag::PendingFree).unwrap();
        }
        vp.set_position(centre_of(5, 5));
        loader.cycle();
        assert_eq!(ctx.store().flag(key(3, 5)), Some(LifecycleFlag::PendingFree));

        ctx.store().remove(key(3, 5));
        let outcome = loader.cycle();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(ctx.store().flag(key(3, 5)), Some(LifecycleFlag::Loading));
    }

    #[test]
    fn finish_flags_every_live_entry() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(centre_of(5, 5)));
        let mut loader = Loader::new(Arc::clone(&ctx), flat_source(), vp);
        loader.cycle();
        ctx.store().set_flag(key(5, 5), LifecycleFlag::Resident).unwrap();
        ctx.store().set_flag(key(4, 4), LifecycleFlag::PendingFree).unwrap();

        assert_eq!(loader.finish(), 8);
        assert_eq!(ctx.store().flag(key(4, 4)), Some(LifecycleFlag::PendingFree));
        assert_eq!(ctx.store().keys_with_flag(LifecycleFlag::PendingEviction).len(), 8);
        assert!(ctx.window().is_none());
    }

    #[test]
    fn run_stops_on_signal_and_returns_source() {
        let ctx = context(WindowSize::Three);
        let vp = Arc::new(TrackedViewpoint::new(centre_of(5, 5)));
        let loader = Loader::new(Arc::clone(&ctx), flat_source(), vp);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = std::thread::spawn(move || loader.run(rx, Duration::from_millis(1)));
        tx.send(LoaderSignal::Wake).unwrap();
        tx.send(LoaderSignal::Stop).unwrap();
        let mut source = handle.join().unwrap().into_source();
        assert!(source.load(TileCoord::new(0, 0)).is_ok());
        assert!(ctx.store().counts().loading == 0);
        assert_eq!(ctx.store().counts().pending_eviction, ctx.store().len());
    }
}
