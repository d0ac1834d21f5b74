use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tilestream_common::{ConfigError, GridConfig, KeyCodec, WindowSize};
use tilestream_kernel::TileStore;

use crate::window::ViewWindow;

/// Grid parameters the loader re-reads every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub grid: GridConfig,
    pub window: WindowSize,
}

/// "New activity" signal raised by the loader and settled by the reconciler.
///
/// An epoch counter rather than a boolean: the reconciler remembers the epoch
/// it last found nothing to do at, so a raise that lands mid-scan is never lost.
#[derive(Debug, Default)]
pub struct ActivitySignal {
    epoch: AtomicU64,
}

impl ActivitySignal {
    pub fn raise(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// Monotonic counters for instrumentation.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub loader_cycles: AtomicU64,
    pub window_scans: AtomicU64,
    pub tiles_loaded: AtomicU64,
    pub load_failures: AtomicU64,
    pub evictions: AtomicU64,
}

impl StreamCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Everything the loader thread and the consumer share.
///
/// The tile flags in [`TileStore`] are the only coordination between the two
/// sides; the rest is configuration and instrumentation.
pub struct StreamContext {
    store: TileStore,
    codec: KeyCodec,
    settings: RwLock<StreamSettings>,
    activity: ActivitySignal,
    topology: AtomicU64,
    window: RwLock<Option<ViewWindow>>,
    counters: StreamCounters,
}

impl StreamContext {
    /// Validate the grid and build an empty context.
    pub fn new(grid: GridConfig, window: WindowSize) -> Result<Self, ConfigError> {
        let codec = grid.validate()?;
        let capacity = (window.get() * window.get()) as usize;
        Ok(Self {
            store: TileStore::with_capacity(capacity),
            codec,
            settings: RwLock::new(StreamSettings { grid, window }),
            activity: ActivitySignal::default(),
            topology: AtomicU64::new(0),
            window: RwLock::new(None),
            counters: StreamCounters::default(),
        })
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn codec(&self) -> KeyCodec {
        self.codec
    }

    pub fn settings(&self) -> StreamSettings {
        *self.settings.read()
    }

    pub(crate) fn update_settings(&self, edit: impl FnOnce(&mut StreamSettings)) {
        edit(&mut self.settings.write());
    }

    pub fn activity(&self) -> &ActivitySignal {
        &self.activity
    }

    pub fn counters(&self) -> &StreamCounters {
        &self.counters
    }

    /// Window computed by the most recent loader scan.
    pub fn window(&self) -> Option<ViewWindow> {
        *self.window.read()
    }

    pub(crate) fn set_window(&self, window: Option<ViewWindow>) {
        *self.window.write() = window;
    }

    /// Generation bumped on every attach/detach/free; neighbour caches keyed
    /// on an older generation are stale.
    pub fn topology_generation(&self) -> u64 {
        self.topology.load(Ordering::Acquire)
    }

    pub(crate) fn bump_topology(&self) {
        self.topology.fetch_add(1, Ordering::AcqRel);
    }
}
