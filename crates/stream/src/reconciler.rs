use std::collections::BTreeSet;
use std::sync::Arc;

use tilestream_common::GridKey;
use tilestream_kernel::{LifecycleFlag, Tile};

use crate::context::StreamContext;
use crate::observer::{Subscribers, TileEvent};

/// Scene-side collaborator driven by the reconciler on the consumer thread.
pub trait TileRenderer: Send {
    /// Make the tile visible.
    fn attach(&mut self, tile: &Arc<Tile>);
    /// Remove a previously attached tile.
    fn detach(&mut self, tile: &Arc<Tile>);
    /// The set of resident tiles changed; re-stitch this tile's seams.
    fn notify_neighbor_changed(&mut self, tile: &Arc<Tile>);
}

/// Renderer that does nothing, for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl TileRenderer for NullRenderer {
    fn attach(&mut self, _tile: &Arc<Tile>) {}
    fn detach(&mut self, _tile: &Arc<Tile>) {}
    fn notify_neighbor_changed(&mut self, _tile: &Arc<Tile>) {}
}

/// The single lifecycle step applied by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Loading -> Resident`.
    Attached(GridKey),
    /// `PendingEviction -> PendingFree`.
    Detached(GridKey),
    /// `PendingFree -> removed`.
    Freed(GridKey),
}

impl Transition {
    pub fn key(&self) -> GridKey {
        match *self {
            Self::Attached(k) | Self::Detached(k) | Self::Freed(k) => k,
        }
    }
}

/// Applies at most one lifecycle transition per tick.
///
/// Priority is attach, then detach, then free; within a class the lowest key
/// goes first.
pub struct Reconciler<R> {
    ctx: Arc<StreamContext>,
    renderer: R,
    subscribers: Subscribers,
    /// Keys whose tile was handed to the renderer and not yet detached.
    attached: BTreeSet<GridKey>,
    /// Activity epoch at which the last scan found nothing to do.
    settled_epoch: Option<u64>,
    transitions: u64,
}

impl<R: TileRenderer> Reconciler<R> {
    pub fn new(ctx: Arc<StreamContext>, renderer: R) -> Self {
        Self {
            ctx,
            renderer,
            subscribers: Subscribers::new(),
            attached: BTreeSet::new(),
            settled_epoch: None,
            transitions: 0,
        }
    }

    /// Run one reconciler step. No-op while quiescent.
    pub fn tick(&mut self) -> Option<Transition> {
        let epoch = self.ctx.activity().epoch();
        if self.settled_epoch == Some(epoch) {
            return None;
        }
        let _span = tracing::trace_span!("reconcile_tick", epoch).entered();
        match self.step() {
            Some(transition) => {
                self.transitions += 1;
                self.ctx.bump_topology();
                self.refresh_topology();
                Some(transition)
            }
            None => {
                tracing::trace!(epoch, "reconciler quiescent");
                self.settled_epoch = Some(epoch);
                None
            }
        }
    }

    /// Tick until quiescent or `max_ticks` is reached. Returns ticks that
    /// applied a transition.
    pub fn run_until_quiescent(&mut self, max_ticks: usize) -> usize {
        let mut applied = 0;
        for _ in 0..max_ticks {
            if self.tick().is_none() {
                break;
            }
            applied += 1;
        }
        applied
    }

    /// True when no activity has been raised since the last empty scan.
    pub fn is_quiescent(&self) -> bool {
        self.settled_epoch == Some(self.ctx.activity().epoch())
    }

    /// Tell the renderer every resident tile's adjacency may have changed.
    pub fn refresh_topology(&mut self) {
        for tile in self.ctx.store().tiles_with_flag(LifecycleFlag::Resident) {
            self.renderer.notify_neighbor_changed(&tile);
        }
    }

    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    /// Transitions applied since construction.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    fn step(&mut self) -> Option<Transition> {
        let snapshot = self.ctx.store().snapshot();
        let with = |flag: LifecycleFlag| -> Vec<GridKey> {
            snapshot
                .iter()
                .filter(|(_, f)| *f == flag)
                .map(|(k, _)| *k)
                .collect()
        };
        let (loading, evicting, freeing) = (
            with(LifecycleFlag::Loading),
            with(LifecycleFlag::PendingEviction),
            with(LifecycleFlag::PendingFree),
        );
        loading
            .into_iter()
            .find_map(|key| self.attach(key))
            .or_else(|| evicting.into_iter().find_map(|key| self.detach(key)))
            .or_else(|| freeing.into_iter().find_map(|key| self.free(key)))
    }

    fn attach(&mut self, key: GridKey) -> Option<Transition> {
        let store = self.ctx.store();
        let (tile, LifecycleFlag::Loading) = store.get_with_flag(key)? else {
            return None;
        };
        self.renderer.attach(&tile);
        self.attached.insert(key);
        self.subscribers.notify(TileEvent::Attached, &tile);
        match store.compare_and_set(key, LifecycleFlag::Loading, LifecycleFlag::Resident) {
            Ok(true) => tracing::debug!(tile = tile.name(), %key, "tile attached"),
            Ok(false) => {
                tracing::debug!(tile = tile.name(), %key, "tile evicted while attaching, detaching later");
            }
            Err(err) => tracing::warn!(%key, error = %err, "attached tile vanished from store"),
        }
        Some(Transition::Attached(key))
    }

    fn detach(&mut self, key: GridKey) -> Option<Transition> {
        let store = self.ctx.store();
        let (tile, LifecycleFlag::PendingEviction) = store.get_with_flag(key)? else {
            return None;
        };
        if self.attached.remove(&key) {
            self.renderer.detach(&tile);
            self.subscribers.notify(TileEvent::Detached, &tile);
        }
        match store.compare_and_set(key, LifecycleFlag::PendingEviction, LifecycleFlag::PendingFree) {
            Ok(true) => {
                tracing::debug!(tile = tile.name(), %key, "tile detached");
                Some(Transition::Detached(key))
            }
            Ok(false) | Err(_) => None,
        }
    }

    fn free(&mut self, key: GridKey) -> Option<Transition> {
        let tile = self.ctx.store().remove_if_flag(key, LifecycleFlag::PendingFree)?;
        self.attached.remove(&key);
        tracing::debug!(tile = tile.name(), %key, "tile freed");
        Some(Transition::Freed(key))
    }
}
