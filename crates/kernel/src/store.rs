use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tilestream_common::GridKey;

use crate::tile::Tile;

/// Lifecycle state of an occupied grid key.
///
/// `Loading -> Resident -> PendingEviction -> PendingFree -> (removed)`.
/// A `Loading` tile may also be flagged for eviction before it was ever attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleFlag {
    /// Inserted by the loader, waiting to be attached.
    Loading,
    /// Attached and visible to collaborators.
    Resident,
    /// Outside the window, waiting to be detached.
    PendingEviction,
    /// Detached, waiting to be dropped from the store.
    PendingFree,
}

impl LifecycleFlag {
    /// Whether the loader may still flag this entry for eviction.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Loading | Self::Resident)
    }
}

/// Errors from tile store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("grid key {0} already present")]
    AlreadyPresent(GridKey),
    #[error("grid key {0} not present")]
    NotFound(GridKey),
}

struct Slot {
    tile: Arc<Tile>,
    flag: LifecycleFlag,
}

/// Per-flag entry counts at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagCounts {
    pub loading: usize,
    pub resident: usize,
    pub pending_eviction: usize,
    pub pending_free: usize,
}

impl FlagCounts {
    pub fn total(&self) -> usize {
        self.loading + self.resident + self.pending_eviction + self.pending_free
    }
}

/// Concurrent mapping from [`GridKey`] to a tile and its lifecycle flag.
///
/// Shared by the loader thread and the consumer. Every operation locks at most
/// the shard holding one key; scans copy a snapshot and never hold a lock over
/// the whole store, so they may be stale by the time the caller uses them.
#[derive(Default)]
pub struct TileStore {
    slots: DashMap<GridKey, Slot>,
}

impl TileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: DashMap::with_capacity(capacity),
        }
    }

    /// Insert a tile under a vacant key and return the shared handle.
    pub fn try_insert(
        &self,
        key: GridKey,
        tile: Tile,
        flag: LifecycleFlag,
    ) -> Result<Arc<Tile>, StoreError> {
        match self.slots.entry(key) {
            Entry::Occupied(_) => Err(StoreError::AlreadyPresent(key)),
            Entry::Vacant(vacant) => {
                let tile = Arc::new(tile);
                vacant.insert(Slot {
                    tile: Arc::clone(&tile),
                    flag,
                });
                tracing::trace!(%key, ?flag, "tile stored");
                Ok(tile)
            }
        }
    }

    pub fn get(&self, key: GridKey) -> Option<Arc<Tile>> {
        self.slots.get(&key).map(|slot| Arc::clone(&slot.tile))
    }

    /// Tile and flag read under the same shard lock.
    pub fn get_with_flag(&self, key: GridKey) -> Option<(Arc<Tile>, LifecycleFlag)> {
        self.slots
            .get(&key)
            .map(|slot| (Arc::clone(&slot.tile), slot.flag))
    }

    pub fn flag(&self, key: GridKey) -> Option<LifecycleFlag> {
        self.slots.get(&key).map(|slot| slot.flag)
    }

    pub fn contains(&self, key: GridKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Replace the flag, leaving the tile untouched. Returns the previous flag.
    pub fn set_flag(&self, key: GridKey, flag: LifecycleFlag) -> Result<LifecycleFlag, StoreError> {
        let mut slot = self.slots.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        Ok(std::mem::replace(&mut slot.flag, flag))
    }

    /// Set `new` only if the current flag is `expected`. Returns whether it changed.
    pub fn compare_and_set(
        &self,
        key: GridKey,
        expected: LifecycleFlag,
        new: LifecycleFlag,
    ) -> Result<bool, StoreError> {
        self.update_flag(key, |current| (current == expected).then_some(new))
            .map(|changed| changed.is_some())
    }

    /// Atomically compute a new flag from the current one.
    ///
    /// `decide` runs under the key's shard lock and must not touch the store.
    /// Returns the new flag when one was written.
    pub fn update_flag(
        &self,
        key: GridKey,
        decide: impl FnOnce(LifecycleFlag) -> Option<LifecycleFlag>,
    ) -> Result<Option<LifecycleFlag>, StoreError> {
        let mut slot = self.slots.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        let next = decide(slot.flag);
        if let Some(flag) = next {
            slot.flag = flag;
        }
        Ok(next)
    }

    /// Detach the entry. Idempotent: an absent key yields `None`.
    pub fn remove(&self, key: GridKey) -> Option<(Arc<Tile>, LifecycleFlag)> {
        let removed = self.slots.remove(&key).map(|(_, slot)| (slot.tile, slot.flag));
        if removed.is_some() {
            tracing::trace!(%key, "tile dropped from store");
        }
        removed
    }

    /// Detach the entry only while it carries `flag`.
    pub fn remove_if_flag(&self, key: GridKey, flag: LifecycleFlag) -> Option<Arc<Tile>> {
        self.slots
            .remove_if(&key, |_, slot| slot.flag == flag)
            .map(|(_, slot)| slot.tile)
    }

    /// Snapshot of all keys, ascending.
    pub fn keys(&self) -> Vec<GridKey> {
        let mut keys: Vec<GridKey> = self.slots.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        keys
    }

    /// Snapshot of keys carrying `flag`, ascending.
    pub fn keys_with_flag(&self, flag: LifecycleFlag) -> Vec<GridKey> {
        let mut keys: Vec<GridKey> = self
            .slots
            .iter()
            .filter(|e| e.value().flag == flag)
            .map(|e| *e.key())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Snapshot of every `(key, flag)` pair, ascending by key.
    pub fn snapshot(&self) -> Vec<(GridKey, LifecycleFlag)> {
        let mut entries: Vec<(GridKey, LifecycleFlag)> = self
            .slots
            .iter()
            .map(|e| (*e.key(), e.value().flag))
            .collect();
        entries.sort_unstable_by_key(|(key, _)| *key);
        entries
    }

    /// Live tiles carrying `flag`, ascending by key.
    pub fn tiles_with_flag(&self, flag: LifecycleFlag) -> Vec<Arc<Tile>> {
        let mut tiles: Vec<Arc<Tile>> = self
            .slots
            .iter()
            .filter(|e| e.value().flag == flag)
            .map(|e| Arc::clone(&e.value().tile))
            .collect();
        tiles.sort_unstable_by_key(|t| t.key());
        tiles
    }

    pub fn counts(&self) -> FlagCounts {
        let mut counts = FlagCounts::default();
        for entry in self.slots.iter() {
            match entry.value().flag {
                LifecycleFlag::Loading => counts.loading += 1,
                LifecycleFlag::Resident => counts.resident += 1,
                LifecycleFlag::PendingEviction => counts.pending_eviction += 1,
                LifecycleFlag::PendingFree => counts.pending_free += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
