use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;
use tilestream_kernel::Tile;

/// Failure reported by an observer callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("observer failed: {0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Receives tile lifecycle events on the consumer thread.
///
/// `center` is the world-space centre of the tile's footprint.
pub trait TileObserver: Send + Sync {
    fn on_attached(&self, center: Vec3, tile: &Tile) -> Result<(), ObserverError>;
    fn on_detached(&self, center: Vec3, tile: &Tile) -> Result<(), ObserverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEvent {
    Attached,
    Detached,
}

/// Observer set keyed by handle identity.
#[derive(Default)]
pub struct Subscribers {
    observers: RwLock<Vec<Arc<dyn TileObserver>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Returns `false` if this handle is already subscribed.
    pub fn subscribe(&self, observer: Arc<dyn TileObserver>) -> bool {
        let mut observers = self.observers.write();
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    /// Remove an observer. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, observer: &Arc<dyn TileObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver `event` to every observer. Returns how many failed.
    ///
    /// Works on a snapshot, so observers may (un)subscribe from inside a
    /// callback. Errors and panics are logged and never stop delivery.
    pub fn notify(&self, event: TileEvent, tile: &Tile) -> usize {
        let snapshot: Vec<Arc<dyn TileObserver>> = self.observers.read().clone();
        let center = tile.placement().translation;
        let mut failures = 0;
        for observer in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| match event {
                TileEvent::Attached => observer.on_attached(center, tile),
                TileEvent::Detached => observer.on_detached(center, tile),
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    tracing::warn!(tile = tile.name(), ?event, error = %err, "tile observer failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(tile = tile.name(), ?event, "tile observer panicked");
                }
            }
        }
        failures
    }
}

fn same_observer(a: &Arc<dyn TileObserver>, b: &Arc<dyn TileObserver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
