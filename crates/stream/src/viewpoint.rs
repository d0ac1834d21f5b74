use glam::Vec3;
use parking_lot::Mutex;

/// The moving point the loader streams tiles around (usually a camera).
pub trait Viewpoint: Send + Sync {
    /// Current world-space position.
    fn position(&self) -> Vec3;
}

/// A viewpoint whose position is pushed by the host each frame.
#[derive(Debug, Default)]
pub struct TrackedViewpoint {
    position: Mutex<Vec3>,
}

impl TrackedViewpoint {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: Mutex::new(position),
        }
    }

    pub fn set_position(&self, position: Vec3) {
        *self.position.lock() = position;
    }

    /// Shift the position by `delta`.
    pub fn translate(&self, delta: Vec3) {
        *self.position.lock() += delta;
    }
}

impl Viewpoint for TrackedViewpoint {
    fn position(&self) -> Vec3 {
        *self.position.lock()
    }
}
