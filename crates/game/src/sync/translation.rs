use std::collections::HashMap;

use glam::Vec3;

use crate::scene::{Scene, Transform3d};

/// Time to reach an authoritative transform target, in seconds. One sync
/// tick's worth of smoothing.
pub const SNAP_INTERVAL: f32 = 0.10;

#[derive(Debug, Clone)]
struct Entry {
    start_position: Vec3,
    start_rotation: Vec3,
    start_scale: Vec3,
    target_position: Vec3,
    target_rotation: Vec3,
    target_scale: Vec3,
    progress: f32,
}

/// Client-side interpolation queue for remote `Transform3d` updates. Instead
/// of snapping, each authoritative update lerps from the transform's current
/// values to the target over `SNAP_INTERVAL`. Writes back without marking
/// anything dirty, so smoothing never echoes onto the wire.
#[derive(Default)]
pub struct TranslationBuffer {
    entries: HashMap<String, Entry>,
}

impl TranslationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)targets the object at `path`. The start is always the transform's
    /// current state and progress resets, so a new update mid-flight bends
    /// the motion toward the new target instead of jumping.
    pub fn enqueue(&mut self, path: &str, current: &Transform3d, target: &Transform3d) {
        self.entries.insert(
            path.to_string(),
            Entry {
                start_position: current.local_position,
                start_rotation: current.local_rotation,
                start_scale: current.local_scale,
                target_position: target.local_position,
                target_rotation: target.local_rotation,
                target_scale: target.local_scale,
                progress: 0.0,
            },
        );
    }

    pub fn update(&mut self, scene: &mut Scene, dt: f32) {
        self.entries.retain(|path, entry| {
            let Some(object) = scene.get_mut(path) else {
                return false;
            };
            let Some(transform) = object.transform3d_mut() else {
                return false;
            };

            entry.progress += dt / SNAP_INTERVAL;
            let t = entry.progress.clamp(0.0, 1.0);

            transform.local_position = entry.start_position.lerp(entry.target_position, t);
            transform.local_rotation = entry.start_rotation.lerp(entry.target_rotation, t);
            transform.local_scale = entry.start_scale.lerp(entry.target_scale, t);

            t < 1.0
        });
    }

    pub fn has(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
