//! Map: the shared owner of keyframes and map points.
//!
//! Graph entities reference each other through ids and weak handles; the
//! strong `Arc`s live here. Dropping an entity from the map is what finally
//! frees it once transient users let go.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;
use parking_lot::RwLock;

use super::feature::Feature;
use super::keyframe::KeyFrame;
use super::map_point::MapPoint;
use super::types::{KeyFrameId, MapPointId};

/// Container for the SLAM map.
pub struct Map {
    keyframes: RwLock<HashMap<KeyFrameId, Arc<KeyFrame>>>,
    map_points: RwLock<HashMap<MapPointId, Arc<MapPoint>>>,
    next_map_point_id: AtomicU64,
}

impl Map {
    pub fn new() -> Self {
        Self {
            keyframes: RwLock::new(HashMap::new()),
            map_points: RwLock::new(HashMap::new()),
            next_map_point_id: AtomicU64::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // KeyFrames
    // ─────────────────────────────────────────────────────────────────────

    pub fn insert_keyframe(&self, kf: Arc<KeyFrame>) {
        self.keyframes.write().insert(kf.id, kf);
    }

    pub fn keyframe(&self, id: KeyFrameId) -> Option<Arc<KeyFrame>> {
        self.keyframes.read().get(&id).cloned()
    }

    pub fn keyframes(&self) -> Vec<Arc<KeyFrame>> {
        self.keyframes.read().values().cloned().collect()
    }

    pub fn remove_keyframe(&self, id: KeyFrameId) -> Option<Arc<KeyFrame>> {
        self.keyframes.write().remove(&id)
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.read().len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // MapPoints
    // ─────────────────────────────────────────────────────────────────────

    /// Create a landmark at `position` with the next map-point id.
    pub fn create_map_point(&self, position: Vector3<f32>) -> Arc<MapPoint> {
        let id = MapPointId(self.next_map_point_id.fetch_add(1, Ordering::SeqCst));
        let mpt = Arc::new(MapPoint::new(id, position));
        self.map_points.write().insert(id, mpt.clone());
        mpt
    }

    pub fn map_point(&self, id: MapPointId) -> Option<Arc<MapPoint>> {
        self.map_points.read().get(&id).cloned()
    }

    pub fn map_points(&self) -> Vec<Arc<MapPoint>> {
        self.map_points.read().values().cloned().collect()
    }

    pub fn remove_map_point(&self, id: MapPointId) -> Option<Arc<MapPoint>> {
        self.map_points.write().remove(&id)
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points.read().len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Associations and maintenance
    // ─────────────────────────────────────────────────────────────────────

    /// Install both directions of an observation: the keyframe records the
    /// map point, the map point records the keyframe.
    pub fn associate(&self, kf: &Arc<KeyFrame>, mpt: &Arc<MapPoint>, feature: Feature) {
        kf.add_observation(mpt, feature);
        mpt.add_observation(kf, feature);
    }

    /// Drop entities that have been marked bad. Returns how many keyframes
    /// and map points were removed.
    pub fn cull(&self) -> (usize, usize) {
        let bad_kfs: Vec<KeyFrameId> = self
            .keyframes
            .read()
            .values()
            .filter(|kf| kf.is_bad())
            .map(|kf| kf.id)
            .collect();
        let bad_mpts: Vec<MapPointId> = self
            .map_points
            .read()
            .values()
            .filter(|mpt| mpt.is_bad())
            .map(|mpt| mpt.id)
            .collect();

        let mut keyframes = self.keyframes.write();
        for id in &bad_kfs {
            keyframes.remove(id);
        }
        drop(keyframes);

        let mut map_points = self.map_points.write();
        for id in &bad_mpts {
            map_points.remove(id);
        }

        (bad_kfs.len(), bad_mpts.len())
    }

    pub fn clear(&self) {
        self.keyframes.write().clear();
        self.map_points.write().clear();
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("num_keyframes", &self.num_keyframes())
            .field("num_map_points", &self.num_map_points())
            .finish()
    }
}
