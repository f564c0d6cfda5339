//! MapPoint: a 3-D landmark observed by keyframes.
//!
//! A map point records which keyframes observe it and at which feature. The
//! observation map holds weak keyframe handles so the point never keeps a
//! keyframe alive; ownership of both entities lives in the [`Map`].
//!
//! [`Map`]: super::map::Map

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock};

use super::feature::Feature;
use super::keyframe::KeyFrame;
use super::types::{KeyFrameId, MapPointId};

/// A 3-D landmark.
pub struct MapPoint {
    pub id: MapPointId,
    position: RwLock<Vector3<f32>>,
    observations: Mutex<HashMap<KeyFrameId, (Weak<KeyFrame>, Feature)>>,
    bad: AtomicBool,
}

impl MapPoint {
    pub fn new(id: MapPointId, position: Vector3<f32>) -> Self {
        Self {
            id,
            position: RwLock::new(position),
            observations: Mutex::new(HashMap::new()),
            bad: AtomicBool::new(false),
        }
    }

    /// Position in the world frame.
    pub fn position(&self) -> Vector3<f32> {
        *self.position.read()
    }

    pub fn set_position(&self, position: Vector3<f32>) {
        *self.position.write() = position;
    }

    /// Record that `kf` observes this point at `feature`.
    pub fn add_observation(&self, kf: &Arc<KeyFrame>, feature: Feature) {
        self.observations
            .lock()
            .insert(kf.id, (Arc::downgrade(kf), feature));
    }

    /// Drop the observation from the given keyframe.
    ///
    /// Returns whether an observation existed.
    pub fn remove_observation(&self, kf_id: KeyFrameId) -> bool {
        self.observations.lock().remove(&kf_id).is_some()
    }

    /// Snapshot of the live observers. Keyframes that have been dropped are
    /// skipped.
    pub fn observations(&self) -> Vec<(Arc<KeyFrame>, Feature)> {
        self.observations
            .lock()
            .values()
            .filter_map(|(kf, ft)| kf.upgrade().map(|kf| (kf, *ft)))
            .collect()
    }

    pub fn num_observations(&self) -> usize {
        self.observations.lock().len()
    }

    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::SeqCst)
    }

    pub fn set_bad(&self) {
        self.bad.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapPoint")
            .field("id", &self.id)
            .field("position", &self.position())
            .field("observations", &self.num_observations())
            .field("is_bad", &self.is_bad())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::types::FrameId;
    use crate::tracking::frame::{CameraModel, Frame};
    use image::GrayImage;
    use nalgebra::Vector2;

    fn make_keyframe() -> Arc<KeyFrame> {
        let frame = Frame::new(
            FrameId(0),
            0.0,
            CameraModel::new(500.0, 500.0, 320.0, 240.0),
            vec![GrayImage::new(8, 8)],
            vec![],
        )
        .unwrap();
        KeyFrame::from_frame(&frame, 15)
    }

    #[test]
    fn test_add_remove_observation() {
        let mp = MapPoint::new(MapPointId(1), Vector3::new(1.0, 2.0, 3.0));
        let kf = make_keyframe();

        mp.add_observation(&kf, Feature::new(Vector2::new(10.0, 20.0), 0));
        assert_eq!(mp.num_observations(), 1);

        assert!(mp.remove_observation(kf.id));
        assert_eq!(mp.num_observations(), 0);
        assert!(!mp.remove_observation(kf.id)); // already removed
    }

    #[test]
    fn test_observations_skip_dropped_keyframes() {
        let mp = MapPoint::new(MapPointId(1), Vector3::zeros());
        let kf = make_keyframe();
        mp.add_observation(&kf, Feature::new(Vector2::zeros(), 0));

        assert_eq!(mp.observations().len(), 1);
        drop(kf);
        assert_eq!(mp.observations().len(), 0);
    }

    #[test]
    fn test_bad_flag() {
        let mp = MapPoint::new(MapPointId(2), Vector3::zeros());
        assert!(!mp.is_bad());
        mp.set_bad();
        assert!(mp.is_bad());
    }

    #[test]
    fn test_position_update() {
        let mp = MapPoint::new(MapPointId(3), Vector3::zeros());
        mp.set_position(Vector3::new(0.5, -0.5, 4.0));
        assert_eq!(mp.position(), Vector3::new(0.5, -0.5, 4.0));
    }
}
