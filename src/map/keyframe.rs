//! KeyFrame: a promoted frame that participates in the covisibility graph.
//!
//! Every keyframe keeps weighted edges to the keyframes it shares map-point
//! observations with, a weight-sorted view over those edges, a parent
//! pointer to its strongest neighbor, and loop edges recorded at
//! loop-closure time. Two mutexes split the state: the feature mutex guards
//! the observation maps, the connection mutex guards the graph side. When
//! both are needed the feature mutex is taken first, and neither is ever
//! held across a call into another keyframe or a map point.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::geometry::SE3;
use crate::tracking::frame::{CameraModel, Frame};

use super::feature::Feature;
use super::map_point::MapPoint;
use super::types::{FrameId, KeyFrameId, MapPointId};

/// Process-wide monotonic id source; the first keyframe gets id 0.
static NEXT_KEYFRAME_ID: AtomicU64 = AtomicU64::new(0);

/// Predicate polled by [`KeyFrame::set_erase`]: has the back-end finished
/// loop-closure detection? Installed by the loop-closing thread.
pub type LoopDoneHook = Arc<dyn Fn() -> bool + Send + Sync>;

struct Edge {
    kf: Weak<KeyFrame>,
    weight: u32,
}

#[derive(Default)]
struct ConnectionState {
    connected: HashMap<KeyFrameId, Edge>,
    /// Weight-descending view over `connected`.
    ordered: Vec<(u32, KeyFrameId, Weak<KeyFrame>)>,
    /// Strongest neighbor, the spanning-tree anchor.
    parent: Option<(KeyFrameId, Weak<KeyFrame>)>,
    /// Loop-closure edges; not part of the ordered view and never removed by
    /// ordinary graph maintenance.
    loop_edges: HashMap<KeyFrameId, Weak<KeyFrame>>,
    not_erase: bool,
    to_be_erase: bool,
    bad: bool,
    loop_done_hook: Option<LoopDoneHook>,
}

#[derive(Default)]
struct FeatureState {
    /// Landmark observations: map point -> observing feature.
    observations: HashMap<MapPointId, (Arc<MapPoint>, Feature)>,
    /// Candidate features not yet backed by a landmark.
    seeds: Vec<Feature>,
    /// Secondary feature list scanned by `get_features_in_area`.
    bow_features: Vec<Feature>,
}

/// A keyframe in the map.
pub struct KeyFrame {
    pub id: KeyFrameId,
    /// Id of the source frame this keyframe was promoted from.
    pub frame_id: FrameId,
    /// Capture time in seconds.
    pub timestamp: f64,
    camera: CameraModel,
    /// Covisibility weight a neighbor needs to become an edge.
    min_connection_weight: u32,
    pose: RwLock<SE3>,
    features: Mutex<FeatureState>,
    connections: Mutex<ConnectionState>,
}

impl KeyFrame {
    /// Promote a frame: snapshot its intrinsics, pose and key-points, and
    /// assign the next process-wide id.
    pub fn from_frame(frame: &Frame, min_connection_weight: u32) -> Arc<Self> {
        let id = KeyFrameId(NEXT_KEYFRAME_ID.fetch_add(1, Ordering::SeqCst));
        Self::with_id(id, frame, min_connection_weight)
    }

    fn with_id(id: KeyFrameId, frame: &Frame, min_connection_weight: u32) -> Arc<Self> {
        let bow_features = frame
            .keypoints()
            .iter()
            .map(|&px| Feature::new(px, 0))
            .collect();
        Arc::new(Self {
            id,
            frame_id: frame.id,
            timestamp: frame.timestamp,
            camera: *frame.camera(),
            min_connection_weight,
            pose: RwLock::new(frame.pose()),
            features: Mutex::new(FeatureState {
                observations: HashMap::new(),
                seeds: Vec::new(),
                bow_features,
            }),
            connections: Mutex::new(ConnectionState::default()),
        })
    }

    #[cfg(test)]
    fn from_frame_with_id(id: KeyFrameId, frame: &Frame, min_connection_weight: u32) -> Arc<Self> {
        Self::with_id(id, frame, min_connection_weight)
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn pose(&self) -> SE3 {
        *self.pose.read()
    }

    pub fn set_pose(&self, pose: SE3) {
        *self.pose.write() = pose;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Features and observations
    // ─────────────────────────────────────────────────────────────────────

    /// Record that this keyframe observes `mpt` at `feature`.
    pub fn add_observation(&self, mpt: &Arc<MapPoint>, feature: Feature) {
        self.features
            .lock()
            .observations
            .insert(mpt.id, (mpt.clone(), feature));
    }

    /// Snapshot of the landmark observations.
    pub fn observations(&self) -> Vec<(Arc<MapPoint>, Feature)> {
        self.features.lock().observations.values().cloned().collect()
    }

    pub fn num_observations(&self) -> usize {
        self.features.lock().observations.len()
    }

    pub fn add_seed_feature(&self, feature: Feature) {
        self.features.lock().seeds.push(feature);
    }

    pub fn seed_features(&self) -> Vec<Feature> {
        self.features.lock().seeds.clone()
    }

    pub fn set_bow_features(&self, features: Vec<Feature>) {
        self.features.lock().bow_features = features;
    }

    /// Indices of the secondary feature list inside the closed disk of
    /// radius `r` around `(x, y)`.
    pub fn get_features_in_area(&self, x: f32, y: f32, r: f32) -> Vec<usize> {
        let state = self.features.lock();
        let mut indices = Vec::new();
        for (i, ft) in state.bow_features.iter().enumerate() {
            if ft.px.x < x - r || ft.px.x > x + r || ft.px.y < y - r || ft.px.y > y + r {
                continue;
            }
            let dx = ft.px.x - x;
            let dy = ft.px.y - y;
            if dx * dx + dy * dy <= r * r {
                indices.push(i);
            }
        }
        indices
    }

    // ─────────────────────────────────────────────────────────────────────
    // Covisibility graph
    // ─────────────────────────────────────────────────────────────────────

    /// Recompute the edge set from the current map-point co-observations.
    ///
    /// Tallies, per neighboring keyframe, how many of this keyframe's live
    /// map points it also observes. Neighbors at or above the connection
    /// threshold become edges in both directions; if none qualifies, the
    /// last sub-threshold candidate seen is installed as the sole edge so a
    /// keyframe with any co-observed point stays connected. A keyframe whose
    /// tally comes up empty is marked bad. Observations of map points that
    /// have gone bad are dropped along the way.
    pub fn update_connections(self: &Arc<Self>) {
        if self.is_bad() {
            return;
        }

        let snapshot: Vec<(Arc<MapPoint>, Feature)> = self.observations();

        let mut dead: Vec<MapPointId> = Vec::new();
        let mut counter: HashMap<KeyFrameId, (Arc<KeyFrame>, u32)> = HashMap::new();
        for (mpt, _) in &snapshot {
            if mpt.is_bad() {
                dead.push(mpt.id);
                continue;
            }
            for (kf, _) in mpt.observations() {
                if kf.id == self.id {
                    continue;
                }
                counter
                    .entry(kf.id)
                    .and_modify(|entry| entry.1 += 1)
                    .or_insert((kf, 1));
            }
        }

        if !dead.is_empty() {
            let mut state = self.features.lock();
            for id in &dead {
                state.observations.remove(id);
            }
        }

        if counter.is_empty() {
            self.set_bad();
            return;
        }

        let mut fallback: Option<(Arc<KeyFrame>, u32)> = None;
        let mut weighted: Vec<(u32, Arc<KeyFrame>)> = Vec::new();
        for (_, (kf, count)) in counter {
            if count < self.min_connection_weight {
                // Last sub-threshold candidate in traversal order wins.
                fallback = Some((kf, count));
            } else {
                kf.add_connection(self, count);
                weighted.push((count, kf));
            }
        }

        if weighted.is_empty() {
            let (kf, count) = fallback.expect("tally was non-empty");
            kf.add_connection(self, count);
            weighted.push((count, kf));
        }

        weighted.sort_by(|a, b| b.0.cmp(&a.0));

        let mut state = self.connections.lock();
        state.connected = weighted
            .iter()
            .map(|(weight, kf)| {
                (
                    kf.id,
                    Edge {
                        kf: Arc::downgrade(kf),
                        weight: *weight,
                    },
                )
            })
            .collect();
        state.ordered = weighted
            .iter()
            .map(|(weight, kf)| (*weight, kf.id, Arc::downgrade(kf)))
            .collect();
        state.parent = weighted
            .first()
            .map(|(_, kf)| (kf.id, Arc::downgrade(kf)));
    }

    /// Install or update the directed edge to `kf`. A no-op when the weight
    /// is unchanged.
    pub fn add_connection(&self, kf: &Arc<KeyFrame>, weight: u32) {
        let mut state = self.connections.lock();
        if let Some(edge) = state.connected.get(&kf.id) {
            if edge.weight == weight {
                return;
            }
        }
        state.connected.insert(
            kf.id,
            Edge {
                kf: Arc::downgrade(kf),
                weight,
            },
        );
        Self::rebuild_ordered(&mut state);
    }

    /// Drop the directed edge to `kf_id`, if present.
    pub fn remove_connection(&self, kf_id: KeyFrameId) {
        let mut state = self.connections.lock();
        if state.connected.remove(&kf_id).is_some() {
            Self::rebuild_ordered(&mut state);
        }
    }

    fn rebuild_ordered(state: &mut ConnectionState) {
        let mut parent: Option<(KeyFrameId, Weak<KeyFrame>)> = None;
        let mut max_weight = 0;
        let mut ordered: Vec<(u32, KeyFrameId, Weak<KeyFrame>)> =
            Vec::with_capacity(state.connected.len());
        for (&id, edge) in &state.connected {
            // Ties go to the most recently visited neighbor.
            if edge.weight >= max_weight {
                max_weight = edge.weight;
                parent = Some((id, edge.kf.clone()));
            }
            ordered.push((edge.weight, id, edge.kf.clone()));
        }
        ordered.sort_by(|a, b| b.0.cmp(&a.0));
        state.ordered = ordered;
        state.parent = parent;
    }

    /// Up to `num` connected keyframes with weight at least `min_weight`,
    /// strongest first. `None` returns all qualifying neighbors.
    pub fn get_connected_keyframes(
        &self,
        num: Option<usize>,
        min_weight: u32,
    ) -> Vec<Arc<KeyFrame>> {
        let state = self.connections.lock();
        let limit = num.unwrap_or(usize::MAX);
        state
            .ordered
            .iter()
            .take_while(|(weight, _, _)| *weight >= min_weight)
            .filter_map(|(_, _, kf)| kf.upgrade())
            .take(limit)
            .collect()
    }

    /// One-hop expansion: neighbors of neighbors, excluding this keyframe
    /// and the first ring. With `Some(num)` the candidates are ranked by how
    /// many first-ring neighbors reach them; with `None` all are returned
    /// unordered.
    pub fn get_sub_connected_keyframes(self: &Arc<Self>, num: Option<usize>) -> Vec<Arc<KeyFrame>> {
        let first_ring = self.get_connected_keyframes(None, 0);
        let mut excluded: HashSet<KeyFrameId> = first_ring.iter().map(|kf| kf.id).collect();
        excluded.insert(self.id);

        let mut candidates: HashMap<KeyFrameId, (Arc<KeyFrame>, u32)> = HashMap::new();
        for kf in &first_ring {
            for sub in kf.get_connected_keyframes(None, 0) {
                if excluded.contains(&sub.id) {
                    continue;
                }
                candidates
                    .entry(sub.id)
                    .and_modify(|entry| entry.1 += 1)
                    .or_insert((sub, 1));
            }
        }

        match num {
            None => candidates.into_values().map(|(kf, _)| kf).collect(),
            Some(n) => {
                let mut ranked: Vec<(u32, Arc<KeyFrame>)> = candidates
                    .into_values()
                    .map(|(kf, count)| (count, kf))
                    .collect();
                ranked.sort_by(|a, b| b.0.cmp(&a.0));
                ranked.truncate(n);
                ranked.into_iter().map(|(_, kf)| kf).collect()
            }
        }
    }

    /// Covisibility weight of the edge to `kf_id`; 0 when not connected.
    pub fn get_weight(&self, kf_id: KeyFrameId) -> u32 {
        self.connections
            .lock()
            .connected
            .get(&kf_id)
            .map(|edge| edge.weight)
            .unwrap_or(0)
    }

    /// The strongest neighbor, if any.
    pub fn get_parent(&self) -> Option<Arc<KeyFrame>> {
        self.connections
            .lock()
            .parent
            .as_ref()
            .and_then(|(_, kf)| kf.upgrade())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Loop edges and lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Record a loop-closure edge and protect this keyframe from erasure
    /// until the back-end signals completion.
    pub fn add_loop_edge(&self, kf: &Arc<KeyFrame>) {
        let mut state = self.connections.lock();
        state.not_erase = true;
        state.loop_edges.insert(kf.id, Arc::downgrade(kf));
    }

    pub fn get_loop_edges(&self) -> Vec<Arc<KeyFrame>> {
        self.connections
            .lock()
            .loop_edges
            .values()
            .filter_map(|kf| kf.upgrade())
            .collect()
    }

    /// Prevent destruction until `set_erase` lifts the protection.
    pub fn set_not_erase(&self) {
        self.connections.lock().not_erase = true;
    }

    /// Install the loop-closure-finished predicate consulted by `set_erase`.
    pub fn set_loop_done_hook(&self, hook: LoopDoneHook) {
        self.connections.lock().loop_done_hook = Some(hook);
    }

    /// Lift the erasure protection once loop-closure detection has finished,
    /// then complete a destruction that was latched while protected.
    ///
    /// Without an installed hook the protection is sticky.
    pub fn set_erase(self: &Arc<Self>) {
        // The predicate is external; never call it under a lock.
        let hook = self.connections.lock().loop_done_hook.clone();
        let loop_done = hook.map(|h| h()).unwrap_or(false);

        let pending = {
            let mut state = self.connections.lock();
            if loop_done {
                state.not_erase = false;
            }
            state.to_be_erase
        };
        if pending {
            self.set_bad();
        }
    }

    /// Remove this keyframe from the graph: drop its map-point observations,
    /// sever every edge in both directions and mark it bad.
    ///
    /// A no-op for keyframe 0. While `not_erase` protection is active the
    /// destruction is latched instead and replayed by `set_erase`.
    pub fn set_bad(self: &Arc<Self>) {
        {
            let mut state = self.connections.lock();
            if self.id == KeyFrameId(0) {
                return;
            }
            if state.not_erase {
                state.to_be_erase = true;
                return;
            }
        }

        let observed: Vec<Arc<MapPoint>> = {
            let state = self.features.lock();
            state
                .observations
                .values()
                .map(|(mpt, _)| mpt.clone())
                .collect()
        };
        for mpt in observed {
            mpt.remove_observation(self.id);
        }

        // Snapshot the neighborhood, then sever edges without holding our
        // own connection mutex across the neighbor calls.
        let neighbors: Vec<Arc<KeyFrame>> = {
            let mut state = self.connections.lock();
            state.bad = true;
            let neighbors = state
                .connected
                .values()
                .filter_map(|edge| edge.kf.upgrade())
                .collect();
            state.connected.clear();
            state.ordered.clear();
            state.parent = None;
            neighbors
        };
        for kf in neighbors {
            kf.remove_connection(self.id);
        }

        {
            let mut state = self.features.lock();
            state.observations.clear();
            state.seeds.clear();
        }

        debug!("keyframe {} removed from the graph", self.id);
    }

    pub fn is_bad(&self) -> bool {
        self.connections.lock().bad
    }

    /// Whether a destruction request was latched while the keyframe was
    /// protected.
    pub fn is_erase_requested(&self) -> bool {
        self.connections.lock().to_be_erase
    }
}

impl std::fmt::Debug for KeyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connections = self.connections.lock();
        f.debug_struct("KeyFrame")
            .field("id", &self.id)
            .field("frame_id", &self.frame_id)
            .field("connections", &connections.connected.len())
            .field("loop_edges", &connections.loop_edges.len())
            .field("is_bad", &connections.bad)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::Frame;
    use image::GrayImage;
    use nalgebra::{Vector2, Vector3};

    const THRESHOLD: u32 = 10;

    fn make_frame(keypoints: Vec<Vector2<f32>>) -> Frame {
        Frame::new(
            FrameId(0),
            0.0,
            CameraModel::new(500.0, 500.0, 320.0, 240.0),
            vec![GrayImage::new(8, 8)],
            keypoints,
        )
        .unwrap()
    }

    /// Keyframe with a guaranteed non-zero id, so `set_bad` is never the
    /// immortal-origin no-op.
    fn make_keyframe() -> Arc<KeyFrame> {
        let kf = KeyFrame::from_frame(&make_frame(vec![]), THRESHOLD);
        if kf.id.0 == 0 {
            KeyFrame::from_frame(&make_frame(vec![]), THRESHOLD)
        } else {
            kf
        }
    }

    fn observe(kf: &Arc<KeyFrame>, mpt: &Arc<MapPoint>) {
        let ft = Feature::new(Vector2::zeros(), 0);
        kf.add_observation(mpt, ft);
        mpt.add_observation(kf, ft);
    }

    /// Create `count` map points observed by both keyframes.
    fn share_points(
        a: &Arc<KeyFrame>,
        b: &Arc<KeyFrame>,
        count: usize,
        next_id: &mut u64,
    ) -> Vec<Arc<MapPoint>> {
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let mpt = Arc::new(MapPoint::new(MapPointId(*next_id), Vector3::zeros()));
            *next_id += 1;
            observe(a, &mpt);
            observe(b, &mpt);
            points.push(mpt);
        }
        points
    }

    /// Scenario: A-B share 30 points, A-C share 5, B-C share 20,
    /// threshold 10.
    fn weighted_triangle() -> (Arc<KeyFrame>, Arc<KeyFrame>, Arc<KeyFrame>, Vec<Arc<MapPoint>>) {
        let a = make_keyframe();
        let b = make_keyframe();
        let c = make_keyframe();
        let mut next_id = 0;
        let mut points = share_points(&a, &b, 30, &mut next_id);
        points.extend(share_points(&a, &c, 5, &mut next_id));
        points.extend(share_points(&b, &c, 20, &mut next_id));

        a.update_connections();
        b.update_connections();
        c.update_connections();
        (a, b, c, points)
    }

    #[test]
    fn test_covisibility_weighting() {
        let (a, b, c, _points) = weighted_triangle();

        // A keeps only the above-threshold edge to B; the sub-threshold C
        // tally is dropped because a qualifying neighbor exists.
        let a_ring = a.get_connected_keyframes(None, 0);
        assert_eq!(a_ring.len(), 1);
        assert_eq!(a_ring[0].id, b.id);
        assert_eq!(a.get_weight(b.id), 30);
        assert_eq!(a.get_weight(c.id), 0);

        let b_ring = b.get_connected_keyframes(None, 0);
        assert_eq!(b_ring.len(), 2);
        assert_eq!(b_ring[0].id, a.id);
        assert_eq!(b_ring[1].id, c.id);
        assert_eq!(b.get_weight(a.id), 30);
        assert_eq!(b.get_weight(c.id), 20);

        let c_ring = c.get_connected_keyframes(None, 0);
        assert_eq!(c_ring.len(), 1);
        assert_eq!(c_ring[0].id, b.id);
        assert_eq!(c.get_weight(b.id), 20);

        assert_eq!(a.get_parent().unwrap().id, b.id);
        assert_eq!(b.get_parent().unwrap().id, a.id);
        assert_eq!(c.get_parent().unwrap().id, b.id);
    }

    #[test]
    fn test_ordered_view_matches_connected() {
        let (_, b, _, _points) = weighted_triangle();

        // The ordered view is the connected map sorted by weight descending
        // and the parent is its head.
        let ring = b.get_connected_keyframes(None, 0);
        let weights: Vec<u32> = ring.iter().map(|kf| b.get_weight(kf.id)).collect();
        let mut sorted = weights.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(weights, sorted);
        assert_eq!(b.get_parent().unwrap().id, ring[0].id);
    }

    #[test]
    fn test_bad_propagation() {
        let (a, b, c, points) = weighted_triangle();

        b.set_bad();
        assert!(b.is_bad());

        // Severed in both directions.
        assert_eq!(a.get_weight(b.id), 0);
        assert_eq!(c.get_weight(b.id), 0);
        assert!(a.get_connected_keyframes(None, 0).is_empty());
        assert!(c.get_connected_keyframes(None, 0).is_empty());

        // A's only edge was B and C stayed sub-threshold, so the parent is
        // unset rather than rewired.
        assert!(a.get_parent().is_none());

        // The shared map points no longer list B as an observer.
        for mpt in &points {
            assert!(
                mpt.observations().iter().all(|(kf, _)| kf.id != b.id),
                "{} still observed by bad keyframe",
                mpt.id
            );
        }
        assert_eq!(b.num_observations(), 0);
    }

    #[test]
    fn test_loop_edge_persistence() {
        let a = make_keyframe();
        let d = make_keyframe();

        a.add_loop_edge(&d);
        a.set_bad();
        assert!(!a.is_bad());
        assert!(a.is_erase_requested());

        // Without a loop-done signal the protection is sticky.
        a.set_erase();
        assert!(!a.is_bad());

        // With the synthetic signal the latched destruction completes.
        a.set_loop_done_hook(Arc::new(|| true));
        a.set_erase();
        assert!(a.is_bad());

        // Loop edges survive destruction.
        let loops = a.get_loop_edges();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].id, d.id);
    }

    #[test]
    fn test_set_bad_repeated_is_idempotent() {
        let (a, b, _, _points) = weighted_triangle();
        b.set_bad();
        b.set_bad();
        assert!(b.is_bad());
        assert_eq!(a.get_weight(b.id), 0);
    }

    #[test]
    fn test_first_keyframe_immortal() {
        let kf0 = KeyFrame::from_frame_with_id(KeyFrameId(0), &make_frame(vec![]), THRESHOLD);
        let other = make_keyframe();
        kf0.add_connection(&other, 5);

        kf0.set_bad();
        assert!(!kf0.is_bad());
        assert_eq!(kf0.get_weight(other.id), 5);
    }

    #[test]
    fn test_add_connection_idempotent_and_removable() {
        let a = make_keyframe();
        let b = make_keyframe();

        a.add_connection(&b, 30);
        a.add_connection(&b, 30);
        assert_eq!(a.get_connected_keyframes(None, 0).len(), 1);
        assert_eq!(a.get_weight(b.id), 30);
        assert_eq!(a.get_parent().unwrap().id, b.id);

        a.remove_connection(b.id);
        assert_eq!(a.get_weight(b.id), 0);
        assert!(a.get_connected_keyframes(None, 0).is_empty());
        assert!(a.get_parent().is_none());
    }

    #[test]
    fn test_add_connection_updates_weight() {
        let a = make_keyframe();
        let b = make_keyframe();
        a.add_connection(&b, 10);
        a.add_connection(&b, 25);
        assert_eq!(a.get_weight(b.id), 25);
        assert_eq!(a.get_connected_keyframes(None, 0).len(), 1);
    }

    #[test]
    fn test_get_weight_absent_is_zero_and_non_mutating() {
        let a = make_keyframe();
        let b = make_keyframe();
        assert_eq!(a.get_weight(b.id), 0);
        assert!(a.get_connected_keyframes(None, 0).is_empty());
    }

    #[test]
    fn test_get_connected_keyframes_limits() {
        let a = make_keyframe();
        let neighbors: Vec<Arc<KeyFrame>> = (0..4).map(|_| make_keyframe()).collect();
        for (kf, weight) in neighbors.iter().zip([30u32, 20, 10, 5]) {
            a.add_connection(kf, weight);
        }

        assert_eq!(a.get_connected_keyframes(None, 0).len(), 4);
        let top2 = a.get_connected_keyframes(Some(2), 0);
        assert_eq!(top2.len(), 2);
        assert_eq!(a.get_weight(top2[0].id), 30);
        assert_eq!(a.get_weight(top2[1].id), 20);

        let strong = a.get_connected_keyframes(None, 15);
        assert_eq!(strong.len(), 2);
        assert_eq!(a.get_connected_keyframes(Some(1), 15).len(), 1);
    }

    #[test]
    fn test_update_connections_rerun_is_stable() {
        let (a, b, c, _points) = weighted_triangle();

        a.update_connections();
        a.update_connections();

        let ring = a.get_connected_keyframes(None, 0);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring[0].id, b.id);
        assert_eq!(a.get_weight(b.id), 30);
        assert_eq!(a.get_weight(c.id), 0);
    }

    #[test]
    fn test_update_connections_fallback_installs_sole_edge() {
        let a = make_keyframe();
        let b = make_keyframe();
        let mut next_id = 0;
        share_points(&a, &b, 5, &mut next_id); // below threshold 10

        a.update_connections();

        assert_eq!(a.get_weight(b.id), 5);
        assert_eq!(b.get_weight(a.id), 5);
        assert_eq!(a.get_parent().unwrap().id, b.id);
    }

    #[test]
    fn test_update_connections_without_coobservers_marks_bad() {
        let a = make_keyframe();
        let mpt = Arc::new(MapPoint::new(MapPointId(0), Vector3::zeros()));
        observe(&a, &mpt);

        a.update_connections();
        assert!(a.is_bad());
    }

    #[test]
    fn test_update_connections_prunes_dead_map_points() {
        let a = make_keyframe();
        let b = make_keyframe();
        let mut next_id = 0;
        share_points(&a, &b, 12, &mut next_id);

        let dead = Arc::new(MapPoint::new(MapPointId(next_id), Vector3::zeros()));
        observe(&a, &dead);
        observe(&b, &dead);
        dead.set_bad();

        a.update_connections();

        assert_eq!(a.get_weight(b.id), 12);
        assert_eq!(a.num_observations(), 12);
    }

    #[test]
    fn test_sub_connected_keyframes() {
        // Diamond: a-b, a-c, b-d, c-d. d is reachable from a through both
        // neighbors.
        let a = make_keyframe();
        let b = make_keyframe();
        let c = make_keyframe();
        let d = make_keyframe();
        a.add_connection(&b, 20);
        b.add_connection(&a, 20);
        a.add_connection(&c, 15);
        c.add_connection(&a, 15);
        b.add_connection(&d, 12);
        d.add_connection(&b, 12);
        c.add_connection(&d, 11);
        d.add_connection(&c, 11);

        let sub = a.get_sub_connected_keyframes(None);
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].id, d.id);

        let ranked = a.get_sub_connected_keyframes(Some(1));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, d.id);
    }

    #[test]
    fn test_get_features_in_area() {
        let keypoints = vec![
            Vector2::new(10.0, 10.0),
            Vector2::new(13.0, 10.0),
            Vector2::new(20.0, 10.0),
        ];
        let kf = KeyFrame::from_frame(&make_frame(keypoints), THRESHOLD);

        // Closed disk: the point at distance exactly 3 is included.
        let found = kf.get_features_in_area(10.0, 10.0, 3.0);
        assert_eq!(found, vec![0, 1]);

        assert!(kf.get_features_in_area(100.0, 100.0, 5.0).is_empty());
    }

    #[test]
    fn test_set_bad_clears_seeds() {
        let a = make_keyframe();
        a.add_seed_feature(Feature::new(Vector2::new(1.0, 2.0), 0));
        assert_eq!(a.seed_features().len(), 1);

        a.set_bad();
        assert!(a.seed_features().is_empty());
    }

    #[test]
    fn test_concurrent_graph_mutation() {
        let a = make_keyframe();
        let b = make_keyframe();
        let c = make_keyframe();

        std::thread::scope(|scope| {
            let (a1, b1) = (&a, &b);
            scope.spawn(move || {
                for weight in 1..=200u32 {
                    a1.add_connection(b1, weight);
                }
            });
            let (a2, c2) = (&a, &c);
            scope.spawn(move || {
                for _ in 0..200 {
                    let _ = a2.get_connected_keyframes(None, 0);
                    let _ = a2.get_weight(c2.id);
                    a2.add_connection(c2, 7);
                    a2.remove_connection(c2.id);
                }
            });
        });

        assert_eq!(a.get_weight(b.id), 200);
        assert_eq!(a.get_parent().unwrap().id, b.id);
    }

    #[test]
    fn test_pose_snapshot_from_frame() {
        let frame = make_frame(vec![]);
        let pose = SE3::from_rt(nalgebra::Matrix3::identity(), Vector3::new(1.0, 0.0, 0.0));
        frame.set_pose(pose);

        let kf = KeyFrame::from_frame(&frame, THRESHOLD);
        assert_eq!(kf.pose(), pose);

        // Later frame pose changes do not affect the snapshot.
        frame.set_pose(SE3::identity());
        assert_eq!(kf.pose(), pose);
    }
}
