//! Map entities: keyframes, landmarks, and their shared ownership.

pub mod feature;
pub mod keyframe;
pub mod map;
pub mod map_point;
pub mod types;

pub use feature::Feature;
pub use keyframe::{KeyFrame, LoopDoneHook};
pub use map::Map;
pub use map_point::MapPoint;
pub use types::{FrameId, KeyFrameId, MapPointId};
