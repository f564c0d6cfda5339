//! Frame ingestion and two-view map initialization.

pub mod frame;
pub mod initializer;
pub mod klt;

pub use frame::{build_pyramid, CameraModel, Frame};
pub use initializer::{InitResult, Initializer};
pub use klt::KltParams;
