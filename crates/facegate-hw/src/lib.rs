//! facegate-hw — V4L2 camera capture for live login frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
