//! rollcall-hw — Hardware abstraction for webcam capture.
//!
//! V4L2-based camera access with YUYV→RGB conversion and dark-frame
//! detection.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream};
pub use frame::Frame;
