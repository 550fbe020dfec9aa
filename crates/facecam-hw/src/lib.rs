//! facecam-hw: camera capture for the analysis loop.
//!
//! Provides the `FrameSource` abstraction, a V4L2-backed camera and a
//! synthetic test pattern, plus RGB frame conversion and JPEG encoding.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CaptureError, PixelFormat, V4lSource};
pub use frame::Frame;
pub use source::{FrameSource, StreamInfo, SyntheticSource};
