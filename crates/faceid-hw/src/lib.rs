//! faceid-hw: Frame acquisition for the verification station.
//!
//! Provides V4L2 camera access, an image-directory replay source, the
//! fixed crop applied to every frame, and the frame pump that keeps the
//! latest frame fresh.

pub mod camera;
pub mod frame;
pub mod pump;
pub mod replay;

pub use camera::{Camera, CameraError, CaptureSource, PixelFormat};
pub use frame::{CropWindow, Frame};
pub use pump::{FramePump, LatestFrame, PumpError, PumpHandle};
pub use replay::ImageReplay;
