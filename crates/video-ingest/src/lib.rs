//! Frame sources for the guide pipeline.
//!
//! Capture is split into a [`CaptureBackend`] factory and the
//! [`CaptureDevice`] handle it opens. The capture loop opens a fresh device
//! every time it starts and drops it when it stops.

#[cfg(feature = "with-opencv")]
mod camera;
mod synthetic;
mod types;

#[cfg(feature = "with-opencv")]
pub use camera::OpenCvBackend;
pub use synthetic::SyntheticBackend;
pub use types::{CaptureBackend, CaptureDevice, CaptureError, Frame, FrameFormat};
