use thiserror::Error;

/// Raw frame captured from a video source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Pixel area of the frame.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to read frame from {uri:?}")]
    Read { uri: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An opened capture device yielding successive frames.
///
/// A failed read is not terminal; callers may retry on the same handle. The
/// device is released when the handle is dropped.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Factory for capture devices. `open` is invoked every time a capture loop
/// starts, so implementations must support being opened repeatedly.
pub trait CaptureBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError>;

    /// Human readable description of the source for logs.
    fn describe(&self) -> String;
}
