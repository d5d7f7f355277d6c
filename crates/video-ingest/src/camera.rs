//! OpenCV-backed camera capture.

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::types::{CaptureBackend, CaptureDevice, CaptureError, Frame, FrameFormat};

/// Opens a V4L device index, `/dev/videoN` path, or any URI OpenCV accepts.
#[derive(Clone, Debug)]
pub struct OpenCvBackend {
    uri: String,
    target_size: (u32, u32),
    fps: f64,
}

impl OpenCvBackend {
    pub fn new(uri: impl Into<String>, target_size: (u32, u32)) -> Self {
        Self {
            uri: uri.into(),
            target_size,
            fps: 30.0,
        }
    }
}

impl CaptureBackend for OpenCvBackend {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let mut cap = open_video_capture(&self.uri)?;
        configure_camera(&mut cap, self.target_size, self.fps);
        debug!(uri = %self.uri, "capture device opened");
        Ok(Box::new(OpenCvDevice {
            uri: self.uri.clone(),
            cap,
            frame: Mat::default(),
            scratch: Mat::default(),
            target_size: self.target_size,
        }))
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}

struct OpenCvDevice {
    uri: String,
    cap: VideoCapture,
    frame: Mat,
    scratch: Mat,
    target_size: (u32, u32),
}

impl CaptureDevice for OpenCvDevice {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let ok = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !ok || size.width <= 0 {
            return Err(CaptureError::Read {
                uri: self.uri.clone(),
            });
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w as i32 || size.height != target_h as i32 {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w as i32,
                    height: target_h as i32,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }
}

impl Drop for OpenCvDevice {
    fn drop(&mut self) {
        if let Err(err) = self.cap.release() {
            warn!(uri = %self.uri, "failed to release capture device: {err}");
        }
    }
}

pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    uri.strip_prefix("/dev/video")
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .and_then(|rest| rest.parse::<i32>().ok())
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

fn configure_camera(cap: &mut VideoCapture, target_size: (u32, u32), fps: f64) {
    if let Ok(fourcc) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, fourcc as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
