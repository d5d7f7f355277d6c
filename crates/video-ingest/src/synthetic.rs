//! Deterministic test-pattern source used when no camera is attached.

use chrono::Utc;

use crate::types::{CaptureBackend, CaptureDevice, CaptureError, Frame, FrameFormat};

/// Backend producing a moving BGR gradient of a fixed size.
#[derive(Clone, Debug)]
pub struct SyntheticBackend {
    width: u32,
    height: u32,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Open {
                uri: self.describe(),
            });
        }
        Ok(Box::new(SyntheticDevice {
            width: self.width,
            height: self.height,
            tick: 0,
        }))
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}

struct SyntheticDevice {
    width: u32,
    height: u32,
    tick: u32,
}

impl CaptureDevice for SyntheticDevice {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let shifted = (x + self.tick as usize) % w;
                data.push((shifted * 255 / w.max(1)) as u8);
                data.push((y * 255 / h.max(1)) as u8);
                data.push(128);
            }
        }
        self.tick = self.tick.wrapping_add(4);
        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }
}
