//! TorchScript-backed YOLO detector.

use std::{convert::TryFrom, path::Path};

use tch::{self, Device, Kind, Tensor};
use tracing::trace;
use video_ingest::{Frame, FrameFormat};

use crate::detector::{DetectorError, ObjectDetector, RawDetection, non_max_suppression};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;

/// Wraps an exported YOLO TorchScript module.
///
/// The module is expected to emit `[1, 4 + classes, N]` predictions with
/// centre-xywh boxes in detector input pixels.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    candidate_threshold: f32,
}

impl TorchDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
    ) -> Result<Self, DetectorError> {
        let path = model_path.as_ref();
        let mut module =
            tch::CModule::load_on_device(path, device).map_err(|err| DetectorError::Load {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        module.set_eval();
        Ok(Self {
            module,
            device,
            input_size,
            candidate_threshold: 0.25,
        })
    }

    /// Override the pre-NMS candidate threshold.
    pub fn with_candidate_threshold(mut self, confidence: f32) -> Self {
        self.candidate_threshold = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Converts a BGR8 frame into a normalized RGB NCHW tensor at the
    /// detector input size.
    fn bgr_to_tensor(&self, frame: &Frame) -> Result<Tensor, DetectorError> {
        if frame.format != FrameFormat::Bgr8 {
            return Err(DetectorError::Frame("expected BGR8 input".into()));
        }
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.data.len() != expected {
            return Err(DetectorError::Frame(format!(
                "unexpected frame buffer size: got {} bytes, expected {expected}",
                frame.data.len()
            )));
        }

        let (in_w, in_h) = self.input_size;
        let tensor = Tensor::from_slice(&frame.data)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, frame.height as i64, frame.width as i64, 3])
            .flip([3])
            .permute([0, 3, 1, 2])
            / 255.0;

        if (frame.width as i64, frame.height as i64) == (in_w, in_h) {
            Ok(tensor)
        } else {
            Ok(tensor.upsample_bilinear2d([in_h, in_w], false, None, None))
        }
    }
}

impl ObjectDetector for TorchDetector {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
        let input = self.bgr_to_tensor(frame)?;
        let output = tch::no_grad(|| self.module.forward_ts(&[input]))
            .map_err(|err| DetectorError::Inference(err.to_string()))?;

        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(DetectorError::Inference(format!(
                "unexpected detector output shape: {shape:?}"
            )));
        }
        if shape[1] < 5 {
            return Err(DetectorError::Inference(format!(
                "detector output requires at least 5 channels, got {}",
                shape[1]
            )));
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)
            .map_err(|err| DetectorError::Inference(err.to_string()))?;

        let (in_w, in_h) = self.input_size;
        let scale_x = frame.width as f32 / in_w as f32;
        let scale_y = frame.height as f32 / in_h as f32;
        let max_x = frame.width.saturating_sub(1) as f32;
        let max_y = frame.height.saturating_sub(1) as f32;

        let mut candidates = Vec::new();
        for row in rows {
            let Some((class_idx, score)) = row[4..]
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            else {
                continue;
            };
            if score < self.candidate_threshold {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            candidates.push(RawDetection {
                class_id: class_idx as i64,
                confidence: score,
                bbox: [
                    ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
                    ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
                    ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
                    ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
                ],
            });
        }

        let candidate_count = candidates.len();
        let mut kept = non_max_suppression(candidates, NMS_IOU_THRESHOLD);
        kept.truncate(MAX_DETECTIONS);
        trace!(candidates = candidate_count, kept = kept.len(), "nms");
        Ok(kept)
    }
}
