//! Geometric admission check and preprocessing for `READ`.
//!
//! The selected box must cover a sensible share of the frame before the OCR
//! engine is invoked. Accepted requests become an [`OcrJob`] that runs off
//! the connection loop; [`run_ocr`] turns its outcome into outbound messages.

use std::sync::Arc;

use anyhow::Result;
use image::{GrayImage, Luma, imageops};
use imageproc::{
    contrast::{equalize_histogram, otsu_level},
    filter::gaussian_blur_f32,
};
use ml_core::TextExtractor;
use tracing::{debug, info_span, warn};
use video_ingest::Frame;

use crate::guide::{
    annotation::frame_to_rgb,
    data::{Outbound, bbox_area},
};

pub(crate) const BRING_CLOSER: &str = "Please bring the object closer to read";
pub(crate) const MOVE_AWAY: &str = "Move the object slightly away";
pub(crate) const READING: &str = "Reading... Hold steady";
pub(crate) const NO_TEXT: &str = "No text detected";

const DENOISE_SIGMA: f32 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    TooFar,
    TooClose,
    Proceed,
}

/// Classify `bbox_area / frame_area` against `[min_ratio, max_ratio]`.
/// Both bounds are inclusive on the proceed side.
pub fn admit(bbox_area: i64, frame_area: u64, min_ratio: f64, max_ratio: f64) -> GateDecision {
    if frame_area == 0 {
        return GateDecision::TooFar;
    }
    let ratio = bbox_area.max(0) as f64 / frame_area as f64;
    if ratio < min_ratio {
        GateDecision::TooFar
    } else if ratio > max_ratio {
        GateDecision::TooClose
    } else {
        GateDecision::Proceed
    }
}

/// Accepted read request.
#[derive(Clone, Debug)]
pub struct OcrJob {
    pub frame: Arc<Frame>,
    pub bbox: [i32; 4],
}

/// Run the gate for a selection against the newest raw frame.
///
/// Returns the immediate reply and, when admitted, the job to run.
pub fn evaluate(
    frame: Arc<Frame>,
    bbox: [i32; 4],
    min_ratio: f64,
    max_ratio: f64,
) -> (Outbound, Option<OcrJob>) {
    match admit(bbox_area(&bbox), frame.area(), min_ratio, max_ratio) {
        GateDecision::TooFar => {
            metrics::counter!("guide_ocr_requests_total", "outcome" => "too_far").increment(1);
            (Outbound::tts(BRING_CLOSER), None)
        }
        GateDecision::TooClose => {
            metrics::counter!("guide_ocr_requests_total", "outcome" => "too_close").increment(1);
            (Outbound::tts(MOVE_AWAY), None)
        }
        GateDecision::Proceed => (Outbound::tts(READING), Some(OcrJob { frame, bbox })),
    }
}

/// Preprocessed views of the selected region.
pub struct Prepared {
    /// Histogram-equalised grayscale crop.
    pub equalized: GrayImage,
    /// Denoised, Otsu-thresholded binary crop.
    pub binary: GrayImage,
}

/// Crop the box (clamped to the frame) and prepare it for reading.
pub fn preprocess(frame: &Frame, bbox: [i32; 4]) -> Result<Prepared> {
    let rgb = frame_to_rgb(frame)?;
    let (x, y, width, height) = clamp_box(bbox, frame.width, frame.height);
    let crop = imageops::crop_imm(&rgb, x, y, width, height).to_image();
    let gray = imageops::grayscale(&crop);

    let equalized = equalize_histogram(&gray);
    let denoised = gaussian_blur_f32(&equalized, DENOISE_SIGMA);
    let level = otsu_level(&denoised);
    let mut binary = denoised;
    for pixel in binary.pixels_mut() {
        *pixel = Luma([if pixel[0] > level { 255 } else { 0 }]);
    }

    Ok(Prepared { equalized, binary })
}

/// `(x, y, width, height)` inside the frame; at least one pixel wide.
fn clamp_box(bbox: [i32; 4], frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
    let max_x = frame_width.saturating_sub(1) as i32;
    let max_y = frame_height.saturating_sub(1) as i32;
    let x1 = bbox[0].clamp(0, max_x);
    let y1 = bbox[1].clamp(0, max_y);
    let x2 = bbox[2].clamp(x1 + 1, max_x + 1);
    let y2 = bbox[3].clamp(y1 + 1, max_y + 1);
    (x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32)
}

/// Read the job's region. Tries the binary crop first, then the equalised
/// grayscale crop. Engine failures are reported as "no text".
pub fn run_ocr(job: &OcrJob, extractor: &dyn TextExtractor) -> Vec<Outbound> {
    let span = info_span!("guide.ocr", bbox = ?job.bbox);
    let _guard = span.enter();

    let text = match preprocess(&job.frame, job.bbox) {
        Ok(prepared) => read_prepared(&prepared, extractor),
        Err(err) => {
            warn!("OCR preprocessing failed: {err}");
            None
        }
    };

    match text {
        Some(text) => {
            metrics::counter!("guide_ocr_requests_total", "outcome" => "text").increment(1);
            debug!(chars = text.len(), "text extracted");
            vec![
                Outbound::tts(format!("Reading text: {text}")),
                Outbound::OcrResult { text },
            ]
        }
        None => {
            metrics::counter!("guide_ocr_requests_total", "outcome" => "empty").increment(1);
            vec![Outbound::tts(NO_TEXT)]
        }
    }
}

fn read_prepared(prepared: &Prepared, extractor: &dyn TextExtractor) -> Option<String> {
    for image in [&prepared.binary, &prepared.equalized] {
        match extractor.extract_text(image) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
            Err(err) => {
                warn!("OCR engine failed: {err}");
                return None;
            }
        }
    }
    None
}
