use std::{collections::HashMap, fs, path::Path};

use thiserror::Error;
use video_ingest::Frame;

/// Single detection in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: i64,
    pub confidence: f32,
    /// `[x_min, y_min, x_max, y_max]`.
    pub bbox: [f32; 4],
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load detector model from {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("unsupported frame: {0}")]
    Frame(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Runs object detection on a captured frame.
///
/// Implementations return every candidate they produce; confidence filtering
/// against the configured threshold happens in the capture loop.
pub trait ObjectDetector: Send {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError>;
}

/// Class id to label lookup supplied at startup.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    names: HashMap<i64, String>,
}

impl LabelMap {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .enumerate()
                .map(|(idx, name)| (idx as i64, name.into()))
                .collect(),
        }
    }

    /// Load one class name per line. Blank lines are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Ok(Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        ))
    }

    pub fn label(&self, class_id: i64) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Greedy per-class non-maximum suppression. Keeps the highest scoring box
/// and drops any same-class box overlapping it above `iou_threshold`.
pub fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(&kept.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x0 = a[0].max(b[0]);
    let y0 = a[1].max(b[1]);
    let x1 = a[2].min(b[2]);
    let y1 = a[3].min(b[3]);
    let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: i64, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox,
        }
    }

    #[test]
    fn unknown_class_ids_get_a_placeholder_label() {
        let labels = LabelMap::new(["bottle", "box"]);
        assert_eq!(labels.label(1), "box");
        assert_eq!(labels.label(7), "class_7");
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn suppression_keeps_best_box_per_class() {
        let kept = non_max_suppression(
            vec![
                det(0, 0.6, [0.0, 0.0, 10.0, 10.0]),
                det(0, 0.9, [1.0, 1.0, 11.0, 11.0]),
                det(1, 0.5, [1.0, 1.0, 11.0, 11.0]),
                det(0, 0.7, [50.0, 50.0, 60.0, 60.0]),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert!(kept.iter().any(|d| d.class_id == 1));
        assert!(kept.iter().all(|d| d.confidence != 0.6));
    }
}
