//! Model-facing contracts for the guide pipeline.
//!
//! The pipeline only depends on [`ObjectDetector`] and [`TextExtractor`];
//! concrete backends are opt-in through cargo features (`with-tch`,
//! `with-ocrs`).

pub mod detector;
pub mod ocr;
#[cfg(feature = "with-tch")]
pub mod torch;

pub use detector::{DetectorError, LabelMap, ObjectDetector, RawDetection, non_max_suppression};
pub use ocr::{OcrError, TextExtractor};

#[cfg(feature = "with-tch")]
pub use tch;
