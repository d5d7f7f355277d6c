//! Text extraction contract and the `ocrs` backend.

use image::GrayImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR models not available: {0}")]
    Models(String),
    #[error("OCR engine failed: {0}")]
    Engine(String),
}

/// Extracts text from a preprocessed image region.
///
/// An empty string means no text was found and is not an error.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, image: &GrayImage) -> Result<String, OcrError>;
}

#[cfg(feature = "with-ocrs")]
pub use engine::OcrsExtractor;

#[cfg(feature = "with-ocrs")]
mod engine {
    use std::path::{Path, PathBuf};

    use image::{DynamicImage, GrayImage};
    use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
    use rten::Model;

    use super::{OcrError, TextExtractor};

    /// `ocrs` engine with detection and recognition models loaded from disk.
    pub struct OcrsExtractor {
        engine: OcrEngine,
    }

    impl OcrsExtractor {
        /// Load models from `~/.cache/ocrs`, where `ocrs-cli` stores them.
        pub fn from_default_cache() -> Result<Self, OcrError> {
            let home_dir = std::env::var("HOME")
                .or_else(|_| std::env::var("USERPROFILE"))
                .map_err(|_| OcrError::Models("HOME is not set".into()))?;
            Self::from_dir(Path::new(&home_dir).join(".cache/ocrs"))
        }

        pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self, OcrError> {
            let dir = dir.into();
            let detection_model_path = dir.join("text-detection.rten");
            let recognition_model_path = dir.join("text-recognition.rten");
            if !detection_model_path.exists() || !recognition_model_path.exists() {
                return Err(OcrError::Models(format!(
                    "expected {} and {}",
                    detection_model_path.display(),
                    recognition_model_path.display()
                )));
            }

            let detection_model = Model::load_file(&detection_model_path)
                .map_err(|err| OcrError::Models(err.to_string()))?;
            let recognition_model = Model::load_file(&recognition_model_path)
                .map_err(|err| OcrError::Models(err.to_string()))?;

            let engine = OcrEngine::new(OcrEngineParams {
                detection_model: Some(detection_model),
                recognition_model: Some(recognition_model),
                ..Default::default()
            })
            .map_err(|err| OcrError::Models(err.to_string()))?;

            Ok(Self { engine })
        }
    }

    impl TextExtractor for OcrsExtractor {
        fn extract_text(&self, image: &GrayImage) -> Result<String, OcrError> {
            let rgb = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
            let source = ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions())
                .map_err(|err| OcrError::Engine(err.to_string()))?;
            let input = self
                .engine
                .prepare_input(source)
                .map_err(|err| OcrError::Engine(err.to_string()))?;
            let text = self
                .engine
                .get_text(&input)
                .map_err(|err| OcrError::Engine(err.to_string()))?;
            Ok(text.trim().to_string())
        }
    }
}
