//! Configuration parsing for the guide server.
//!
//! CLI flags are translated into a `GuideConfig` once at startup. Every
//! component receives the same immutable `Arc<GuideConfig>`.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Args;

/// Frame source selected on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Camera index, `/dev/videoN` path, or stream URI opened through OpenCV.
    Device(String),
    /// Built-in moving gradient, no hardware needed.
    Synthetic,
}

impl SourceKind {
    pub(crate) fn from_uri(uri: &str) -> Self {
        if uri.eq_ignore_ascii_case("synthetic") {
            SourceKind::Synthetic
        } else {
            SourceKind::Device(uri.to_string())
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every component.
pub struct GuideConfig {
    pub source: SourceKind,
    /// TorchScript detector weights.
    pub model_path: Option<PathBuf>,
    /// Newline separated class names, index = class id.
    pub labels_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    /// Square detector input edge in pixels.
    pub detector_size: u32,
    pub use_cpu: bool,
    /// Detections below this confidence are discarded.
    pub confidence_threshold: f32,
    pub jpeg_quality: u8,
    /// Continuous visibility required before an object is announced.
    pub confirmation_time: Duration,
    /// Minimum spacing between GUIDE-mode position notices for one label.
    pub guidance_cooldown: Duration,
    pub ocr_min_ratio: f64,
    pub ocr_max_ratio: f64,
    pub queue_capacity: usize,
    pub annotate: bool,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing capture/session spans.
    pub chrome_trace_path: Option<PathBuf>,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Device("0".into()),
            model_path: None,
            labels_path: None,
            width: 640,
            height: 480,
            detector_size: 640,
            use_cpu: false,
            confidence_threshold: 0.5,
            jpeg_quality: 80,
            confirmation_time: Duration::from_secs_f64(1.0),
            guidance_cooldown: Duration::from_secs_f64(1.5),
            ocr_min_ratio: 0.20,
            ocr_max_ratio: 0.55,
            queue_capacity: 2,
            annotate: true,
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:5173".into(),
            ],
            verbose: false,
            telemetry: TelemetryOptions::default(),
        }
    }
}

/// CLI arguments for the guide server.
#[derive(Debug, Default, Args)]
pub struct GuideCliArgs {
    /// Camera index, device path, stream URI, or `synthetic`.
    #[arg(long = "source", value_name = "URI")]
    pub source: Option<String>,
    /// TorchScript detector weights.
    #[arg(long = "model", value_name = "PATH")]
    pub model_path: Option<PathBuf>,
    /// Class names file, one label per line.
    #[arg(long = "labels", value_name = "PATH")]
    pub labels_path: Option<PathBuf>,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX")]
    pub width: Option<u32>,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX")]
    pub height: Option<u32>,
    /// Detector input edge in pixels (multiple of 32).
    #[arg(long = "detector-size", value_name = "PX")]
    pub detector_size: Option<u32>,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Minimum detection confidence (0-1).
    #[arg(long = "confidence", value_name = "SCORE")]
    pub confidence: Option<f32>,
    /// JPEG quality used for streamed frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,
    /// Seconds an object must stay visible before it is announced.
    #[arg(long = "confirmation-secs", value_name = "SECS")]
    pub confirmation_secs: Option<f64>,
    /// Seconds between GUIDE-mode position notices.
    #[arg(long = "guidance-cooldown-secs", value_name = "SECS")]
    pub guidance_cooldown_secs: Option<f64>,
    /// Smallest box/frame area ratio accepted for reading.
    #[arg(long = "ocr-min-ratio", value_name = "RATIO")]
    pub ocr_min_ratio: Option<f64>,
    /// Largest box/frame area ratio accepted for reading.
    #[arg(long = "ocr-max-ratio", value_name = "RATIO")]
    pub ocr_max_ratio: Option<f64>,
    /// Frames buffered between capture and connections.
    #[arg(long = "queue-capacity", value_name = "N")]
    pub queue_capacity: Option<usize>,
    /// Stream raw frames without drawn boxes.
    #[arg(long = "no-annotate", action = clap::ArgAction::SetTrue)]
    pub no_annotate: bool,
    #[arg(long = "host", value_name = "ADDR")]
    pub host: Option<String>,
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,
    /// Allowed browser origin for the status endpoint (repeatable).
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    pub cors_origins: Vec<String>,
    /// Enable verbose logging (per-frame detections).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<GuideCliArgs> for GuideConfig {
    type Error = anyhow::Error;

    fn try_from(args: GuideCliArgs) -> Result<Self> {
        let defaults = GuideConfig::default();

        let width = args.width.unwrap_or(defaults.width);
        let height = args.height.unwrap_or(defaults.height);
        if width == 0 || height == 0 {
            bail!("Capture width and height must be positive integers");
        }

        let detector_size = args.detector_size.unwrap_or(defaults.detector_size);
        if detector_size == 0 || detector_size % 32 != 0 {
            bail!("--detector-size must be a positive multiple of 32");
        }

        let confidence_threshold = args.confidence.unwrap_or(defaults.confidence_threshold);
        if !(0.0..=1.0).contains(&confidence_threshold) {
            bail!("--confidence must be between 0 and 1");
        }

        let jpeg_quality = args.jpeg_quality.unwrap_or(defaults.jpeg_quality);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let confirmation_time = seconds(
            args.confirmation_secs,
            defaults.confirmation_time,
            "--confirmation-secs",
        )?;
        let guidance_cooldown = seconds(
            args.guidance_cooldown_secs,
            defaults.guidance_cooldown,
            "--guidance-cooldown-secs",
        )?;

        let ocr_min_ratio = args.ocr_min_ratio.unwrap_or(defaults.ocr_min_ratio);
        let ocr_max_ratio = args.ocr_max_ratio.unwrap_or(defaults.ocr_max_ratio);
        if !(0.0..=1.0).contains(&ocr_min_ratio) || !(0.0..=1.0).contains(&ocr_max_ratio) {
            bail!("OCR area ratios must be between 0 and 1");
        }
        if ocr_min_ratio > ocr_max_ratio {
            bail!("--ocr-min-ratio must not exceed --ocr-max-ratio");
        }

        let queue_capacity = args.queue_capacity.unwrap_or(defaults.queue_capacity);
        if queue_capacity == 0 {
            bail!("--queue-capacity must be at least 1");
        }

        let cors_origins = if args.cors_origins.is_empty() {
            defaults.cors_origins
        } else {
            args.cors_origins
        };

        Ok(Self {
            source: args
                .source
                .as_deref()
                .map(SourceKind::from_uri)
                .unwrap_or(defaults.source),
            model_path: args.model_path,
            labels_path: args.labels_path,
            width,
            height,
            detector_size,
            use_cpu: args.use_cpu,
            confidence_threshold,
            jpeg_quality,
            confirmation_time,
            guidance_cooldown,
            ocr_min_ratio,
            ocr_max_ratio,
            queue_capacity,
            annotate: !args.no_annotate,
            host: args.host.unwrap_or(defaults.host),
            port: args.port.unwrap_or(defaults.port),
            cors_origins,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

fn seconds(value: Option<f64>, default: Duration, flag: &str) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Duration::from_secs_f64(secs)),
        Some(_) => bail!("{flag} must be a non-negative number of seconds"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_args_yield_documented_defaults() {
        let config = GuideConfig::try_from(GuideCliArgs::default()).expect("defaults are valid");
        assert_eq!(config.source, SourceKind::Device("0".into()));
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.confirmation_time, Duration::from_secs(1));
        assert_eq!(config.queue_capacity, 2);
        assert_eq!((config.ocr_min_ratio, config.ocr_max_ratio), (0.20, 0.55));
        assert!(config.annotate);
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn synthetic_source_is_case_insensitive() {
        let config = GuideConfig::try_from(GuideCliArgs {
            source: Some("Synthetic".into()),
            ..Default::default()
        })
        .expect("valid");
        assert_eq!(config.source, SourceKind::Synthetic);
    }

    #[test]
    fn inverted_ocr_bounds_are_rejected() {
        let err = GuideConfig::try_from(GuideCliArgs {
            ocr_min_ratio: Some(0.6),
            ocr_max_ratio: Some(0.3),
            ..Default::default()
        })
        .expect_err("min above max");
        assert!(err.to_string().contains("--ocr-min-ratio"));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        assert!(
            GuideConfig::try_from(GuideCliArgs {
                queue_capacity: Some(0),
                ..Default::default()
            })
            .is_err()
        );
    }

    #[test]
    fn negative_confirmation_time_is_rejected() {
        assert!(
            GuideConfig::try_from(GuideCliArgs {
                confirmation_secs: Some(-1.0),
                ..Default::default()
            })
            .is_err()
        );
    }
}
