//! Startup wiring: telemetry, backends, capture controller, watchdog, and the
//! HTTP server, torn down again on Ctrl+C.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, bail};
use image::GrayImage;
use ml_core::{
    DetectorError, LabelMap, ObjectDetector, OcrError, RawDetection, TextExtractor,
};
use tracing::{info, info_span, warn};
use video_ingest::{CaptureBackend, Frame, SyntheticBackend};

use crate::guide::{
    config::{GuideConfig, SourceKind},
    context::GuideContext,
    server::spawn_server,
    telemetry,
    watchdog::spawn_watchdog,
};

/// Run the guide server until Ctrl+C.
pub fn run(config: GuideConfig) -> Result<()> {
    let _telemetry_guard = telemetry::install(&config.telemetry, config.verbose)?;
    let _ = telemetry::init_metrics_recorder();

    let span = info_span!(
        "guide.server",
        source = ?config.source,
        width = config.width,
        height = config.height,
        port = config.port
    );
    let _span_guard = span.enter();

    let config = Arc::new(config);
    let backend = build_backend(&config)?;
    let detector = build_detector(&config)?;
    let labels = match config.labels_path.as_deref() {
        Some(path) => LabelMap::from_file(path)
            .with_context(|| format!("Failed to read labels from {}", path.display()))?,
        None => {
            warn!("No --labels file given; classes will be reported by id");
            LabelMap::new(Vec::<String>::new())
        }
    };
    info!(classes = labels.len(), "labels loaded");
    let extractor = build_extractor();

    let ctx = GuideContext::new(config, backend, detector, labels, extractor);

    let shutdown = Arc::new(AtomicBool::new(false));
    let watchdog = spawn_watchdog(ctx.health.clone(), ctx.state.clone(), shutdown.clone());
    let server = spawn_server(ctx.clone())?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let _ = stop_rx.recv();
    info!("Shutting down");

    server.stop();
    ctx.capture.shutdown();
    shutdown.store(true, Ordering::SeqCst);
    let _ = watchdog.join();
    Ok(())
}

fn build_backend(config: &GuideConfig) -> Result<Arc<dyn CaptureBackend>> {
    match &config.source {
        SourceKind::Synthetic => Ok(Arc::new(SyntheticBackend::new(config.width, config.height))),
        #[cfg(feature = "with-opencv")]
        SourceKind::Device(uri) => Ok(Arc::new(video_ingest::OpenCvBackend::new(
            uri.clone(),
            (config.width, config.height),
        ))),
        #[cfg(not(feature = "with-opencv"))]
        SourceKind::Device(uri) => {
            bail!("Capture source {uri} needs a build with the `with-opencv` feature")
        }
    }
}

#[cfg(feature = "with-tch")]
fn build_detector(config: &GuideConfig) -> Result<Box<dyn ObjectDetector>> {
    use ml_core::{tch::Device, torch::TorchDetector};

    let Some(model_path) = config.model_path.as_deref() else {
        bail!("--model is required");
    };
    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    let size = i64::from(config.detector_size);
    let detector = TorchDetector::new(model_path, device, (size, size))
        .with_context(|| format!("Failed to load detector from {}", model_path.display()))?;
    info!(device = ?detector.device(), "detector loaded");
    Ok(Box::new(detector))
}

#[cfg(not(feature = "with-tch"))]
fn build_detector(config: &GuideConfig) -> Result<Box<dyn ObjectDetector>> {
    if config.model_path.is_some() {
        bail!("--model needs a build with the `with-tch` feature");
    }
    warn!("Built without `with-tch`; frames are streamed without detections");
    Ok(Box::new(NoDetector))
}

#[cfg(feature = "with-ocrs")]
fn build_extractor() -> Arc<dyn TextExtractor> {
    match ml_core::ocr::OcrsExtractor::from_default_cache() {
        Ok(extractor) => Arc::new(extractor),
        Err(err) => {
            warn!("OCR disabled: {err}");
            Arc::new(NoExtractor)
        }
    }
}

#[cfg(not(feature = "with-ocrs"))]
fn build_extractor() -> Arc<dyn TextExtractor> {
    warn!("Built without `with-ocrs`; READ will report no text");
    Arc::new(NoExtractor)
}

/// Detector used when no model backend is compiled in.
#[cfg_attr(feature = "with-tch", allow(dead_code))]
struct NoDetector;

impl ObjectDetector for NoDetector {
    fn infer(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
        Ok(Vec::new())
    }
}

struct NoExtractor;

impl TextExtractor for NoExtractor {
    fn extract_text(&self, _image: &GrayImage) -> Result<String, OcrError> {
        Err(OcrError::Models("no OCR backend available".into()))
    }
}
