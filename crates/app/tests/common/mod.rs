#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use image::GrayImage;
use ml_core::{
    DetectorError, LabelMap, ObjectDetector, OcrError, RawDetection, TextExtractor,
};
use video_ingest::{CaptureBackend, CaptureDevice, CaptureError, Frame, FrameFormat};
use vision_guide::guide::{GuideConfig, GuideContext, SourceKind};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

/// Backend that counts opens and how many devices are alive at once.
#[derive(Default)]
pub struct CountingBackend {
    pub opens: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
    pub reads: Arc<AtomicUsize>,
    pub fail_open: bool,
    pub flaky_reads: bool,
}

impl CountingBackend {
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    /// Every third read fails and every third frame is truncated.
    pub fn flaky() -> Self {
        Self {
            flaky_reads: true,
            ..Default::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for CountingBackend {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(CaptureError::Open {
                uri: self.describe(),
            });
        }
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(BlankDevice {
            live: self.live.clone(),
            reads: self.reads.clone(),
            flaky: self.flaky_reads,
        }))
    }

    fn describe(&self) -> String {
        "counting test source".into()
    }
}

pub const FRAME_BYTES: usize = (WIDTH * HEIGHT * 3) as usize;

struct BlankDevice {
    live: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    flaky: bool,
}

impl CaptureDevice for BlankDevice {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        thread::sleep(Duration::from_millis(2));
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        let mut len = FRAME_BYTES;
        if self.flaky {
            match n % 3 {
                1 => {
                    return Err(CaptureError::Read {
                        uri: "counting test source".into(),
                    });
                }
                2 => len = 16,
                _ => {}
            }
        }
        Ok(Frame {
            data: vec![96; len],
            width: WIDTH,
            height: HEIGHT,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        })
    }
}

impl Drop for BlankDevice {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Detector returning whatever the test scripted, for every frame.
#[derive(Clone, Default)]
pub struct ScriptedDetector {
    pub script: Arc<Mutex<Vec<RawDetection>>>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            script: Arc::new(Mutex::new(detections)),
        }
    }

    pub fn set(&self, detections: Vec<RawDetection>) {
        *self.script.lock().unwrap() = detections;
    }
}

impl ObjectDetector for ScriptedDetector {
    fn infer(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
        Ok(self.script.lock().unwrap().clone())
    }
}

/// Wraps a [`ScriptedDetector`], failing every third call.
pub struct FlakyDetector {
    pub inner: ScriptedDetector,
    pub calls: Arc<AtomicUsize>,
    pub errors: Arc<AtomicUsize>,
}

impl FlakyDetector {
    pub fn new(inner: ScriptedDetector) -> Self {
        Self {
            inner,
            calls: Arc::default(),
            errors: Arc::default(),
        }
    }
}

impl ObjectDetector for FlakyDetector {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 3 == 2 {
            self.errors.fetch_add(1, Ordering::SeqCst);
            return Err(DetectorError::Inference("scripted failure".into()));
        }
        self.inner.infer(frame)
    }
}

pub struct FixedExtractor(pub String);

impl TextExtractor for FixedExtractor {
    fn extract_text(&self, _image: &GrayImage) -> Result<String, OcrError> {
        Ok(self.0.clone())
    }
}

pub fn raw(class_id: i64, bbox: [f32; 4]) -> RawDetection {
    RawDetection {
        class_id,
        confidence: 0.9,
        bbox,
    }
}

/// `book` on the right, `cup` (larger) on the left of a 320px frame.
pub fn desk_scene() -> Vec<RawDetection> {
    vec![raw(1, [20.0, 20.0, 150.0, 150.0]), raw(0, [200.0, 50.0, 240.0, 80.0])]
}

pub fn config() -> GuideConfig {
    GuideConfig {
        source: SourceKind::Synthetic,
        width: WIDTH,
        height: HEIGHT,
        confirmation_time: Duration::ZERO,
        annotate: false,
        ..GuideConfig::default()
    }
}

pub fn context(
    config: GuideConfig,
    backend: Arc<CountingBackend>,
    detector: ScriptedDetector,
    text: &str,
) -> GuideContext {
    context_with(config, backend, Box::new(detector), text)
}

pub fn context_with(
    config: GuideConfig,
    backend: Arc<CountingBackend>,
    detector: Box<dyn ObjectDetector>,
    text: &str,
) -> GuideContext {
    GuideContext::new(
        Arc::new(config),
        backend,
        detector,
        LabelMap::new(["book", "cup"]),
        Arc::new(FixedExtractor(text.to_string())),
    )
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
