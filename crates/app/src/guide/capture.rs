//! Capture loop and its reference-counted lifecycle.
//!
//! One OS thread owns the capture device for as long as at least one client
//! is connected. The lifecycle is an explicit state machine stored in
//! [`SharedState`]:
//!
//! - `Idle → Running` on the first connection (spawns a fresh loop),
//! - `Running → Stopping` when the last client leaves,
//! - `Stopping → Running` when a client arrives before the loop noticed,
//! - `Stopping → Idle` performed by the loop itself right before it exits.
//!
//! Because only the loop moves `Stopping → Idle`, and a new loop is spawned
//! only from `Idle`, two loops never own the device at the same time.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ml_core::{LabelMap, ObjectDetector, RawDetection};
use tracing::{debug, error, info, info_span, warn};
use video_ingest::{CaptureBackend, CaptureDevice};

use crate::guide::{
    annotation,
    data::Detection,
    queue::{FrameQueue, LatestFrame},
    state::{CapturePhase, SharedState, StateInner},
    telemetry::spawn_thread,
    watchdog::CaptureHealth,
};

pub(crate) const CAMERA_UNAVAILABLE: &str = "Camera unavailable";
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);
const CYCLE_PACING: Duration = Duration::from_millis(10);
const SLOW_INFERENCE: Duration = Duration::from_secs(1);

/// Detector shared by successive capture loops; loaded once at startup.
pub type SharedDetector = Arc<Mutex<Box<dyn ObjectDetector>>>;

pub struct CaptureController {
    state: Arc<SharedState>,
    queue: Arc<FrameQueue>,
    latest: Arc<LatestFrame>,
    backend: Arc<dyn CaptureBackend>,
    detector: SharedDetector,
    labels: Arc<LabelMap>,
    health: Arc<CaptureHealth>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Registration of one connected client. Dropping it disconnects.
pub struct ClientLease {
    controller: Arc<CaptureController>,
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        self.controller.disconnect();
    }
}

impl CaptureController {
    pub fn new(
        state: Arc<SharedState>,
        queue: Arc<FrameQueue>,
        latest: Arc<LatestFrame>,
        backend: Arc<dyn CaptureBackend>,
        detector: SharedDetector,
        labels: Arc<LabelMap>,
        health: Arc<CaptureHealth>,
    ) -> Self {
        Self {
            state,
            queue,
            latest,
            backend,
            detector,
            labels,
            health,
            handle: Mutex::new(None),
        }
    }

    /// Register a client, starting the capture loop on the 0 → 1 transition.
    pub fn connect(self: &Arc<Self>) -> ClientLease {
        let start = {
            let mut inner = self.state.lock();
            inner.clients += 1;
            metrics::gauge!("guide_connected_clients").set(inner.clients as f64);
            match inner.phase {
                CapturePhase::Idle => {
                    // The last beat belongs to the previous run.
                    self.health.beat();
                    inner.phase = CapturePhase::Running;
                    true
                }
                CapturePhase::Stopping => {
                    debug!("reviving capture loop before it stopped");
                    inner.phase = CapturePhase::Running;
                    false
                }
                CapturePhase::Running => false,
            }
        };

        if start {
            self.state.clear_fault();
            self.spawn_loop();
        }

        ClientLease {
            controller: Arc::clone(self),
        }
    }

    fn disconnect(&self) {
        let mut inner = self.state.lock();
        inner.clients = inner.clients.saturating_sub(1);
        metrics::gauge!("guide_connected_clients").set(inner.clients as f64);
        if inner.clients == 0 && inner.phase == CapturePhase::Running {
            info!("last client left; stopping capture");
            inner.phase = CapturePhase::Stopping;
        }
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_loop(self: &Arc<Self>) {
        let mut slot = self.handle_slot();
        // The previous loop already moved to Idle; wait for it to release
        // the device before opening it again.
        if let Some(previous) = slot.take()
            && previous.join().is_err()
        {
            error!("previous capture loop panicked");
        }
        let controller = Arc::clone(self);
        let handle = spawn_thread("guide-capture", move || controller.run_loop())
            .expect("failed to spawn capture thread");
        *slot = Some(handle);
    }

    /// Stop the loop regardless of connected clients and wait for it.
    pub fn shutdown(&self) {
        {
            let mut inner = self.state.lock();
            if inner.phase == CapturePhase::Running {
                inner.phase = CapturePhase::Stopping;
            }
        }
        if let Some(handle) = self.handle_slot().take()
            && handle.join().is_err()
        {
            error!("capture loop panicked");
        }
    }

    /// Continue while Running; otherwise go idle.
    fn keep_running(&self) -> bool {
        let mut inner = self.state.lock();
        if inner.phase == CapturePhase::Running {
            return true;
        }
        self.go_idle(&mut inner);
        false
    }

    /// Clear the hand-off buffers and move to Idle while the state lock is
    /// held, so a loop started afterwards never sees stale frames.
    fn go_idle(&self, inner: &mut StateInner) {
        self.queue.clear();
        self.latest.clear();
        inner.phase = CapturePhase::Idle;
    }

    fn run_loop(&self) {
        let span = info_span!("guide.capture", source = %self.backend.describe());
        let _guard = span.enter();

        let device = match self.backend.open() {
            Ok(device) => device,
            Err(err) => {
                error!("Failed to open capture device: {err}");
                self.state.record_fault(CAMERA_UNAVAILABLE);
                self.go_idle(&mut self.state.lock());
                return;
            }
        };
        info!("capture started");
        self.drive(device);
        info!("capture stopped");
    }

    fn drive(&self, mut device: Box<dyn CaptureDevice>) {
        let config = self.state.config();
        while self.keep_running() {
            self.health.beat();

            let frame = match device.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Frame read failed: {err}");
                    metrics::counter!("guide_capture_read_failures_total").increment(1);
                    thread::sleep(READ_RETRY_DELAY);
                    continue;
                }
            };
            metrics::counter!("guide_capture_frames_total").increment(1);

            let started = Instant::now();
            let raw = {
                let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
                detector.infer(&frame)
            };
            let elapsed = started.elapsed();
            metrics::histogram!("guide_inference_seconds").record(elapsed.as_secs_f64());
            if elapsed > SLOW_INFERENCE {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "slow inference");
            }
            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("Inference failed, skipping frame: {err}");
                    continue;
                }
            };

            let detections = label_detections(
                raw,
                &self.labels,
                config.confidence_threshold,
                frame.width,
                frame.height,
            );
            if config.verbose && !detections.is_empty() {
                let names: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
                debug!(?names, "detections");
            }

            let current: HashSet<String> = detections.iter().map(|d| d.label.clone()).collect();
            self.state.update_visibility(&current, Instant::now());

            let jpeg = match annotation::render_jpeg(
                &frame,
                &detections,
                config.annotate,
                config.jpeg_quality,
            ) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("Frame encode failed: {err}");
                    metrics::counter!("guide_encode_failures_total").increment(1);
                    continue;
                }
            };

            let image: Arc<str> = BASE64.encode(jpeg).into();
            let pushed = self
                .queue
                .push(image, detections.into(), Arc::new(frame));
            if pushed.evicted {
                metrics::counter!("guide_capture_dropped_slots_total").increment(1);
            }
            self.latest.store(pushed.slot);

            thread::sleep(CYCLE_PACING);
        }
    }
}

/// Drop low-confidence results, resolve labels, and clamp boxes to the frame.
pub fn label_detections(
    raw: Vec<RawDetection>,
    labels: &LabelMap,
    threshold: f32,
    width: u32,
    height: u32,
) -> Vec<Detection> {
    let max_x = width as f32;
    let max_y = height as f32;
    raw.into_iter()
        .filter(|det| det.confidence >= threshold)
        .map(|det| {
            let [x1, y1, x2, y2] = det.bbox;
            Detection {
                label: labels.label(det.class_id),
                confidence: det.confidence,
                bbox: [
                    x1.clamp(0.0, max_x).round() as i32,
                    y1.clamp(0.0, max_y).round() as i32,
                    x2.clamp(0.0, max_x).round() as i32,
                    y2.clamp(0.0, max_y).round() as i32,
                ],
                class_id: det.class_id,
            }
        })
        .collect()
}
