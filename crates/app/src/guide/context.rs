use std::sync::{Arc, Mutex};

use ml_core::{LabelMap, ObjectDetector, TextExtractor};
use video_ingest::CaptureBackend;

use crate::guide::{
    capture::CaptureController,
    config::GuideConfig,
    queue::{FrameQueue, LatestFrame},
    state::SharedState,
    watchdog::CaptureHealth,
};

/// Everything a connection needs, created once at startup.
#[derive(Clone)]
pub struct GuideContext {
    pub state: Arc<SharedState>,
    pub queue: Arc<FrameQueue>,
    pub latest: Arc<LatestFrame>,
    pub capture: Arc<CaptureController>,
    pub extractor: Arc<dyn TextExtractor>,
    pub health: Arc<CaptureHealth>,
}

impl GuideContext {
    pub fn new(
        config: Arc<GuideConfig>,
        backend: Arc<dyn CaptureBackend>,
        detector: Box<dyn ObjectDetector>,
        labels: LabelMap,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let state = Arc::new(SharedState::new(config.clone()));
        let queue = Arc::new(FrameQueue::new(config.queue_capacity));
        let latest = Arc::new(LatestFrame::default());
        let health = Arc::new(CaptureHealth::new());
        let capture = Arc::new(CaptureController::new(
            state.clone(),
            queue.clone(),
            latest.clone(),
            backend,
            Arc::new(Mutex::new(detector)),
            Arc::new(labels),
            health.clone(),
        ));
        Self {
            state,
            queue,
            latest,
            capture,
            extractor,
            health,
        }
    }
}
