use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{error, info};

use crate::guide::{
    state::{CapturePhase, SharedState},
    telemetry::spawn_thread,
};

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
pub(crate) const WATCHDOG_STALE_THRESHOLD_MS: u64 = 3_000;

/// Heartbeat written by the capture thread once per cycle.
pub struct CaptureHealth {
    last_beat: AtomicU64,
}

impl CaptureHealth {
    pub fn new() -> Self {
        Self {
            last_beat: AtomicU64::new(current_millis()),
        }
    }

    pub fn beat(&self) {
        self.last_beat.store(current_millis(), Ordering::Relaxed);
    }

    pub(crate) fn is_stale(&self, now: u64) -> bool {
        now.saturating_sub(self.last_beat.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS
    }
}

impl Default for CaptureHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// One watchdog pass. Only a running capture loop can be stalled.
pub(crate) fn check(health: &CaptureHealth, state: &SharedState, now: u64) {
    let stalled = state.capture_phase() == CapturePhase::Running && health.is_stale(now);
    if state.set_stalled(stalled) {
        if stalled {
            error!(
                threshold_ms = WATCHDOG_STALE_THRESHOLD_MS,
                "Watchdog detected stalled capture loop"
            );
        } else {
            info!("Capture loop recovered");
        }
    }
}

pub(crate) fn spawn_watchdog(
    health: Arc<CaptureHealth>,
    state: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    spawn_thread("guide-watchdog", move || {
        while !shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
            check(&health, &state, current_millis());
        }
    })
    .expect("failed to spawn watchdog thread")
}

pub(crate) fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use image::GrayImage;
    use ml_core::{
        DetectorError, LabelMap, ObjectDetector, OcrError, RawDetection, TextExtractor,
    };
    use video_ingest::{CaptureBackend, CaptureDevice, CaptureError, Frame, SyntheticBackend};

    use super::*;
    use crate::guide::{config::GuideConfig, context::GuideContext};

    /// Camera that takes a while to come up.
    struct SlowOpen(SyntheticBackend);

    impl CaptureBackend for SlowOpen {
        fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            thread::sleep(Duration::from_millis(800));
            self.0.open()
        }

        fn describe(&self) -> String {
            "slow test source".into()
        }
    }

    struct Empty;

    impl ObjectDetector for Empty {
        fn infer(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
            Ok(Vec::new())
        }
    }

    impl TextExtractor for Empty {
        fn extract_text(&self, _image: &GrayImage) -> Result<String, OcrError> {
            Ok(String::new())
        }
    }

    #[test]
    fn stall_flag_follows_heartbeat_while_running() {
        let state = SharedState::new(Arc::new(GuideConfig::default()));
        let health = CaptureHealth::new();
        let later = current_millis() + WATCHDOG_STALE_THRESHOLD_MS + 1_000;

        check(&health, &state, later);
        assert!(!state.status().stalled, "idle capture is never stalled");

        state.lock().phase = CapturePhase::Running;
        check(&health, &state, later);
        assert!(state.status().stalled);

        health.beat();
        check(&health, &state, current_millis());
        assert!(!state.status().stalled);
    }

    #[test]
    fn fresh_start_after_long_idle_is_not_stalled() {
        let ctx = GuideContext::new(
            Arc::new(GuideConfig::default()),
            Arc::new(SlowOpen(SyntheticBackend::new(64, 48))),
            Box::new(Empty),
            LabelMap::new(["thing"]),
            Arc::new(Empty),
        );
        let long_ago = current_millis() - WATCHDOG_STALE_THRESHOLD_MS - 5_000;
        ctx.health.last_beat.store(long_ago, Ordering::Relaxed);

        let lease = ctx.capture.connect();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ctx.state.capture_phase(), CapturePhase::Running);
        check(&ctx.health, &ctx.state, current_millis());
        assert!(!ctx.state.status().stalled, "device still opening");

        drop(lease);
        ctx.capture.shutdown();
    }
}
