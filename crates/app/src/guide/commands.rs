//! Mode state machine and command dispatch.

use std::sync::Arc;

use tracing::info;

use crate::guide::{
    data::{Command, Detection, Outbound},
    ocr_gate::{self, OcrJob},
    queue::LatestFrame,
    state::{ActiveSelection, Mode, SharedState},
};

pub(crate) const NO_OBJECTS: &str = "No objects detected";
pub(crate) const SELECT_FIRST: &str = "Select an object first";
pub(crate) const CAMERA_NOT_READY: &str = "Camera not ready";

/// Replies to send right away plus an optional OCR job to run elsewhere.
#[derive(Debug, Default)]
pub struct CommandOutcome {
    pub replies: Vec<Outbound>,
    pub ocr: Option<OcrJob>,
}

impl CommandOutcome {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            replies: vec![Outbound::tts(text)],
            ocr: None,
        }
    }
}

#[derive(Clone)]
pub struct CommandHandler {
    state: Arc<SharedState>,
    latest: Arc<LatestFrame>,
}

impl CommandHandler {
    pub fn new(state: Arc<SharedState>, latest: Arc<LatestFrame>) -> Self {
        Self { state, latest }
    }

    pub fn handle(&self, command: Command) -> CommandOutcome {
        info!(?command, "command received");
        match command {
            Command::Scan => {
                let mut inner = self.state.lock();
                inner.mode = Mode::Scan;
                inner.selection = None;
                inner.guidance.clear();
                CommandOutcome::reply("Scan mode")
            }
            Command::Guide => {
                let mut inner = self.state.lock();
                inner.mode = Mode::Guide;
                inner.guidance.clear();
                CommandOutcome::reply("Guide mode")
            }
            Command::Select => self.select(),
            Command::Read => self.read(),
        }
    }

    fn select(&self) -> CommandOutcome {
        let Some(slot) = self.latest.get() else {
            return CommandOutcome::reply(NO_OBJECTS);
        };
        let Some(largest) = largest_detection(&slot.detections) else {
            return CommandOutcome::reply(NO_OBJECTS);
        };

        let mut inner = self.state.lock();
        inner.selection = Some(ActiveSelection {
            label: largest.label.clone(),
            bbox: largest.bbox,
        });
        inner.mode = Mode::Guide;
        CommandOutcome::reply(format!("{} selected", largest.label))
    }

    fn read(&self) -> CommandOutcome {
        let selection = {
            let inner = self.state.lock();
            match (inner.mode, inner.selection.clone()) {
                (Mode::Guide, Some(selection)) => selection,
                _ => return CommandOutcome::reply(SELECT_FIRST),
            }
        };
        let Some(slot) = self.latest.get() else {
            return CommandOutcome::reply(CAMERA_NOT_READY);
        };

        let config = self.state.config();
        let (reply, job) = ocr_gate::evaluate(
            Arc::clone(&slot.raw),
            selection.bbox,
            config.ocr_min_ratio,
            config.ocr_max_ratio,
        );
        CommandOutcome {
            replies: vec![reply],
            ocr: job,
        }
    }
}

/// Largest box by area; the first of equal areas wins.
pub fn largest_detection(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for detection in detections {
        if best.is_none_or(|current| detection.area() > current.area()) {
            best = Some(detection);
        }
    }
    best
}
