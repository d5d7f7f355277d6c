//! Process-wide mutable state guarded by a single mutex.
//!
//! Every read-modify-write goes through [`SharedState::lock`] and must not
//! span a blocking call (inference, encode, OCR, socket I/O).

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use serde::Serialize;

use crate::guide::config::GuideConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Announce newly visible objects.
    #[default]
    Scan,
    /// Assist with one selected object.
    Guide,
}

/// Object fixed by `SELECT`. Only meaningful while the mode is GUIDE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSelection {
    pub label: String,
    pub bbox: [i32; 4],
}

/// Lifecycle of the capture loop. `Stopping` can be revived back to
/// `Running` until the capture thread observes it and moves to `Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePhase {
    #[default]
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Default)]
pub struct StateInner {
    pub(crate) mode: Mode,
    pub(crate) selection: Option<ActiveSelection>,
    /// Label → first-seen instant of the current visibility episode.
    pub(crate) visibility: HashMap<String, Instant>,
    /// Labels already announced in their current episode.
    pub(crate) announced: HashSet<String>,
    /// Label → last GUIDE-mode position notice.
    pub(crate) guidance: HashMap<String, Instant>,
    pub(crate) clients: usize,
    pub(crate) phase: CapturePhase,
    /// Bumped whenever the capture loop fails fatally.
    pub(crate) fault_seq: u64,
    pub(crate) fault: Option<String>,
    pub(crate) stalled: bool,
}

impl StateInner {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn selection(&self) -> Option<&ActiveSelection> {
        self.selection.as_ref()
    }

    pub fn clients(&self) -> usize {
        self.clients
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }
}

/// Point-in-time copy used by the status endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub mode: Mode,
    pub clients: usize,
    pub capture: CapturePhase,
    pub stalled: bool,
    pub fault: Option<String>,
}

pub struct SharedState {
    inner: Mutex<StateInner>,
    config: Arc<GuideConfig>,
}

impl SharedState {
    pub fn new(config: Arc<GuideConfig>) -> Self {
        Self {
            inner: Mutex::new(StateInner::default()),
            config,
        }
    }

    pub fn config(&self) -> &GuideConfig {
        &self.config
    }

    /// Lock the state. A poisoned lock is recovered; the data it guards is
    /// always left consistent between statements.
    pub fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn selection(&self) -> Option<ActiveSelection> {
        self.lock().selection.clone()
    }

    pub fn clients(&self) -> usize {
        self.lock().clients
    }

    pub fn capture_phase(&self) -> CapturePhase {
        self.lock().phase
    }

    pub fn is_visible(&self, label: &str) -> bool {
        self.lock().visibility.contains_key(label)
    }

    pub fn is_announced(&self, label: &str) -> bool {
        self.lock().announced.contains(label)
    }

    /// Record a fatal capture failure so sessions can tell their clients.
    pub(crate) fn record_fault(&self, message: impl Into<String>) {
        let mut inner = self.lock();
        inner.fault_seq = inner.fault_seq.wrapping_add(1);
        inner.fault = Some(message.into());
    }

    pub(crate) fn clear_fault(&self) {
        self.lock().fault = None;
    }

    /// Current fault generation and message, if any.
    pub(crate) fn fault(&self) -> (u64, Option<String>) {
        let inner = self.lock();
        (inner.fault_seq, inner.fault.clone())
    }

    pub(crate) fn set_stalled(&self, stalled: bool) -> bool {
        let mut inner = self.lock();
        let changed = inner.stalled != stalled;
        inner.stalled = stalled;
        changed
    }

    pub fn status(&self) -> StatusSnapshot {
        let inner = self.lock();
        StatusSnapshot {
            status: match inner.phase {
                CapturePhase::Running => "running",
                CapturePhase::Idle | CapturePhase::Stopping => "idle",
            },
            mode: inner.mode,
            clients: inner.clients,
            capture: inner.phase,
            stalled: inner.stalled,
            fault: inner.fault.clone(),
        }
    }
}
