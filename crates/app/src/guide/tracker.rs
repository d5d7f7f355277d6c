//! Per-label visibility episodes and the notices derived from them.

use std::{collections::HashSet, fmt, time::Instant};

use tracing::debug;

use crate::guide::{
    data::Detection,
    state::{Mode, SharedState},
};

/// Horizontal third of the frame an object sits in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    Left,
    Center,
    Right,
}

impl Position {
    /// `< w/3` is left, `> 2w/3` is right, everything else (boundaries
    /// included) is center.
    pub fn classify(center_x: f64, frame_width: u32) -> Self {
        let width = f64::from(frame_width);
        if center_x < width / 3.0 {
            Position::Left
        } else if center_x > 2.0 * width / 3.0 {
            Position::Right
        } else {
            Position::Center
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Center => "center",
            Position::Right => "right",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SharedState {
    /// Fold one cycle's label set into the visibility record.
    ///
    /// New labels start an episode at `now`; labels missing from `current`
    /// end their episode and are re-armed for announcement.
    pub fn update_visibility(&self, current: &HashSet<String>, now: Instant) {
        let mut inner = self.lock();
        for label in current {
            inner.visibility.entry(label.clone()).or_insert(now);
        }
        let inner = &mut *inner;
        let announced = &mut inner.announced;
        inner.visibility.retain(|label, _| {
            let keep = current.contains(label);
            if !keep {
                announced.remove(label);
            }
            keep
        });
    }

    /// SCAN-mode announcements due at `now` for the given frame.
    ///
    /// Labels are visited in detection order; each label is announced at most
    /// once per episode process-wide.
    pub fn take_announcements(
        &self,
        detections: &[Detection],
        frame_width: u32,
        now: Instant,
    ) -> Vec<String> {
        let confirmation = self.config().confirmation_time;
        let mut inner = self.lock();
        if inner.mode != Mode::Scan {
            return Vec::new();
        }

        let mut notices = Vec::new();
        for detection in detections {
            let label = detection.label.as_str();
            if inner.announced.contains(label) {
                continue;
            }
            let Some(first_seen) = inner.visibility.get(label) else {
                continue;
            };
            if now.saturating_duration_since(*first_seen) < confirmation {
                continue;
            }
            let position = Position::classify(detection.center_x(), frame_width);
            inner.announced.insert(label.to_string());
            notices.push(format!("Detected {label} on the {position}"));
        }
        if !notices.is_empty() {
            metrics::counter!("guide_announcements_total").increment(notices.len() as u64);
            debug!(count = notices.len(), "announcing objects");
        }
        notices
    }

    /// GUIDE-mode position notice for the selected label, rate-limited per
    /// label by the guidance cooldown.
    ///
    /// Supplements the per-frame sequence (announcements, then one frame):
    /// sessions send this notice between the two, and only in GUIDE mode.
    pub fn take_guidance(
        &self,
        detections: &[Detection],
        frame_width: u32,
        now: Instant,
    ) -> Option<String> {
        let cooldown = self.config().guidance_cooldown;
        let mut inner = self.lock();
        if inner.mode != Mode::Guide {
            return None;
        }
        let label = inner.selection.as_ref()?.label.clone();
        let detection = detections.iter().find(|d| d.label == label)?;
        if let Some(last) = inner.guidance.get(&label)
            && now.saturating_duration_since(*last) < cooldown
        {
            return None;
        }
        inner.guidance.insert(label.clone(), now);
        let position = Position::classify(detection.center_x(), frame_width);
        Some(format!("{label} is on the {position}"))
    }
}
