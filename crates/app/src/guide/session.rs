//! Transport-independent half of a connection loop.
//!
//! The WebSocket handler owns the socket and the timers; a [`Session`] owns
//! everything else: the client lease, the frame cursor, the FPS window, and
//! command dispatch. Every method is non-blocking.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tracing::warn;

use crate::guide::{
    capture::ClientLease,
    commands::{CommandHandler, CommandOutcome},
    context::GuideContext,
    data::{FrameMessage, Inbound, Outbound},
};

const FPS_WINDOW: usize = 30;

/// Rolling delivery rate over the most recent frame intervals.
#[derive(Debug, Default)]
pub struct FpsMeter {
    last: Option<Instant>,
    intervals: VecDeque<Duration>,
}

impl FpsMeter {
    /// Record a delivery and return the rate to report with it.
    pub fn tick(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last.replace(now) {
            if self.intervals.len() == FPS_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now.saturating_duration_since(last));
        }
        self.fps()
    }

    pub fn fps(&self) -> f64 {
        let total: f64 = self.intervals.iter().map(Duration::as_secs_f64).sum();
        if total > 0.0 {
            self.intervals.len() as f64 / total
        } else {
            0.0
        }
    }
}

pub struct Session {
    id: u64,
    ctx: GuideContext,
    handler: CommandHandler,
    cursor: Option<u64>,
    fps: FpsMeter,
    fault_seen: u64,
    _lease: ClientLease,
}

impl Session {
    /// Register the client (starting capture if needed) and open a session.
    pub fn open(ctx: &GuideContext, id: u64) -> Self {
        // Read the fault generation before connecting so a failure of the
        // loop this connection starts is still reported.
        let (fault_seen, _) = ctx.state.fault();
        let lease = ctx.capture.connect();
        Self {
            id,
            ctx: ctx.clone(),
            handler: CommandHandler::new(ctx.state.clone(), ctx.latest.clone()),
            cursor: None,
            fps: FpsMeter::default(),
            fault_seen,
            _lease: lease,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next undelivered frame with the notices that precede it, or `None`
    /// when this session is caught up.
    pub fn poll_frame(&mut self, now: Instant) -> Option<Vec<Outbound>> {
        let slot = self.ctx.queue.next_after(self.cursor)?;
        self.cursor = Some(slot.seq);

        let state = &self.ctx.state;
        let width = slot.raw.width;
        let mut messages: Vec<Outbound> = state
            .take_announcements(&slot.detections, width, now)
            .into_iter()
            .map(Outbound::tts)
            .collect();
        if let Some(notice) = state.take_guidance(&slot.detections, width, now) {
            messages.push(Outbound::tts(notice));
        }

        let (mode, selection) = {
            let inner = state.lock();
            (inner.mode(), inner.selection().cloned())
        };
        messages.push(Outbound::Frame(FrameMessage {
            image: slot.image.clone(),
            detections: slot.detections.clone(),
            mode,
            active_object: selection.as_ref().map(|s| s.label.clone()),
            active_bbox: selection.map(|s| s.bbox),
            fps: self.fps.tick(now),
        }));
        Some(messages)
    }

    /// Capture faults raised since the last poll.
    pub fn poll_notices(&mut self) -> Vec<Outbound> {
        let (seq, message) = self.ctx.state.fault();
        if seq == self.fault_seen {
            return Vec::new();
        }
        self.fault_seen = seq;
        message.map(Outbound::tts).into_iter().collect()
    }

    /// Dispatch one inbound text message. Malformed input is logged and
    /// produces no reply.
    pub fn handle_text(&self, text: &str) -> CommandOutcome {
        match Inbound::parse(text) {
            Ok(Inbound::Command { command }) => self.handler.handle(command),
            Err(err) => {
                warn!(session = self.id, "ignoring message: {err}");
                CommandOutcome::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_reports_zero_fps() {
        let mut meter = FpsMeter::default();
        assert_eq!(meter.tick(Instant::now()), 0.0);
    }

    #[test]
    fn steady_intervals_give_their_rate() {
        let mut meter = FpsMeter::default();
        let start = Instant::now();
        let mut fps = 0.0;
        for i in 0..10 {
            fps = meter.tick(start + Duration::from_millis(100 * i));
        }
        assert!((fps - 10.0).abs() < 1e-6, "got {fps}");
    }

    #[test]
    fn window_keeps_only_recent_intervals() {
        let mut meter = FpsMeter::default();
        let mut now = Instant::now();
        meter.tick(now);
        for _ in 0..FPS_WINDOW {
            now += Duration::from_secs(1);
            meter.tick(now);
        }
        for _ in 0..FPS_WINDOW {
            now += Duration::from_millis(50);
            meter.tick(now);
        }
        assert_eq!(meter.intervals.len(), FPS_WINDOW);
        assert!((meter.fps() - 20.0).abs() < 1e-6);
    }
}
