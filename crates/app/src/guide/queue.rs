//! Hand-off between the capture thread and connection sessions.
//!
//! [`FrameQueue`] is a bounded FIFO that never blocks the producer: pushing
//! into a full queue evicts the oldest slot. Consumers read with a cursor so
//! each connection sees slots in sequence order and several connections can
//! read the same slot. [`LatestFrame`] is a single overwrite-only cell that
//! `SELECT` and `READ` inspect.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use video_ingest::Frame;

use crate::guide::data::{Detection, FrameSlot};

struct QueueInner {
    slots: VecDeque<Arc<FrameSlot>>,
    next_seq: u64,
    evicted: u64,
}

pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

/// Result of a push: the stored slot and whether an older one was evicted.
pub struct Pushed {
    pub slot: Arc<FrameSlot>,
    pub evicted: bool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                slots: VecDeque::with_capacity(capacity),
                next_seq: 1,
                evicted: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, image: Arc<str>, detections: Arc<[Detection]>, raw: Arc<Frame>) -> Pushed {
        let mut inner = self.lock();
        let slot = Arc::new(FrameSlot {
            seq: inner.next_seq,
            image,
            detections,
            raw,
        });
        inner.next_seq += 1;

        let evicted = if inner.slots.len() >= self.capacity {
            inner.slots.pop_front();
            inner.evicted += 1;
            true
        } else {
            false
        };
        inner.slots.push_back(slot.clone());
        Pushed { slot, evicted }
    }

    /// Oldest slot newer than `cursor` (`None` = nothing consumed yet).
    pub fn next_after(&self, cursor: Option<u64>) -> Option<Arc<FrameSlot>> {
        let inner = self.lock();
        let after = cursor.unwrap_or(0);
        inner.slots.iter().find(|slot| slot.seq > after).cloned()
    }

    /// Drop buffered slots. Sequence numbers keep increasing afterwards.
    pub fn clear(&self) {
        self.lock().slots.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted_total(&self) -> u64 {
        self.lock().evicted
    }
}

/// Most recently produced slot.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Arc<FrameSlot>>>,
}

impl LatestFrame {
    pub fn store(&self, slot: Arc<FrameSlot>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(slot);
    }

    pub fn get(&self) -> Option<Arc<FrameSlot>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    fn raw() -> Arc<Frame> {
        Arc::new(Frame {
            data: Vec::new(),
            width: 4,
            height: 4,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        })
    }

    fn push(queue: &FrameQueue, tag: &str) -> Pushed {
        queue.push(Arc::from(tag), Vec::new().into(), raw())
    }

    #[test]
    fn full_queue_evicts_oldest_without_growing() {
        let queue = FrameQueue::new(3);
        for i in 0..3 {
            assert!(!push(&queue, &i.to_string()).evicted);
        }
        assert_eq!(queue.len(), 3);

        let pushed = push(&queue, "3");
        assert!(pushed.evicted);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted_total(), 1);

        let oldest = queue.next_after(None).expect("slot");
        assert_eq!(&*oldest.image, "1");
    }

    #[test]
    fn cursor_reads_are_monotonic_and_shared() {
        let queue = FrameQueue::new(4);
        push(&queue, "a");
        push(&queue, "b");

        let first = queue.next_after(None).expect("first");
        let second = queue.next_after(Some(first.seq)).expect("second");
        assert!(second.seq > first.seq);
        assert!(queue.next_after(Some(second.seq)).is_none());

        // another reader still sees the same slots
        assert_eq!(queue.next_after(None).expect("shared").seq, first.seq);
    }

    #[test]
    fn lagging_cursor_skips_evicted_slots() {
        let queue = FrameQueue::new(2);
        let first = push(&queue, "a").slot;
        push(&queue, "b");
        push(&queue, "c");
        push(&queue, "d");
        let next = queue.next_after(Some(first.seq)).expect("next");
        assert_eq!(&*next.image, "c");
    }

    #[test]
    fn sequence_continues_after_clear() {
        let queue = FrameQueue::new(2);
        let before = push(&queue, "a").slot.seq;
        queue.clear();
        assert!(queue.is_empty());
        let after = push(&queue, "b").slot.seq;
        assert!(after > before);
    }

    #[test]
    fn latest_frame_keeps_only_newest() {
        let queue = FrameQueue::new(2);
        let latest = LatestFrame::default();
        assert!(latest.get().is_none());
        latest.store(push(&queue, "a").slot);
        latest.store(push(&queue, "b").slot);
        assert_eq!(&*latest.get().expect("latest").image, "b");
        latest.clear();
        assert!(latest.get().is_none());
    }
}
