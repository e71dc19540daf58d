use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    opened: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StreamCounters {
    pub(crate) fn record_opened(&self) {
        increment(&self.opened);
    }

    pub(crate) fn record_frame(&self) {
        increment(&self.frames_received);
    }

    pub(crate) fn record_dropped(&self) {
        increment(&self.frames_dropped);
    }

    pub(crate) fn record_reconnect(&self) {
        increment(&self.reconnects_scheduled);
    }

    pub(crate) fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StreamMetricsSnapshot {
    pub opened: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub reconnects_scheduled: u64,
}
