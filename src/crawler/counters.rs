//! Shared work counters
//!
//! These are the only state shared between the orchestrator and the fetch
//! workers besides the queues. Every field is an atomic exposing increment
//! and compare operations; nothing is ever set directly.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-phase accounting of work items
///
/// The balance rule is `fed == parsed + dropped`: every item put on the input
/// queue ends up either parsed or dropped. Requeues are not new work.
#[derive(Debug, Default)]
pub struct WorkCounters {
    fed: AtomicUsize,
    parsed: AtomicUsize,
    dropped: AtomicUsize,
    requeued: AtomicUsize,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub fed: usize,
    pub parsed: usize,
    pub dropped: usize,
    pub requeued: usize,
    pub queued: usize,
    pub in_flight: usize,
}

impl WorkCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new item was put on the input queue
    pub fn record_fed(&self) {
        self.fed.fetch_add(1, Ordering::SeqCst);
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// A worker took an item off the queue and is about to fetch it
    pub fn record_dequeued(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        saturating_dec(&self.queued);
    }

    /// A worker is done with the fetch, whatever the outcome
    pub fn finish_fetch(&self) {
        saturating_dec(&self.in_flight);
    }

    /// An item went back on the queue after a transient failure
    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::SeqCst);
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// An item was given up on, so completion does not wait for it
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    /// An item was dropped without ever leaving the queue
    pub fn record_discarded(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        saturating_dec(&self.queued);
    }

    /// A payload was extracted and routed
    pub fn record_parsed(&self) {
        self.parsed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fed(&self) -> usize {
        self.fed.load(Ordering::SeqCst)
    }

    pub fn parsed(&self) -> usize {
        self.parsed.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of fed items not yet parsed or dropped
    pub fn outstanding(&self) -> usize {
        let settled = self.parsed() + self.dropped();
        self.fed().saturating_sub(settled)
    }

    /// Returns true when every fed item was parsed or dropped
    pub fn is_balanced(&self) -> bool {
        self.fed() == self.parsed() + self.dropped()
    }

    /// Returns true if there is room below `watermark` for another item
    pub fn below_watermark(&self, watermark: usize) -> bool {
        self.outstanding() < watermark
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            fed: self.fed(),
            parsed: self.parsed(),
            dropped: self.dropped(),
            requeued: self.requeued.load(Ordering::SeqCst),
            queued: self.queued(),
            in_flight: self.in_flight(),
        }
    }
}

fn saturating_dec(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

/// Running latency totals
///
/// Only totals are stored; the mean is computed on read.
#[derive(Debug, Default)]
pub struct LatencyStats {
    total_micros: AtomicU64,
    samples: AtomicU64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Mean latency, or zero when nothing was recorded
    pub fn mean(&self) -> Duration {
        let samples = self.samples();
        if samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_micros.load(Ordering::Relaxed) / samples)
    }
}

/// Count of live tasks of one kind (fetch workers, sink consumers)
#[derive(Debug, Clone, Default)]
pub struct LiveTasks {
    count: Arc<AtomicUsize>,
}

impl LiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task; it stays counted until the guard is dropped
    ///
    /// Take the guard before spawning and move it into the task, so the
    /// count never misses a task that has not been polled yet.
    pub fn enter(&self) -> LiveGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        LiveGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Decrements its `LiveTasks` count on drop
#[derive(Debug)]
pub struct LiveGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}
