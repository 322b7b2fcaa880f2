//! Fetch worker pool
//!
//! One pool is spawned per phase iteration with a fixed number of workers.
//! Workers share a single input queue and push successful payloads onto the
//! orchestrator's parse queue. A pool is torn down by sending one stop
//! sentinel per worker and joining every worker.

use crate::crawler::counters::{LatencyStats, LiveGuard, LiveTasks, WorkCounters};
use crate::crawler::fetcher::{FetchError, FetchFailure, Fetcher};
use crate::work::{Payload, WorkItem};
use crate::{Result, TideError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Message on a pool's input queue
#[derive(Debug)]
pub enum Job {
    Fetch(WorkItem),
    Stop,
}

/// A successful fetch, tagged with the phase whose pool produced it
#[derive(Debug)]
pub struct Fetched {
    pub phase: usize,
    pub item: WorkItem,
    pub payload: Payload,
    pub latency: Duration,
}

/// Per-pool fetch policy
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Pause before every request, and after requeueing on a connection error
    pub delay: Duration,

    /// Upper bound on a single fetch
    pub request_timeout: Duration,

    /// Transient failures tolerated per item before it is dropped
    pub max_retries: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

struct WorkerContext<F> {
    phase: usize,
    fetcher: Arc<F>,
    settings: WorkerSettings,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    requeue: mpsc::UnboundedSender<Job>,
    results: mpsc::Sender<Fetched>,
    counters: Arc<WorkCounters>,
    latency: Arc<LatencyStats>,
    aborted: Arc<AtomicBool>,
}

/// Fixed-size pool of fetch workers for one phase
pub struct WorkerPool {
    phase: usize,
    jobs_tx: mpsc::UnboundedSender<Job>,
    jobs_rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<WorkCounters>,
    aborted: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `size` workers for `phase`
    ///
    /// # Arguments
    ///
    /// * `phase` - Index of the phase, stamped on every result
    /// * `size` - Number of workers, at least one
    /// * `fetcher` - Shared fetcher
    /// * `settings` - Delay, timeout and retry budget
    /// * `results` - Parse queue
    /// * `counters` - Work counters of this phase
    /// * `latency` - Fetch latency totals
    /// * `live` - Live worker registry
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<F: Fetcher>(
        phase: usize,
        size: usize,
        fetcher: Arc<F>,
        settings: WorkerSettings,
        results: mpsc::Sender<Fetched>,
        counters: Arc<WorkCounters>,
        latency: Arc<LatencyStats>,
        live: &LiveTasks,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let aborted = Arc::new(AtomicBool::new(false));

        let context = Arc::new(WorkerContext {
            phase,
            fetcher,
            settings,
            jobs: Arc::clone(&jobs_rx),
            requeue: jobs_tx.clone(),
            results,
            counters: Arc::clone(&counters),
            latency,
            aborted: Arc::clone(&aborted),
        });

        let size = size.max(1);
        let handles = (0..size)
            .map(|id| {
                let guard = live.enter();
                tokio::spawn(run_worker(id, Arc::clone(&context), guard))
            })
            .collect();

        tracing::debug!(phase, "Spawned {} fetch workers", size);

        Self {
            phase,
            jobs_tx,
            jobs_rx,
            handles,
            counters,
            aborted,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Puts a new item on the input queue and counts it as fed
    pub fn submit(&self, item: WorkItem) -> Result<()> {
        self.counters.record_fed();
        self.jobs_tx.send(Job::Fetch(item)).map_err(|_| {
            self.counters.record_discarded();
            TideError::QueueClosed { phase: self.phase }
        })
    }

    /// Makes workers discard queued items instead of fetching them
    ///
    /// Fetches already in flight still complete.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Stops every worker and waits for all of them
    ///
    /// Items still queued behind the stop sentinels are counted as dropped.
    pub async fn shutdown(mut self) {
        let handles = std::mem::take(&mut self.handles);
        for _ in 0..handles.len() {
            // Workers hold a sender, so the queue cannot be closed here
            let _ = self.jobs_tx.send(Job::Stop);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(phase = self.phase, "Fetch worker panicked: {}", e);
            }
        }

        let mut jobs = self.jobs_rx.lock().await;
        let mut leftover = 0usize;
        while let Ok(job) = jobs.try_recv() {
            if let Job::Fetch(_) = job {
                self.counters.record_discarded();
                leftover += 1;
            }
        }
        if leftover > 0 {
            tracing::warn!(phase = self.phase, "Discarded {} queued items at shutdown", leftover);
        }
        tracing::debug!(phase = self.phase, "Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn run_worker<F: Fetcher>(id: usize, ctx: Arc<WorkerContext<F>>, _guard: LiveGuard) {
    loop {
        let job = {
            let mut jobs = ctx.jobs.lock().await;
            jobs.recv().await
        };

        let item = match job {
            Some(Job::Fetch(item)) => item,
            Some(Job::Stop) | None => break,
        };

        if ctx.aborted.load(Ordering::SeqCst) {
            tracing::debug!(phase = ctx.phase, "Discarding {} (phase aborted)", item.target);
            ctx.counters.record_discarded();
            continue;
        }

        ctx.counters.record_dequeued();
        process_item(&ctx, item).await;
        ctx.counters.finish_fetch();
    }

    tracing::trace!(phase = ctx.phase, worker = id, "Fetch worker stopped");
}

async fn process_item<F: Fetcher>(ctx: &WorkerContext<F>, item: WorkItem) {
    if !ctx.settings.delay.is_zero() {
        tokio::time::sleep(ctx.settings.delay).await;
    }

    let started = Instant::now();
    let outcome = match tokio::time::timeout(ctx.settings.request_timeout, ctx.fetcher.fetch(&item)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            target: item.target.clone(),
        }),
    };

    match outcome {
        Ok(payload) => {
            let latency = started.elapsed();
            ctx.latency.record(latency);
            let fetched = Fetched {
                phase: ctx.phase,
                item,
                payload,
                latency,
            };
            if let Err(e) = ctx.results.send(fetched).await {
                tracing::debug!(phase = ctx.phase, "Parse queue closed, dropping {}", e.0.item.target);
                ctx.counters.record_dropped();
            }
        }
        Err(error) => match error.failure() {
            FetchFailure::Timeout => {
                tracing::debug!(phase = ctx.phase, "{}", error);
                retry_or_drop(ctx, item, &error);
            }
            FetchFailure::Connection => {
                if ctx.fetcher.host_reachable(&item.target).await {
                    tracing::debug!(phase = ctx.phase, "{}; host resolves, requeueing", error);
                    retry_or_drop(ctx, item, &error);
                    if !ctx.settings.delay.is_zero() {
                        tokio::time::sleep(ctx.settings.delay).await;
                    }
                } else {
                    tracing::warn!(phase = ctx.phase, "Dropping {}: host unreachable ({})", item.target, error);
                    ctx.counters.record_dropped();
                }
            }
            FetchFailure::Other => {
                tracing::warn!(phase = ctx.phase, "Dropping {}: {}", item.target, error);
                ctx.counters.record_dropped();
            }
        },
    }
}

fn retry_or_drop<F>(ctx: &WorkerContext<F>, mut item: WorkItem, error: &FetchError) {
    let attempts = item.record_retry();
    if attempts > ctx.settings.max_retries {
        tracing::warn!(
            phase = ctx.phase,
            "Dropping {} after {} attempts: {}",
            item.target,
            attempts,
            error
        );
        ctx.counters.record_dropped();
        return;
    }

    ctx.counters.record_requeued();
    if ctx.requeue.send(Job::Fetch(item)).is_err() {
        ctx.counters.record_discarded();
    }
}
