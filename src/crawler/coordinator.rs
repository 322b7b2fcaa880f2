//! Pipeline orchestration
//!
//! The coordinator drives the phases of a crawl model in order. Each phase
//! iteration gets a fresh worker pool; the coordinator itself is the only
//! task that parses payloads, routes emitted work and touches the
//! deduplicator. A phase iteration moves `FEEDING -> DRAINING -> COMPLETE`:
//! - FEEDING: items are fed from the phase source, keeping at most
//!   `workers + 1` items outstanding
//! - DRAINING: the source is exhausted; payloads are still parsed and newly
//!   emitted active items still fed
//! - COMPLETE: every fed item was parsed or dropped
//!
//! A required schema yielding no records aborts its phase iteration: unfed
//! items are discarded and the iteration is not repeated, but the items it
//! forwarded still seed the next phase.
//!
//! A phase whose successor is not synchronized lets that successor start as
//! soon as its own source is exhausted; forwarded items then flow straight
//! into the successor's source.

use crate::config::{CrawlModel, EngineSettings};
use crate::crawler::counters::{LatencyStats, LiveTasks, WorkCounters};
use crate::crawler::fetcher::Fetcher;
use crate::crawler::phase::Phase;
use crate::crawler::router::{route_emission, Route};
use crate::crawler::worker::{Fetched, WorkerPool, WorkerSettings};
use crate::dedup::Deduplicator;
use crate::extract::{Extraction, Extractor, Schema};
use crate::output::{
    PhaseReport, ProgressReporter, ProgressSnapshot, RecordBatch, RunReport, Sink, SinkDispatcher,
    TracingReporter,
};
use crate::state::{PhaseState, PhaseTracker};
use crate::work::{WorkItem, WorkSource};
use crate::{Result, TideError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// One running iteration of one phase
struct PhaseRun {
    index: usize,
    name: String,
    iteration: usize,
    workers: usize,
    inherit: bool,
    tracker: PhaseTracker,
    pool: WorkerPool,
    counters: Arc<WorkCounters>,
    fetch_latency: Arc<LatencyStats>,
    parse_latency: LatencyStats,
    source: WorkSource,
    forward: Vec<WorkItem>,
    forwarded: usize,
    records: usize,
    schemas: Vec<Schema>,
    started: Instant,
}

impl PhaseRun {
    fn state(&self) -> PhaseState {
        self.tracker.state()
    }

    /// Moves to DRAINING once the source runs dry
    fn advance(&mut self) -> Result<()> {
        if self.state() == PhaseState::Feeding && self.source.is_exhausted() {
            self.tracker.transition(PhaseState::Draining)?;
        }
        Ok(())
    }

    /// True once nothing is left to feed, fetch or parse
    fn is_settled(&mut self) -> bool {
        match self.state() {
            PhaseState::Draining | PhaseState::Aborted => {
                self.source.is_exhausted() && self.counters.is_balanced()
            }
            _ => false,
        }
    }

    /// Cancels the iteration: queued and unfed work is discarded,
    /// in-flight fetches still complete. Items already forwarded are kept
    /// for the next phase.
    fn abort(&mut self) -> Result<()> {
        if self.state() == PhaseState::Aborted {
            return Ok(());
        }
        self.tracker.transition(PhaseState::Aborted)?;
        self.pool.abort();
        let discarded = self.source.discard();
        if discarded > 0 {
            tracing::warn!(phase = self.index, "Discarded {} unfed items of {}", discarded, self.name);
        }
        Ok(())
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: self.index,
            name: self.name.clone(),
            iteration: self.iteration,
            state: self.state(),
            counters: self.counters.snapshot(),
            records: self.records,
            mean_fetch_latency: self.fetch_latency.mean(),
            mean_parse_latency: self.parse_latency.mean(),
        }
    }

    fn report(&self) -> PhaseReport {
        let counters = self.counters.snapshot();
        PhaseReport {
            index: self.index,
            name: self.name.clone(),
            iteration: self.iteration,
            state: self.state(),
            fed: counters.fed,
            parsed: counters.parsed,
            dropped: counters.dropped,
            requeued: counters.requeued,
            records: self.records,
            forwarded: self.forwarded,
            mean_fetch_latency: self.fetch_latency.mean(),
            mean_parse_latency: self.parse_latency.mean(),
            elapsed: self.started.elapsed(),
        }
    }

    fn wrap(&self, error: TideError) -> TideError {
        match error {
            TideError::Phase { .. } => error,
            other => TideError::Phase {
                index: self.index,
                name: self.name.clone(),
                source: Box::new(other),
            },
        }
    }
}

/// Drives a crawl model to completion
pub struct Coordinator<F, E> {
    model: String,
    settings: EngineSettings,
    phases: Vec<Phase>,
    fetcher: Arc<F>,
    extractor: E,
    sinks: Vec<Box<dyn Sink>>,
    sink_capacity: HashMap<String, usize>,
    dedup: Deduplicator,
    reporter: Box<dyn ProgressReporter>,
    live_workers: LiveTasks,
    live_sinks: LiveTasks,
    /// Phase whose first payload forces an invalid state transition
    #[cfg(test)]
    fail_on_payload: Option<usize>,
}

impl<F: Fetcher, E: Extractor> Coordinator<F, E> {
    /// Creates a coordinator for `model`
    ///
    /// # Arguments
    ///
    /// * `model` - Built crawl model
    /// * `fetcher` - Fetcher shared by every worker of every phase
    /// * `extractor` - Extractor applied to every payload
    /// * `sinks` - Opened sinks, matched to the model's sink names
    pub fn new(model: CrawlModel, fetcher: F, extractor: E, sinks: Vec<Box<dyn Sink>>) -> Self {
        let sink_capacity = model
            .sinks
            .iter()
            .filter_map(|s| s.queue_capacity.map(|c| (s.name.clone(), c)))
            .collect();

        Self {
            dedup: Deduplicator::from_config(&model.dedup),
            model: model.name,
            settings: model.settings,
            phases: model.phases,
            fetcher: Arc::new(fetcher),
            extractor,
            sinks,
            sink_capacity,
            reporter: Box::new(TracingReporter),
            live_workers: LiveTasks::new(),
            live_sinks: LiveTasks::new(),
            #[cfg(test)]
            fail_on_payload: None,
        }
    }

    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Replaces the default Bloom-filter deduplicator
    pub fn with_dedup(mut self, dedup: Deduplicator) -> Self {
        self.dedup = dedup;
        self
    }

    /// Handle on the count of live fetch workers
    pub fn live_workers(&self) -> LiveTasks {
        self.live_workers.clone()
    }

    /// Handle on the count of live sink consumers
    pub fn live_sink_consumers(&self) -> LiveTasks {
        self.live_sinks.clone()
    }

    /// Runs every phase and returns the run report
    ///
    /// Every worker pool is stopped and every sink consumer joined before
    /// this returns, on success and on error alike.
    ///
    /// # Errors
    ///
    /// Fatal errors are returned wrapped in `TideError::Phase`. Fetch,
    /// extraction and sink failures are not fatal.
    pub async fn run(mut self) -> Result<RunReport> {
        let started_at = Utc::now();
        tracing::info!(
            "Starting model {} ({} phases, {} sinks)",
            self.model,
            self.phases.len(),
            self.sinks.len()
        );

        let default_capacity = self.settings.sink_queue_capacity;
        let capacities = std::mem::take(&mut self.sink_capacity);
        let dispatcher = SinkDispatcher::spawn(
            std::mem::take(&mut self.sinks),
            |name| capacities.get(name).copied().unwrap_or(default_capacity),
            &self.live_sinks,
        );

        let (results_tx, mut results_rx) = mpsc::channel(self.settings.parse_queue_capacity.max(1));
        let mut runs: Vec<PhaseRun> = Vec::new();
        let mut reports = Vec::new();

        let outcome = self
            .drive(&mut runs, &results_tx, &mut results_rx, &dispatcher, &mut reports)
            .await;

        if let Err(e) = &outcome {
            let index = match e {
                TideError::Phase { index, .. } => *index,
                _ => runs.first().map(|r| r.index).unwrap_or(0),
            };
            self.reporter.fatal(index, e);
        }

        // Workers blocked on a full parse queue give up once it is closed
        drop(results_rx);
        drop(results_tx);
        for run in runs {
            run.pool.abort();
            run.pool.shutdown().await;
        }
        let sinks = dispatcher.shutdown().await;

        outcome?;

        let report = RunReport {
            model: self.model,
            started_at,
            finished_at: Utc::now(),
            phases: reports,
            sinks,
        };
        tracing::info!(
            "Model {} finished: {} records from {} payloads in {:.1?}",
            report.model,
            report.total_records(),
            report.total_parsed(),
            report.duration()
        );
        Ok(report)
    }

    async fn drive(
        &mut self,
        runs: &mut Vec<PhaseRun>,
        results_tx: &mpsc::Sender<Fetched>,
        results_rx: &mut mpsc::Receiver<Fetched>,
        dispatcher: &SinkDispatcher,
        reports: &mut Vec<PhaseReport>,
    ) -> Result<()> {
        let mut next_index = 0;
        let mut carried: Vec<WorkItem> = Vec::new();
        let mut last_progress = Instant::now();

        loop {
            if runs.is_empty() {
                match self.next_active_phase(next_index) {
                    Some(index) => {
                        let run = self.open_phase(index, 0, std::mem::take(&mut carried), results_tx)?;
                        next_index = index + 1;
                        runs.push(run);
                    }
                    None => break,
                }
            }

            for run in runs.iter_mut() {
                self.top_up(run).map_err(|e| run.wrap(e))?;
                run.advance().map_err(|e| run.wrap(e))?;
            }

            if runs[0].is_settled() {
                let run = runs.remove(0);
                let index = run.index;
                let iteration = run.iteration;
                let (report, forward) = self.finish_run(run).await?;
                let aborted = report.is_aborted();
                let repeat = !aborted && self.phases[index].should_repeat(&report);
                reports.push(report);

                if repeat {
                    let run = self.open_phase(index, iteration + 1, forward, results_tx)?;
                    runs.insert(0, run);
                } else {
                    if aborted {
                        tracing::warn!(
                            phase = index,
                            "Phase {} was aborted; handing {} forwarded items on",
                            self.phases[index].name,
                            forward.len()
                        );
                    }
                    self.phases[index].active = false;
                    match runs.first_mut() {
                        Some(successor) => hand_over(successor, forward),
                        None => carried = forward,
                    }
                }
                continue;
            }

            if runs.len() == 1 && runs[0].state() == PhaseState::Draining {
                if let Some(index) = self.unsynchronized_successor(runs[0].index, next_index) {
                    tracing::info!(
                        phase = index,
                        "Starting {} before {} has drained",
                        self.phases[index].name,
                        runs[0].name
                    );
                    let inherited = std::mem::take(&mut runs[0].forward);
                    let run = self.open_phase(index, 0, inherited, results_tx)?;
                    next_index = index + 1;
                    runs.push(run);
                    continue;
                }
            }

            if let Some(interval) = self.settings.progress_interval {
                if last_progress.elapsed() >= interval {
                    for run in runs.iter() {
                        self.reporter.progress(&run.snapshot());
                    }
                    last_progress = Instant::now();
                }
            }

            match tokio::time::timeout(self.settings.parse_timeout, results_rx.recv()).await {
                Ok(Some(fetched)) => {
                    let Some(pos) = runs.iter().position(|r| r.index == fetched.phase) else {
                        tracing::warn!(
                            phase = fetched.phase,
                            "Dropping payload from {}: phase is no longer running",
                            fetched.item.target
                        );
                        continue;
                    };
                    let forwards = self.handle_payload(&mut runs[pos], fetched, dispatcher).await;
                    let forwards = forwards.map_err(|e| runs[pos].wrap(e))?;
                    forward_items(runs, pos, forwards);
                }
                Ok(None) => {
                    return Err(runs[0].wrap(TideError::ParseQueueClosed {
                        phase: runs[0].index,
                    }));
                }
                // Nothing arrived; check completion again
                Err(_) => {}
            }
        }

        Ok(())
    }

    /// First active phase at or after `from`
    fn next_active_phase(&self, from: usize) -> Option<usize> {
        (from..self.phases.len()).find(|&i| {
            let active = self.phases[i].active;
            if !active {
                tracing::info!(phase = i, "Skipping inactive phase {}", self.phases[i].name);
            }
            active
        })
    }

    /// The next phase, if it may start while `current` is still draining
    fn unsynchronized_successor(&self, current: usize, next: usize) -> Option<usize> {
        if self.phases[current].repeat {
            return None;
        }
        let index = (next..self.phases.len()).find(|&i| self.phases[i].active)?;
        (!self.phases[index].synchronize).then_some(index)
    }

    fn open_phase(
        &mut self,
        index: usize,
        iteration: usize,
        inherited: Vec<WorkItem>,
        results_tx: &mpsc::Sender<Fetched>,
    ) -> Result<PhaseRun> {
        let phase = &mut self.phases[index];

        let mut source = WorkSource::new();
        if iteration > 0 || phase.inherit {
            source.extend(inherited.into_iter().map(activate));
        } else if !inherited.is_empty() {
            tracing::warn!(
                phase = index,
                "Phase {} does not inherit; discarding {} forwarded items",
                phase.name,
                inherited.len()
            );
        }
        if iteration == 0 {
            source.append(phase.take_source());
        }

        let workers = phase.workers.unwrap_or(self.settings.workers).max(1);
        let counters = Arc::new(WorkCounters::new());
        let fetch_latency = Arc::new(LatencyStats::new());
        let pool = WorkerPool::spawn(
            index,
            workers,
            Arc::clone(&self.fetcher),
            WorkerSettings {
                delay: self.settings.delay,
                request_timeout: self.settings.request_timeout,
                max_retries: self.settings.max_retries,
            },
            results_tx.clone(),
            Arc::clone(&counters),
            Arc::clone(&fetch_latency),
            &self.live_workers,
        );

        let mut tracker = PhaseTracker::new(index);
        let name = phase.name.clone();
        tracker.transition(PhaseState::Feeding).map_err(|e| TideError::Phase {
            index,
            name: name.clone(),
            source: Box::new(e),
        })?;

        self.reporter.phase_started(index, &name, iteration);

        Ok(PhaseRun {
            index,
            name,
            iteration,
            workers,
            inherit: phase.inherit,
            tracker,
            pool,
            counters,
            fetch_latency,
            parse_latency: LatencyStats::new(),
            source,
            forward: Vec::new(),
            forwarded: 0,
            records: 0,
            schemas: phase.schemas.clone(),
            started: Instant::now(),
        })
    }

    /// Feeds items until `workers + 1` are outstanding or the source is dry
    fn top_up(&self, run: &mut PhaseRun) -> Result<()> {
        if !run.state().is_running() {
            return Ok(());
        }

        let watermark = run.workers + 1;
        while run.counters.below_watermark(watermark) {
            let Some(item) = run.source.next_item() else {
                break;
            };

            if !item.active {
                if self.dedup.admit_forward(&item) {
                    run.forwarded += 1;
                    run.forward.push(item);
                }
                continue;
            }

            if !self.dedup.admit_fetch(&item) {
                tracing::trace!(phase = run.index, "Skipping duplicate {}", item.target);
                continue;
            }

            tracing::trace!(phase = run.index, "Feeding {}", item.target);
            run.pool.submit(item)?;
        }
        Ok(())
    }

    /// Extracts one payload, dispatches its records and routes its emissions
    ///
    /// Active emissions go onto the run's source; inactive ones are returned.
    async fn handle_payload(
        &self,
        run: &mut PhaseRun,
        fetched: Fetched,
        dispatcher: &SinkDispatcher,
    ) -> Result<Vec<WorkItem>> {
        let Fetched { item, payload, .. } = fetched;

        if run.state() == PhaseState::Aborted {
            tracing::debug!(phase = run.index, "Dropping late payload from {}", payload.url);
            run.counters.record_dropped();
            return Ok(Vec::new());
        }

        #[cfg(test)]
        if self.fail_on_payload == Some(run.index) {
            run.tracker.transition(PhaseState::Pending)?;
        }

        let started = Instant::now();
        let mut forwards = Vec::new();
        let mut missing_required = None;

        for schema in &run.schemas {
            let Extraction {
                mut records,
                emissions,
            } = match self.extractor.extract(&payload, schema) {
                Ok(extraction) => extraction,
                Err(e) => {
                    tracing::warn!(
                        phase = run.index,
                        "Failed to extract {} from {}: {}",
                        schema.name,
                        payload.url,
                        e
                    );
                    continue;
                }
            };

            if schema.required && records.is_empty() {
                missing_required = Some(schema.name.clone());
                break;
            }

            for record in &mut records {
                record.inherit(&item.metadata);
            }
            run.records += records.len();
            tracing::debug!(
                phase = run.index,
                "{} {} records from {}",
                records.len(),
                schema.name,
                payload.url
            );
            dispatcher
                .dispatch(RecordBatch::new(&schema.name, &payload.url, records), &schema.sinks)
                .await;

            for mut emission in emissions {
                emission.parent.inherit(&item.metadata);
                for route in route_emission(&emission, &payload.url, &self.dedup) {
                    match route {
                        Route::Fetch(next) => run.source.push(next),
                        Route::Forward(next) => forwards.push(next),
                    }
                }
            }
        }

        run.parse_latency.record(started.elapsed());
        run.counters.record_parsed();

        if let Some(schema) = missing_required {
            tracing::warn!(
                phase = run.index,
                "Required schema {} yielded no records from {}; aborting phase {}",
                schema,
                payload.url,
                run.name
            );
            run.abort()?;
        }

        Ok(forwards)
    }

    /// Completes a settled run and stops its pool
    async fn finish_run(&self, mut run: PhaseRun) -> Result<(PhaseReport, Vec<WorkItem>)> {
        if run.state() == PhaseState::Draining {
            run.tracker
                .transition(PhaseState::Complete)
                .map_err(|e| run.wrap(e))?;
        }

        let report = run.report();
        let forward = std::mem::take(&mut run.forward);
        run.pool.shutdown().await;
        self.reporter.phase_finished(&report);
        Ok((report, forward))
    }
}

/// Sends forwarded items to the running successor, or parks them
fn forward_items(runs: &mut [PhaseRun], pos: usize, items: Vec<WorkItem>) {
    if items.is_empty() {
        return;
    }
    runs[pos].forwarded += items.len();

    match runs.get_mut(pos + 1) {
        Some(successor) if successor.state().is_running() => hand_over(successor, items),
        _ => runs[pos].forward.extend(items),
    }
}

/// Gives forwarded items to a successor that is already running
fn hand_over(successor: &mut PhaseRun, items: Vec<WorkItem>) {
    if items.is_empty() {
        return;
    }
    if successor.inherit {
        successor.source.extend(items.into_iter().map(activate));
    } else {
        tracing::warn!(
            phase = successor.index,
            "Phase {} does not inherit; discarding {} forwarded items",
            successor.name,
            items.len()
        );
    }
}

fn activate(mut item: WorkItem) -> WorkItem {
    item.active = true;
    item
}
