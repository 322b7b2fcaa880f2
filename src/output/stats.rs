//! Run statistics and progress reporting
//!
//! The orchestrator publishes progress through a `ProgressReporter`; the
//! reporter only observes, it never changes the run. A `RunReport` is
//! returned when the run ends.

use crate::crawler::CounterSnapshot;
use crate::output::dispatch::SinkTally;
use crate::state::PhaseState;
use crate::TideError;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Progress of the phase currently running
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub phase: usize,
    pub name: String,
    pub iteration: usize,
    pub state: PhaseState,
    pub counters: CounterSnapshot,
    pub records: usize,
    pub mean_fetch_latency: Duration,
    pub mean_parse_latency: Duration,
}

/// Outcome of one phase iteration
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub index: usize,
    pub name: String,

    /// Zero-based; a repeating phase reports once per iteration
    pub iteration: usize,

    pub state: PhaseState,
    pub fed: usize,
    pub parsed: usize,
    pub dropped: usize,
    pub requeued: usize,

    /// Records extracted (before sink delivery)
    pub records: usize,

    /// Items parked for the next phase
    pub forwarded: usize,

    pub mean_fetch_latency: Duration,
    pub mean_parse_latency: Duration,
    pub elapsed: Duration,
}

impl PhaseReport {
    pub fn is_aborted(&self) -> bool {
        self.state == PhaseState::Aborted
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseReport>,
    pub sinks: Vec<SinkTally>,
}

impl RunReport {
    pub fn total_records(&self) -> usize {
        self.phases.iter().map(|p| p.records).sum()
    }

    pub fn total_parsed(&self) -> usize {
        self.phases.iter().map(|p| p.parsed).sum()
    }

    pub fn total_dropped(&self) -> usize {
        self.phases.iter().map(|p| p.dropped).sum()
    }

    /// True if any phase was cancelled
    pub fn aborted(&self) -> bool {
        self.phases.iter().any(PhaseReport::is_aborted)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Reports of every iteration of phase `index`
    pub fn phase(&self, index: usize) -> impl Iterator<Item = &PhaseReport> {
        self.phases.iter().filter(move |p| p.index == index)
    }
}

/// Passive observer of a run
pub trait ProgressReporter: Send + Sync {
    fn phase_started(&self, index: usize, name: &str, iteration: usize) {
        let _ = (index, name, iteration);
    }

    fn progress(&self, snapshot: &ProgressSnapshot) {
        let _ = snapshot;
    }

    fn phase_finished(&self, report: &PhaseReport) {
        let _ = report;
    }

    fn fatal(&self, index: usize, error: &TideError) {
        let _ = (index, error);
    }
}

/// Reporter that uses the `tracing` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn phase_started(&self, index: usize, name: &str, iteration: usize) {
        if iteration == 0 {
            tracing::info!(phase = index, "Starting phase {}", name);
        } else {
            tracing::info!(phase = index, "Repeating phase {} (iteration {})", name, iteration + 1);
        }
    }

    fn progress(&self, s: &ProgressSnapshot) {
        tracing::info!(
            phase = s.phase,
            "{} [{}]: queued {}, in flight {}, parsed {}/{}, dropped {}, fetch {:?}, parse {:?}",
            s.name,
            s.state,
            s.counters.queued,
            s.counters.in_flight,
            s.counters.parsed,
            s.counters.fed,
            s.counters.dropped,
            s.mean_fetch_latency,
            s.mean_parse_latency
        );
    }

    fn phase_finished(&self, r: &PhaseReport) {
        if r.is_aborted() {
            tracing::warn!(phase = r.index, "Phase {} aborted after {} parsed", r.name, r.parsed);
        } else {
            tracing::info!(
                phase = r.index,
                "Phase {} complete: {} parsed, {} dropped, {} records, {} forwarded in {:.1?}",
                r.name,
                r.parsed,
                r.dropped,
                r.records,
                r.forwarded,
                r.elapsed
            );
        }
    }

    fn fatal(&self, index: usize, error: &TideError) {
        tracing::error!(phase = index, "Phase {} failed: {}", index, error);
    }
}

/// Prints a run report to stdout in a formatted manner
pub fn print_run_report(report: &RunReport) {
    println!("=== Crawl Report: {} ===\n", report.model);

    println!("Overview:");
    println!("  Started: {}", report.started_at.to_rfc3339());
    println!("  Duration: {:.1?}", report.duration());
    println!("  Items parsed: {}", report.total_parsed());
    println!("  Items dropped: {}", report.total_dropped());
    println!("  Records extracted: {}", report.total_records());
    println!();

    println!("Phases:");
    for p in &report.phases {
        let label = if p.iteration == 0 {
            format!("{}. {}", p.index + 1, p.name)
        } else {
            format!("{}. {} (#{})", p.index + 1, p.name, p.iteration + 1)
        };
        println!(
            "  {}: {} | fed {}, parsed {}, dropped {}, requeued {}, records {}, forwarded {}",
            label, p.state, p.fed, p.parsed, p.dropped, p.requeued, p.records, p.forwarded
        );
        println!(
            "      mean fetch {:.1?}, mean parse {:.1?}, elapsed {:.1?}",
            p.mean_fetch_latency, p.mean_parse_latency, p.elapsed
        );
    }
    println!();

    if !report.sinks.is_empty() {
        println!("Sinks:");
        for s in &report.sinks {
            println!(
                "  {}: {} records in {} batches ({} failed)",
                s.name, s.records, s.batches, s.failed_batches
            );
        }
        println!();
    }

    if report.aborted() {
        println!("Run was aborted: a required schema produced no records.");
    }
}
