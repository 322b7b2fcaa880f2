//! Crawl engine
//!
//! This module contains the orchestration engine, including:
//! - The `Fetcher` interface and its HTTP implementation
//! - Fixed-size fetch worker pools, one per phase iteration
//! - Routing of emitted values to new work
//! - The `Coordinator` driving phases in order

mod coordinator;
mod counters;
mod fetcher;
mod phase;
mod router;
mod worker;

pub use coordinator::Coordinator;
pub use counters::{CounterSnapshot, LatencyStats, LiveGuard, LiveTasks, WorkCounters};
pub use fetcher::{build_http_client, FetchError, FetchFailure, Fetcher, HttpFetcher};
pub use phase::{Continuation, Phase, RepeatLimit};
pub use router::{route_emission, Route};
pub use worker::{Fetched, WorkerPool, WorkerSettings};

use crate::config::CrawlModel;
use crate::extract::HtmlExtractor;
use crate::output::{open_sinks, RunReport};
use crate::Result;

/// Runs a crawl model with the bundled HTTP fetcher and HTML extractor
///
/// This is the main entry point for running a model. It will:
/// 1. Build the shared HTTP client from the model's user agent
/// 2. Compile every selector of the model
/// 3. Open the configured sinks
/// 4. Run every phase and join every worker and sink consumer
///
/// # Arguments
///
/// * `model` - The crawl model to run
///
/// # Returns
///
/// * `Ok(RunReport)` - Per-phase and per-sink outcome
/// * `Err(TideError)` - Setup failed or a phase failed fatally
pub async fn crawl(model: CrawlModel) -> Result<RunReport> {
    let client = build_http_client(&model.user_agent, model.settings.request_timeout)?;
    let fetcher = HttpFetcher::new(client);
    let extractor = HtmlExtractor::for_schemas(model.schemas())?;
    let sinks = open_sinks(&model.sinks)?;

    Coordinator::new(model, fetcher, extractor, sinks).run().await
}
