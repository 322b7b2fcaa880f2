//! Output module for records and run reports
//!
//! This module handles:
//! - The `Sink` interface and the bundled sinks (SQLite, JSON Lines, shell
//!   command, log)
//! - Dispatching record batches to sinks through bounded queues
//! - Progress reporting and the final run report

mod command;
mod dispatch;
mod jsonl;
mod log;
mod sqlite_output;
pub mod stats;
mod traits;

pub use command::CommandSink;
pub use dispatch::{SinkDispatcher, SinkTally};
pub use jsonl::JsonlSink;
pub use log::LogSink;
pub use sqlite_output::SqliteSink;
pub use stats::{
    print_run_report, PhaseReport, ProgressReporter, ProgressSnapshot, RunReport, TracingReporter,
};
pub use traits::{RecordBatch, Sink, SinkError, SinkResult};

use crate::config::{SinkConfig, SinkKind};

/// Opens the sink described by a model's `[[sink]]` entry
///
/// # Errors
///
/// Fails if the sink's file or database cannot be opened.
pub fn open_sink(config: &SinkConfig) -> SinkResult<Box<dyn Sink>> {
    let sink: Box<dyn Sink> = match &config.kind {
        SinkKind::Sqlite { path } => Box::new(SqliteSink::open(&config.name, path)?),
        SinkKind::Jsonl { path } => Box::new(JsonlSink::open(&config.name, path)?),
        SinkKind::Command { command } => Box::new(CommandSink::new(&config.name, command)),
        SinkKind::Log => Box::new(LogSink::new(&config.name)),
    };
    tracing::debug!("Opened {} sink {}", config.kind.as_str(), config.name);
    Ok(sink)
}

/// Opens every configured sink, in order
pub fn open_sinks(configs: &[SinkConfig]) -> SinkResult<Vec<Box<dyn Sink>>> {
    configs.iter().map(open_sink).collect()
}
