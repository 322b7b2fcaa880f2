//! Sink traits and types
//!
//! This module defines the trait interface for record sinks and the batch
//! type they receive.

use crate::extract::Record;
use thiserror::Error;

/// Errors that can occur while writing records
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Records of one schema extracted from one payload
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    /// Schema every record in the batch belongs to
    pub schema: String,

    /// URL of the payload the records came from
    pub source: String,

    /// Records in extractor order
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn new(schema: impl Into<String>, source: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            schema: schema.into(),
            source: source.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Trait for record sinks
///
/// Each sink is driven by its own consumer on a blocking thread, so
/// implementations may do synchronous IO. A failed write drops that batch
/// only; the sink keeps receiving later batches.
pub trait Sink: Send {
    /// Name used to route schemas to this sink
    fn name(&self) -> &str;

    /// Persists one batch
    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()>;

    /// Flushes and releases resources; called once after the last batch
    fn close(&mut self) -> SinkResult<()> {
        Ok(())
    }
}
