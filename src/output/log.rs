//! Log sink: records go to the tracing log instead of storage

use crate::output::traits::{RecordBatch, Sink, SinkResult};

pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Sink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        for record in &batch.records {
            tracing::info!(
                schema = %batch.schema,
                source = %batch.source,
                "{}",
                record.fields_json()
            );
        }
        Ok(())
    }
}
