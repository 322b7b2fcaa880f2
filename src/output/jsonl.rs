//! JSON Lines record sink

use crate::output::traits::{RecordBatch, Sink, SinkResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Appends one JSON object per record to a file
pub struct JsonlSink {
    name: String,
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Opens `path` for appending, creating it and its parent directory
    pub fn open(name: impl Into<String>, path: &Path) -> SinkResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            name: name.into(),
            writer: BufWriter::new(file),
        })
    }
}

impl Sink for JsonlSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        for record in &batch.records {
            serde_json::to_writer(&mut self.writer, &record.to_json())?;
            self.writer.write_all(b"\n")?;
        }
        // Flush per batch so a crash loses at most the batch in progress
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
