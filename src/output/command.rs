//! Shell command record sink
//!
//! Each batch is piped to a fresh `sh -c` process as JSON Lines on stdin.
//! The schema name is exported as `TIDE_SCHEMA` and the payload URL as
//! `TIDE_SOURCE`. A non-zero exit fails the batch.

use crate::output::traits::{RecordBatch, Sink, SinkError, SinkResult};
use std::io::Write;
use std::process::{Command, Stdio};

pub struct CommandSink {
    name: String,
    command: String,
}

impl CommandSink {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    fn failure(&self, message: impl Into<String>) -> SinkError {
        SinkError::Command {
            command: self.command.clone(),
            message: message.into(),
        }
    }
}

impl Sink for CommandSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        let mut input = Vec::new();
        for record in &batch.records {
            serde_json::to_writer(&mut input, &record.to_json())?;
            input.push(b'\n');
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("TIDE_SCHEMA", &batch.schema)
            .env("TIDE_SOURCE", &batch.source)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // Stdin is written from its own thread while stderr is drained
        let name = &self.name;
        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    // A command that exits without reading is judged by its status
                    if let Err(e) = stdin.write_all(&input) {
                        tracing::debug!("Command sink {} stopped reading: {}", name, e);
                    }
                });
            }
            child.wait_with_output()
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("{}: {}", output.status, stderr.trim())));
        }
        Ok(())
    }
}
