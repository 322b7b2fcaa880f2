//! Sink dispatch
//!
//! Every sink gets one bounded queue and one dedicated consumer running on a
//! blocking thread. A stop sentinel makes the consumer drain what is queued
//! ahead of it, close the sink and exit.

use crate::crawler::{LiveGuard, LiveTasks};
use crate::output::traits::{RecordBatch, Sink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum SinkMessage {
    Batch(Arc<RecordBatch>),
    Stop,
}

/// What a sink consumer did over the run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkTally {
    pub name: String,
    pub batches: usize,
    pub records: usize,
    pub failed_batches: usize,
}

struct SinkChannel {
    name: String,
    tx: mpsc::Sender<SinkMessage>,
    handle: JoinHandle<SinkTally>,
}

/// Fans record batches out to the configured sinks
pub struct SinkDispatcher {
    channels: Vec<SinkChannel>,
}

impl SinkDispatcher {
    /// Spawns one consumer per sink
    ///
    /// # Arguments
    ///
    /// * `sinks` - Sinks to drive; each must have a unique name
    /// * `capacity` - Queue capacity for the sink of the given name
    /// * `live` - Live consumer registry
    pub fn spawn(
        sinks: Vec<Box<dyn Sink>>,
        capacity: impl Fn(&str) -> usize,
        live: &LiveTasks,
    ) -> Self {
        let channels = sinks
            .into_iter()
            .map(|sink| {
                let name = sink.name().to_string();
                let (tx, rx) = mpsc::channel(capacity(&name).max(1));
                let guard = live.enter();
                let handle = tokio::task::spawn_blocking(move || consume(sink, rx, guard));
                SinkChannel { name, tx, handle }
            })
            .collect();

        Self { channels }
    }

    /// Queues a batch for every targeted sink; empty `targets` means all
    ///
    /// Waits while a targeted sink's queue is full.
    pub async fn dispatch(&self, batch: RecordBatch, targets: &[String]) {
        if batch.is_empty() {
            return;
        }
        let batch = Arc::new(batch);
        for channel in &self.channels {
            if !targets.is_empty() && !targets.iter().any(|t| *t == channel.name) {
                continue;
            }
            let message = SinkMessage::Batch(Arc::clone(&batch));
            if channel.tx.send(message).await.is_err() {
                tracing::warn!(
                    "Sink {} is gone; dropping batch {} from {}",
                    channel.name,
                    batch.schema,
                    batch.source
                );
            }
        }
    }

    /// Stops every consumer and waits for all of them
    pub async fn shutdown(self) -> Vec<SinkTally> {
        let mut tallies = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            // A consumer that already exited has nothing left to stop
            let _ = channel.tx.send(SinkMessage::Stop).await;
        }

        for channel in self.channels {
            drop(channel.tx);
            match channel.handle.await {
                Ok(tally) => tallies.push(tally),
                Err(e) => {
                    tracing::error!("Sink consumer {} panicked: {}", channel.name, e);
                    tallies.push(SinkTally {
                        name: channel.name,
                        ..Default::default()
                    });
                }
            }
        }

        tallies
    }
}

fn consume(
    mut sink: Box<dyn Sink>,
    mut rx: mpsc::Receiver<SinkMessage>,
    _guard: LiveGuard,
) -> SinkTally {
    let mut tally = SinkTally {
        name: sink.name().to_string(),
        ..Default::default()
    };

    while let Some(message) = rx.blocking_recv() {
        let batch = match message {
            SinkMessage::Batch(batch) => batch,
            SinkMessage::Stop => break,
        };
        match sink.write(&batch) {
            Ok(()) => {
                tally.batches += 1;
                tally.records += batch.len();
            }
            Err(e) => {
                tally.failed_batches += 1;
                tracing::warn!(
                    "Sink {} failed to write batch {} from {} ({} records): {}",
                    tally.name,
                    batch.schema,
                    batch.source,
                    batch.len(),
                    e
                );
            }
        }
    }

    if let Err(e) = sink.close() {
        tracing::warn!("Sink {} failed to close: {}", tally.name, e);
    }
    tracing::debug!(
        "Sink {} stopped after {} batches ({} failed)",
        tally.name,
        tally.batches,
        tally.failed_batches
    );
    tally
}
