//! Shared fixtures for the integration tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_tide::config::EngineSettings;
use sumi_tide::crawler::{FetchError, Fetcher};
use sumi_tide::output::{PhaseReport, ProgressReporter, RecordBatch, SinkError, SinkResult};
use sumi_tide::{Payload, Sink, WorkItem};

/// How the scripted fetcher answers one target
#[derive(Debug, Clone)]
pub enum Reply {
    Page(String),
    /// Answers after a pause
    Slow(Duration, String),
    /// Never answers within any sane request timeout
    Hang,
    Timeout,
    /// Connection refused; `reachable` is what the host check says
    Refused { reachable: bool },
    Status(u16),
}

/// In-memory fetcher with a fixed script; unknown targets get a 404
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, target: &str, body: &str) -> Self {
        self.replies.insert(target.to_string(), Reply::Page(body.to_string()));
        self
    }

    pub fn reply(mut self, target: &str, reply: Reply) -> Self {
        self.replies.insert(target.to_string(), reply);
        self
    }

    /// Every fetch call, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, target: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| *t == target).count()
    }

    /// Successful fetches, in completion order
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

/// Shares one scripted fetcher between the coordinator and the test
#[derive(Debug, Clone)]
pub struct SharedFetcher(pub Arc<ScriptedFetcher>);

impl Fetcher for SharedFetcher {
    async fn fetch(&self, item: &WorkItem) -> Result<Payload, FetchError> {
        let script = &self.0;
        script.calls.lock().unwrap().push(item.target.clone());
        let target = item.target.clone();

        let reply = script
            .replies
            .get(&item.target)
            .cloned()
            .unwrap_or(Reply::Status(404));

        let body = match reply {
            Reply::Page(body) => body,
            Reply::Slow(pause, body) => {
                tokio::time::sleep(pause).await;
                body
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                String::new()
            }
            Reply::Timeout => return Err(FetchError::Timeout { target }),
            Reply::Refused { .. } => {
                return Err(FetchError::Connection {
                    target,
                    message: "connection refused".to_string(),
                })
            }
            Reply::Status(status) => return Err(FetchError::Status { target, status }),
        };

        script.completed.lock().unwrap().push(item.target.clone());
        Ok(Payload::new(target, body))
    }

    async fn host_reachable(&self, target: &str) -> bool {
        matches!(
            self.0.replies.get(target),
            Some(Reply::Refused { reachable: true })
        )
    }
}

pub fn shared(fetcher: ScriptedFetcher) -> (SharedFetcher, Arc<ScriptedFetcher>) {
    let script = Arc::new(fetcher);
    (SharedFetcher(Arc::clone(&script)), script)
}

/// Sink keeping every batch in memory
pub struct MemorySink {
    name: String,
    batches: Arc<Mutex<Vec<RecordBatch>>>,
}

impl MemorySink {
    pub fn new(name: &str) -> (Box<dyn Sink>, Arc<Mutex<Vec<RecordBatch>>>) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Self {
            name: name.to_string(),
            batches: Arc::clone(&batches),
        };
        (Box::new(sink), batches)
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

/// Sink rejecting every batch
pub struct FailingSink;

impl Sink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        Err(SinkError::Write(format!("cannot store {}", batch.schema)))
    }
}

/// Reporter counting the callbacks it receives
#[derive(Debug, Clone, Default)]
pub struct CountingReporter {
    pub started: Arc<Mutex<Vec<(usize, usize)>>>,
    pub finished: Arc<Mutex<Vec<PhaseReport>>>,
}

impl ProgressReporter for CountingReporter {
    fn phase_started(&self, index: usize, _name: &str, iteration: usize) {
        self.started.lock().unwrap().push((index, iteration));
    }

    fn phase_finished(&self, report: &PhaseReport) {
        self.finished.lock().unwrap().push(report.clone());
    }
}

/// Fast engine settings for tests
pub fn settings(workers: usize) -> EngineSettings {
    EngineSettings {
        workers,
        parse_timeout: Duration::from_millis(10),
        progress_interval: None,
        max_retries: 2,
        ..Default::default()
    }
}

/// Fed items are all accounted for
pub fn assert_conserved(report: &PhaseReport) {
    assert_eq!(
        report.fed,
        report.parsed + report.dropped,
        "phase {} iteration {} is not balanced: {:?}",
        report.name,
        report.iteration,
        report
    );
}

pub fn targets(batches: &Arc<Mutex<Vec<RecordBatch>>>) -> Vec<String> {
    let mut sources: Vec<String> = batches
        .lock()
        .unwrap()
        .iter()
        .map(|b| b.source.clone())
        .collect();
    sources.sort();
    sources
}
