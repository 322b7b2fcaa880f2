//! Phases of a crawl model
//!
//! A phase owns its work source, its record schemas and, when it repeats,
//! the continuation deciding whether another iteration runs. Only the source
//! and the `active` flag change while a run is in progress.

use crate::config::RepeatWhile;
use crate::extract::Schema;
use crate::output::PhaseReport;
use crate::work::{WorkGenerator, WorkItem, WorkSource};
use std::fmt;

/// Decides whether a repeating phase runs another iteration
pub trait Continuation: Send {
    fn should_repeat(&mut self, report: &PhaseReport) -> bool;
}

impl<F> Continuation for F
where
    F: FnMut(&PhaseReport) -> bool + Send,
{
    fn should_repeat(&mut self, report: &PhaseReport) -> bool {
        self(report)
    }
}

/// Built-in continuation: an optional iteration cap plus a progress test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepeatLimit {
    /// Total iterations allowed, the first one included
    pub max_iterations: Option<usize>,
    pub until: RepeatWhile,
}

impl RepeatLimit {
    pub fn new(max_iterations: Option<usize>, until: RepeatWhile) -> Self {
        Self {
            max_iterations,
            until,
        }
    }
}

impl Continuation for RepeatLimit {
    fn should_repeat(&mut self, report: &PhaseReport) -> bool {
        if report.is_aborted() {
            return false;
        }
        if let Some(max) = self.max_iterations {
            if report.iteration + 1 >= max {
                return false;
            }
        }
        match self.until {
            RepeatWhile::Forwarded => report.forwarded > 0,
            RepeatWhile::Records => report.records > 0,
        }
    }
}

/// One stage of a crawl model
pub struct Phase {
    pub name: String,

    /// Inactive phases are skipped; forwarded work passes through them
    pub active: bool,

    /// Worker count; None uses the engine default
    pub workers: Option<usize>,

    pub repeat: bool,

    /// When false the phase may start before the previous one has drained
    pub synchronize: bool,

    /// Consume the items forwarded by the previous phase
    pub inherit: bool,

    pub source: WorkSource,

    pub schemas: Vec<Schema>,

    continuation: Option<Box<dyn Continuation>>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            workers: None,
            repeat: false,
            synchronize: true,
            inherit: true,
            source: WorkSource::new(),
            schemas: Vec::new(),
            continuation: None,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn seeds(mut self, items: impl IntoIterator<Item = WorkItem>) -> Self {
        self.source.extend(items);
        self
    }

    pub fn generator(mut self, generator: WorkGenerator) -> Self {
        self.source.add_generator(generator);
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn unsynchronized(mut self) -> Self {
        self.synchronize = false;
        self
    }

    pub fn without_inherit(mut self) -> Self {
        self.inherit = false;
        self
    }

    /// Repeats the phase while `continuation` holds
    pub fn repeat_with(mut self, continuation: impl Continuation + 'static) -> Self {
        self.repeat = true;
        self.continuation = Some(Box::new(continuation));
        self
    }

    /// Asks the continuation about the iteration that just finished
    ///
    /// A repeating phase without a continuation repeats while it forwards.
    pub fn should_repeat(&mut self, report: &PhaseReport) -> bool {
        if !self.repeat {
            return false;
        }
        match self.continuation.as_mut() {
            Some(continuation) => continuation.should_repeat(report),
            None => RepeatLimit::default().should_repeat(report),
        }
    }

    pub(crate) fn take_source(&mut self) -> WorkSource {
        std::mem::take(&mut self.source)
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("workers", &self.workers)
            .field("repeat", &self.repeat)
            .field("synchronize", &self.synchronize)
            .field("inherit", &self.inherit)
            .field("source", &self.source)
            .field("schemas", &self.schemas.len())
            .finish()
    }
}
