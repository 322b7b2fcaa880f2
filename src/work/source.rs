//! Work sources for phases
//!
//! A phase pulls its work from a `WorkSource`: a finite list of items
//! consumed once, followed by any number of lazy generators pulled one item
//! at a time so unbounded crawls never materialise their whole frontier.

use crate::work::{RequestTemplate, WorkItem};
use std::collections::VecDeque;
use std::fmt;

/// Lazy generator of work items
pub type WorkGenerator = Box<dyn Iterator<Item = WorkItem> + Send>;

/// Generates one item per number in an inclusive range
///
/// The number replaces the `{}` placeholder in the template.
#[derive(Debug, Clone)]
pub struct RangeGenerator {
    template: String,
    next: i64,
    end: i64,
    step: i64,
    request: RequestTemplate,
}

impl RangeGenerator {
    pub fn new(template: impl Into<String>, start: i64, end: i64, step: i64) -> Self {
        Self {
            template: template.into(),
            next: start,
            end,
            step: if step == 0 { 1 } else { step },
            request: RequestTemplate::default(),
        }
    }

    pub fn with_request(mut self, request: RequestTemplate) -> Self {
        self.request = request;
        self
    }

    fn in_range(&self) -> bool {
        if self.step > 0 {
            self.next <= self.end
        } else {
            self.next >= self.end
        }
    }
}

impl Iterator for RangeGenerator {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        if !self.in_range() {
            return None;
        }
        let target = self.template.replace("{}", &self.next.to_string());
        self.next = self.next.saturating_add(self.step);
        Some(self.request.build(target))
    }
}

/// Where a phase gets its work from
#[derive(Default)]
pub struct WorkSource {
    queue: VecDeque<WorkItem>,
    generators: VecDeque<WorkGenerator>,
}

impl WorkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            queue: items.into_iter().collect(),
            generators: VecDeque::new(),
        }
    }

    /// Appends a finite batch of items after what is already queued
    pub fn extend(&mut self, items: impl IntoIterator<Item = WorkItem>) {
        self.queue.extend(items);
    }

    pub fn push(&mut self, item: WorkItem) {
        self.queue.push_back(item);
    }

    pub fn add_generator(&mut self, generator: WorkGenerator) {
        self.generators.push_back(generator);
    }

    /// Moves everything from `other` behind the contents of this source
    pub fn append(&mut self, mut other: WorkSource) {
        self.queue.append(&mut other.queue);
        self.generators.append(&mut other.generators);
    }

    /// Pulls the next item, draining the list before any generator
    pub fn next_item(&mut self) -> Option<WorkItem> {
        if let Some(item) = self.queue.pop_front() {
            return Some(item);
        }
        while let Some(generator) = self.generators.front_mut() {
            if let Some(item) = generator.next() {
                return Some(item);
            }
            self.generators.pop_front();
        }
        None
    }

    /// Returns true once no item can be produced any more
    ///
    /// Generators are checked by pulling one item ahead into the list.
    pub fn is_exhausted(&mut self) -> bool {
        if !self.queue.is_empty() {
            return false;
        }
        while let Some(generator) = self.generators.front_mut() {
            if let Some(item) = generator.next() {
                self.queue.push_back(item);
                return false;
            }
            self.generators.pop_front();
        }
        true
    }

    /// Drops all remaining work and returns how many listed items were discarded
    pub fn discard(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        self.generators.clear();
        discarded
    }

    /// Number of items already materialised (generators not counted)
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for WorkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkSource")
            .field("queued", &self.queue.len())
            .field("generators", &self.generators.len())
            .finish()
    }
}
