//! Run-wide deduplication of work targets
//!
//! Two membership sets are kept for the whole run and never reset:
//! - `seen`: targets that entered a fetch queue
//! - `forwarded`: targets parked in the forward buffer for a later phase
//!
//! Items flagged `duplicate` bypass both sets.

mod bloom;

pub use bloom::{BloomFilter, ExactSet, MembershipSet, ScalableBloomFilter};

use crate::config::DedupConfig;
use crate::work::WorkItem;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Deduplicator shared by the orchestrator and anything that routes work
pub struct Deduplicator {
    seen: Mutex<Box<dyn MembershipSet>>,
    forwarded: Mutex<Box<dyn MembershipSet>>,
}

impl Deduplicator {
    /// Creates a deduplicator over the given sets
    pub fn new(seen: Box<dyn MembershipSet>, forwarded: Box<dyn MembershipSet>) -> Self {
        Self {
            seen: Mutex::new(seen),
            forwarded: Mutex::new(forwarded),
        }
    }

    /// Creates a deduplicator backed by scalable Bloom filters
    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(
            Box::new(ScalableBloomFilter::new(
                config.expected_items,
                config.false_positive_rate,
            )),
            Box::new(ScalableBloomFilter::new(
                config.expected_items,
                config.false_positive_rate,
            )),
        )
    }

    /// Creates a deduplicator backed by exact hash sets
    pub fn exact() -> Self {
        Self::new(Box::new(ExactSet::new()), Box::new(ExactSet::new()))
    }

    /// Returns true if `key` may be queued for fetching
    pub fn should_fetch(&self, key: &str, duplicate: bool) -> bool {
        duplicate || !lock(&self.seen).contains(key)
    }

    pub fn mark_seen(&self, key: &str) {
        lock(&self.seen).insert(key);
    }

    /// Returns true if `key` may be parked for a later phase
    ///
    /// Targets already fetched are not forwarded again.
    pub fn should_forward(&self, key: &str) -> bool {
        !lock(&self.seen).contains(key) && !lock(&self.forwarded).contains(key)
    }

    pub fn mark_forwarded(&self, key: &str) {
        lock(&self.forwarded).insert(key);
    }

    /// Checks and marks an item for fetching in one step
    ///
    /// Returns false if the item must be skipped.
    pub fn admit_fetch(&self, item: &WorkItem) -> bool {
        let key = item.dedup_key();
        let mut seen = lock(&self.seen);
        if item.duplicate {
            seen.insert(&key);
            return true;
        }
        seen.insert(&key)
    }

    /// Checks and marks an item for forwarding in one step
    pub fn admit_forward(&self, item: &WorkItem) -> bool {
        if item.duplicate {
            return true;
        }
        let key = item.dedup_key();
        if lock(&self.seen).contains(&key) {
            return false;
        }
        lock(&self.forwarded).insert(&key)
    }

    pub fn seen_count(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn forwarded_count(&self) -> usize {
        lock(&self.forwarded).len()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("seen", &self.seen_count())
            .field("forwarded", &self.forwarded_count())
            .finish()
    }
}

// A poisoned set is still a valid set; keep using it.
fn lock(set: &Mutex<Box<dyn MembershipSet>>) -> MutexGuard<'_, Box<dyn MembershipSet>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}
