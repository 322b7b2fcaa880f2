//! Membership sets used by the deduplicator
//!
//! Both filters may answer "present" for a key never inserted (the key is
//! then silently skipped) but never answer "absent" for a key that was.

use std::collections::HashSet;
use xxhash_rust::xxh3::xxh3_64_with_seed;

const SECOND_HASH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Growth factor of each new stage of a scalable filter
const STAGE_GROWTH: usize = 2;

/// Each new stage tightens its false-positive rate by this ratio so the
/// compound rate stays bounded
const STAGE_TIGHTENING: f64 = 0.5;

/// A set of string keys that can be queried and extended
pub trait MembershipSet: Send {
    /// Inserts `key`; returns true if it was not (probably) present before
    fn insert(&mut self, key: &str) -> bool;

    /// Returns true if `key` is possibly in the set
    fn contains(&self, key: &str) -> bool;

    /// Number of insertions that reported a new key
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity Bloom filter
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: usize,
    capacity: usize,
    count: usize,
}

impl BloomFilter {
    /// Creates a filter sized for `capacity` keys at `false_positive_rate`
    ///
    /// # Arguments
    /// * `capacity` - Expected number of keys
    /// * `false_positive_rate` - Desired false positive rate (e.g., 0.01 for 1%)
    pub fn new(capacity: usize, false_positive_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let rate = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);

        // m = -n * ln(p) / (ln(2)^2)
        let m = (-(capacity as f64) * rate.ln() / 2.0_f64.ln().powi(2)).ceil() as usize;
        let num_bits = m.max(64);

        // k = m/n * ln(2)
        let k = ((num_bits as f64 / capacity as f64) * 2.0_f64.ln()).round() as usize;
        let num_hashes = k.clamp(1, 16);

        Self {
            bits: vec![0u64; (num_bits + 63) / 64],
            num_bits,
            num_hashes,
            capacity,
            count: 0,
        }
    }

    /// Returns true once the filter holds as many keys as it was sized for
    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Bit positions for `key`, by double hashing two xxh3 digests
    fn positions(&self, key: &str) -> impl Iterator<Item = usize> {
        let h1 = xxh3_64_with_seed(key.as_bytes(), 0);
        let h2 = xxh3_64_with_seed(key.as_bytes(), SECOND_HASH_SEED) | 1;
        let num_bits = self.num_bits as u64;
        (0..self.num_hashes as u64)
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits) as usize)
    }

    fn bit(&self, idx: usize) -> bool {
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }
}

impl MembershipSet for BloomFilter {
    fn insert(&mut self, key: &str) -> bool {
        let mut fresh = false;
        let positions: Vec<usize> = self.positions(key).collect();
        for idx in positions {
            let word = &mut self.bits[idx / 64];
            let mask = 1 << (idx % 64);
            if *word & mask == 0 {
                fresh = true;
                *word |= mask;
            }
        }
        if fresh {
            self.count += 1;
        }
        fresh
    }

    fn contains(&self, key: &str) -> bool {
        self.positions(key).all(|idx| self.bit(idx))
    }

    fn len(&self) -> usize {
        self.count
    }
}

/// Bloom filter that grows by adding stages instead of degrading
///
/// When the newest stage is full a new one is added with twice the capacity
/// and half the false-positive rate. A key is present if any stage has it.
#[derive(Debug, Clone)]
pub struct ScalableBloomFilter {
    stages: Vec<BloomFilter>,
    next_capacity: usize,
    next_rate: f64,
}

impl ScalableBloomFilter {
    pub fn new(initial_capacity: usize, false_positive_rate: f64) -> Self {
        // The first stage gets half the budget; the tightened stages sum to the rest
        let first_rate = false_positive_rate * (1.0 - STAGE_TIGHTENING);
        let initial_capacity = initial_capacity.max(1);
        Self {
            stages: vec![BloomFilter::new(initial_capacity, first_rate)],
            next_capacity: initial_capacity * STAGE_GROWTH,
            next_rate: first_rate * STAGE_TIGHTENING,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn active_stage(&mut self) -> &mut BloomFilter {
        let needs_stage = self.stages.last().map_or(true, BloomFilter::is_full);
        if needs_stage {
            tracing::debug!(
                capacity = self.next_capacity,
                "Adding Bloom filter stage {}",
                self.stages.len() + 1
            );
            self.stages
                .push(BloomFilter::new(self.next_capacity, self.next_rate));
            self.next_capacity = self.next_capacity.saturating_mul(STAGE_GROWTH);
            self.next_rate *= STAGE_TIGHTENING;
        }
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }
}

impl MembershipSet for ScalableBloomFilter {
    fn insert(&mut self, key: &str) -> bool {
        if self.contains(key) {
            return false;
        }
        self.active_stage().insert(key)
    }

    fn contains(&self, key: &str) -> bool {
        self.stages.iter().any(|stage| stage.contains(key))
    }

    fn len(&self) -> usize {
        self.stages.iter().map(MembershipSet::len).sum()
    }
}

/// Exact set, for small runs and deterministic tests
#[derive(Debug, Clone, Default)]
pub struct ExactSet {
    keys: HashSet<String>,
}

impl ExactSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MembershipSet for ExactSet {
    fn insert(&mut self, key: &str) -> bool {
        self.keys.insert(key.to_string())
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}
