use crate::core::item::DocKey;
use crate::utils::hash::murmur3_32;

/// Lifecycle status of a vbucket's bloom filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Disabled,
    Enabled,
    Compacting,
}

impl FilterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterStatus::Disabled => "DISABLED",
            FilterStatus::Enabled => "ENABLED",
            FilterStatus::Compacting => "COMPACTING",
        }
    }
}

/// Probabilistic "may contain" set over document keys.
///
/// Used under full eviction to skip disk probes for keys that are
/// definitely absent. Sizing follows the standard m/k derivation from an
/// expected key count and target false-positive probability.
#[derive(Debug)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
    key_count: usize,
    status: FilterStatus,
}

impl BloomFilter {
    pub fn new(expected_keys: usize, probability: f64, status: FilterStatus) -> Self {
        let n = expected_keys.max(1) as f64;
        let num_bits = (-(n * probability.ln()) / (2f64.ln() * 2f64.ln())).ceil() as usize;
        let num_bits = num_bits.max(64);
        let num_hashes = ((num_bits as f64 / n) * 2f64.ln()).round().max(1.0) as u32;
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            num_hashes,
            key_count: 0,
            status,
        }
    }

    fn bit_for(&self, key: &DocKey, seed: u32) -> usize {
        let h = murmur3_32(&key.key, seed ^ key.collection.0.wrapping_mul(0x9e3779b9));
        h as usize % self.num_bits
    }

    pub fn add_key(&mut self, key: &DocKey) {
        for seed in 0..self.num_hashes {
            let bit = self.bit_for(key, seed);
            self.bits[bit / 64] |= 1u64 << (bit % 64);
        }
        self.key_count += 1;
    }

    pub fn maybe_contains(&self, key: &DocKey) -> bool {
        (0..self.num_hashes).all(|seed| {
            let bit = self.bit_for(key, seed);
            self.bits[bit / 64] & (1u64 << (bit % 64)) != 0
        })
    }

    pub fn status(&self) -> FilterStatus {
        self.status
    }

    pub fn set_status(&mut self, status: FilterStatus) {
        self.status = status;
    }

    pub fn filter_size(&self) -> usize {
        self.num_bits
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }
}

/// The main filter plus the temporary filter populated while compaction
/// runs; the temp filter replaces the main one when compaction completes.
#[derive(Debug, Default)]
pub struct FilterPair {
    pub filter: Option<BloomFilter>,
    pub temp: Option<BloomFilter>,
}

impl FilterPair {
    /// Add `key` to the live filter, and to the temp filter when compaction
    /// is in flight.
    pub fn add_key(&mut self, key: &DocKey) {
        if let Some(f) = self.filter.as_mut() {
            f.add_key(key);
        }
        if let Some(t) = self.temp.as_mut() {
            t.add_key(key);
        }
    }

    /// With no filter present, every key may exist (the disk probe must go
    /// through).
    pub fn maybe_key_exists(&self, key: &DocKey) -> bool {
        match &self.filter {
            Some(f) => f.maybe_contains(key),
            None => true,
        }
    }

    /// Promote the temp filter built during compaction, unless it was
    /// disabled mid-compaction.
    pub fn swap(&mut self) {
        if let Some(temp) = self.temp.take() {
            self.filter = None;
            if matches!(
                temp.status(),
                FilterStatus::Compacting | FilterStatus::Enabled
            ) {
                let mut promoted = temp;
                promoted.set_status(FilterStatus::Enabled);
                self.filter = Some(promoted);
            }
        }
    }

    pub fn status_string(&self) -> String {
        match (&self.filter, &self.temp) {
            (Some(f), _) => f.status().as_str().to_string(),
            (None, Some(t)) => t.status().as_str().to_string(),
            (None, None) => "DOESN'T EXIST".to_string(),
        }
    }
}
