use rand::Rng;

use crate::constants::*;

/// Pass-local data for selecting values to evict: a histogram of the 8-bit
/// frequency counters sampled so far, and the cadence at which the derived
/// threshold is refreshed.
#[derive(Debug)]
pub struct ItemEviction {
    counts: [u64; 256],
    total: u64,
    next_update: u64,
}

impl Default for ItemEviction {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemEviction {
    pub fn new() -> Self {
        Self {
            counts: [0; 256],
            total: 0,
            next_update: FREQ_LEARNING_LIMIT,
        }
    }

    pub fn add_freq_value(&mut self, v: u8) {
        self.counts[v as usize] += 1;
        self.total += 1;
    }

    pub fn value_count(&self) -> u64 {
        self.total
    }

    pub fn reset(&mut self) {
        self.counts = [0; 256];
        self.total = 0;
        self.next_update = FREQ_LEARNING_LIMIT;
    }

    /// While the sample is small every addition should refresh the
    /// threshold; afterwards refreshes happen every `FREQ_UPDATE_INTERVAL`
    /// samples.
    pub fn is_learning(&self) -> bool {
        self.total <= FREQ_LEARNING_LIMIT
    }

    pub fn is_required_to_update(&mut self) -> bool {
        if self.total >= self.next_update {
            self.next_update = self.total + FREQ_UPDATE_INTERVAL;
            return true;
        }
        false
    }

    /// Frequency-counter value at the given percentile (0-100) of the
    /// sampled distribution.
    pub fn freq_threshold(&self, percentile: f64) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let target = ((percentile / 100.0) * self.total as f64).ceil() as u64;
        let mut acc = 0u64;
        for (value, &count) in self.counts.iter().enumerate() {
            acc += count;
            if acc >= target {
                return value as u8;
            }
        }
        u8::MAX
    }
}

/// Map a frequency counter onto the legacy 4-level NRU scale for
/// reporting. New values start at 64, so the coldest band stops just
/// below it.
pub fn freq_to_nru(freq: u8) -> u8 {
    if freq >= 192 {
        MIN_NRU_VALUE // hottest
    } else if freq >= 128 {
        1
    } else if freq >= 64 {
        INITIAL_NRU_VALUE
    } else {
        MAX_NRU_VALUE // coldest
    }
}

/// Probabilistic saturating increment of an 8-bit frequency counter.
///
/// The counter approximates a 16-bit access count in 8 visible bits: the
/// higher the counter, the lower the chance an access bumps it. Any
/// schedule monotone in access count with diminishing probability is
/// acceptable; this one increments with probability 1/(counter/4 + 1).
pub fn approximate_increment<R: Rng>(counter: u8, rng: &mut R) -> u8 {
    if counter == MAX_FREQ_COUNT {
        return counter;
    }
    let denominator = (counter as u32 / 4) + 1;
    if rng.random_range(0..denominator) == 0 {
        counter + 1
    } else {
        counter
    }
}
