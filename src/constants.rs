use std::time::Duration;

// Size units
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;
pub const GB: usize = 1024 * MB;

// Size limits
pub const MAX_KEY_SIZE: usize = 250;
pub const MAX_VALUE_SIZE: usize = 20 * MB;
pub const DEFAULT_MAX_MEMORY: usize = GB;

// VBucket map configuration
pub const DEFAULT_NUM_VBUCKETS: u16 = 1024;
pub const MAX_VBUCKETS: u16 = 1024;

// Hash table configuration
pub const DEFAULT_HT_SIZE: usize = 3079;
pub const DEFAULT_HT_LOCKS: usize = 47;

// Memory watermarks, as fractions of max memory
pub const DEFAULT_MEM_LOW_WAT: f64 = 0.75;
pub const DEFAULT_MEM_HIGH_WAT: f64 = 0.85;

// Writes are refused once memory passes this fraction of max; replication
// writes get the relaxed replica ceiling instead.
pub const MUTATION_MEM_THRESHOLD: f64 = 0.93;
pub const REPLICATION_MEM_THRESHOLD: f64 = 0.99;

// Item pager
pub const DEFAULT_PAGER_SLEEP: Duration = Duration::from_millis(5000);
pub const DEFAULT_PAGER_ACTIVE_VB_PCNT: usize = 40;
pub const MAX_PERSISTENCE_QUEUE_SIZE: usize = 1_000_000;
pub const EVICTION_MULTIPLIER_INCREASE: f64 = 0.05;
pub const MAX_REPLICA_EVICTION_RATIO: f64 = 0.9;

// Expiry pager
pub const DEFAULT_EXP_PAGER_SLEEP: Duration = Duration::from_secs(600);

// Frequency-based eviction
pub const INITIAL_FREQ_COUNT: u8 = 64;
pub const MAX_FREQ_COUNT: u8 = u8::MAX;
pub const FREQ_LEARNING_LIMIT: u64 = 100;
pub const FREQ_UPDATE_INTERVAL: u64 = 10;

// 2-bit NRU reference tracking
pub const MIN_NRU_VALUE: u8 = 0;
pub const INITIAL_NRU_VALUE: u8 = 2;
pub const MAX_NRU_VALUE: u8 = 3;

// Checkpoints
pub const DEFAULT_CHECKPOINT_MAX_ITEMS: usize = 10_000;

// Durability
pub const MAX_CHAIN_SIZE: usize = 4;

// getLocked timeouts, seconds
pub const DEFAULT_LOCK_TIMEOUT: u32 = 15;
pub const MAX_LOCK_TIMEOUT: u32 = 30;

// Bloom filter defaults
pub const BLOOM_DEFAULT_KEY_COUNT: usize = 10_000;
pub const BLOOM_DEFAULT_PROBABILITY: f64 = 0.01;

// HLC drift thresholds, microseconds
pub const DEFAULT_HLC_DRIFT_AHEAD_US: u64 = 5_000_000;
pub const DEFAULT_HLC_DRIFT_BEHIND_US: u64 = 5_000_000;

// Datatype bitset
pub const DATATYPE_RAW: u8 = 0x00;
pub const DATATYPE_JSON: u8 = 0x01;
pub const DATATYPE_SNAPPY: u8 = 0x02;
pub const DATATYPE_XATTR: u8 = 0x04;

#[inline]
pub fn is_xattr(datatype: u8) -> bool {
    datatype & DATATYPE_XATTR != 0
}

#[inline]
pub fn is_snappy(datatype: u8) -> bool {
    datatype & DATATYPE_SNAPPY != 0
}

#[inline]
pub fn is_json(datatype: u8) -> bool {
    datatype & DATATYPE_JSON != 0
}
