use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::constants::*;

/// Where an expiration was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireBy {
    Access,
    Pager,
    Compactor,
}

/// Central statistics hub for the engine.
///
/// All mutation paths, the pagers and the durability monitors write here;
/// the control surface reads. Everything is a plain atomic so the hub can be
/// shared freely without locking.
#[derive(Debug)]
pub struct Statistics {
    // Engine-wide memory accounting
    pub memory_usage: AtomicUsize,
    pub max_memory: AtomicUsize,
    pub mem_low_wat: AtomicUsize,
    pub mem_high_wat: AtomicUsize,
    pub checkpoint_memory: AtomicUsize,

    // Operation counters
    pub total_gets: AtomicU64,
    pub total_sets: AtomicU64,
    pub total_deletes: AtomicU64,
    pub bg_fetches_scheduled: AtomicU64,

    // Expiry counters, by source
    pub expired_access: AtomicU64,
    pub expired_pager: AtomicU64,
    pub expired_compactor: AtomicU64,

    // Pager counters
    pub pager_runs: AtomicU64,
    pub expiry_pager_runs: AtomicU64,
    pub num_values_ejected: AtomicU64,
    pub items_removed_from_checkpoints: AtomicU64,

    // Conflict resolution
    pub set_meta_resolution_failed: AtomicU64,
    pub del_meta_resolution_failed: AtomicU64,

    // Durability
    pub sync_writes_committed: AtomicU64,
    pub sync_writes_aborted: AtomicU64,

    // Disk queue, written by queueing/flushing callbacks
    pub disk_queue_size: AtomicUsize,

    // Error counters
    pub oom_errors: AtomicU64,
    pub tmp_oom_errors: AtomicU64,
}

impl Statistics {
    pub fn new(max_memory: usize) -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            max_memory: AtomicUsize::new(max_memory),
            mem_low_wat: AtomicUsize::new((max_memory as f64 * DEFAULT_MEM_LOW_WAT) as usize),
            mem_high_wat: AtomicUsize::new((max_memory as f64 * DEFAULT_MEM_HIGH_WAT) as usize),
            checkpoint_memory: AtomicUsize::new(0),
            total_gets: AtomicU64::new(0),
            total_sets: AtomicU64::new(0),
            total_deletes: AtomicU64::new(0),
            bg_fetches_scheduled: AtomicU64::new(0),
            expired_access: AtomicU64::new(0),
            expired_pager: AtomicU64::new(0),
            expired_compactor: AtomicU64::new(0),
            pager_runs: AtomicU64::new(0),
            expiry_pager_runs: AtomicU64::new(0),
            num_values_ejected: AtomicU64::new(0),
            items_removed_from_checkpoints: AtomicU64::new(0),
            set_meta_resolution_failed: AtomicU64::new(0),
            del_meta_resolution_failed: AtomicU64::new(0),
            sync_writes_committed: AtomicU64::new(0),
            sync_writes_aborted: AtomicU64::new(0),
            disk_queue_size: AtomicUsize::new(0),
            oom_errors: AtomicU64::new(0),
            tmp_oom_errors: AtomicU64::new(0),
        }
    }

    pub fn set_watermarks(&self, low: usize, high: usize) {
        self.mem_low_wat.store(low, Ordering::Release);
        self.mem_high_wat.store(high, Ordering::Release);
    }

    /// Estimated total memory in use by stored values and checkpoints.
    pub fn estimated_total_memory_used(&self) -> usize {
        self.memory_usage.load(Ordering::Acquire)
            + self.checkpoint_memory.load(Ordering::Acquire)
    }

    pub fn is_memory_usage_too_high(&self) -> bool {
        self.estimated_total_memory_used() > self.mem_high_wat.load(Ordering::Acquire)
    }

    pub fn record_expired(&self, source: ExpireBy) {
        match source {
            ExpireBy::Access => self.expired_access.fetch_add(1, Ordering::Relaxed),
            ExpireBy::Pager => self.expired_pager.fetch_add(1, Ordering::Relaxed),
            ExpireBy::Compactor => self.expired_compactor.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Snapshot of current values for the control surface.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            memory_usage: self.memory_usage.load(Ordering::Relaxed),
            max_memory: self.max_memory.load(Ordering::Relaxed),
            mem_low_wat: self.mem_low_wat.load(Ordering::Relaxed),
            mem_high_wat: self.mem_high_wat.load(Ordering::Relaxed),
            checkpoint_memory: self.checkpoint_memory.load(Ordering::Relaxed),
            total_gets: self.total_gets.load(Ordering::Relaxed),
            total_sets: self.total_sets.load(Ordering::Relaxed),
            total_deletes: self.total_deletes.load(Ordering::Relaxed),
            expired_access: self.expired_access.load(Ordering::Relaxed),
            expired_pager: self.expired_pager.load(Ordering::Relaxed),
            expired_compactor: self.expired_compactor.load(Ordering::Relaxed),
            pager_runs: self.pager_runs.load(Ordering::Relaxed),
            expiry_pager_runs: self.expiry_pager_runs.load(Ordering::Relaxed),
            num_values_ejected: self.num_values_ejected.load(Ordering::Relaxed),
            items_removed_from_checkpoints: self
                .items_removed_from_checkpoints
                .load(Ordering::Relaxed),
            set_meta_resolution_failed: self.set_meta_resolution_failed.load(Ordering::Relaxed),
            del_meta_resolution_failed: self.del_meta_resolution_failed.load(Ordering::Relaxed),
            sync_writes_committed: self.sync_writes_committed.load(Ordering::Relaxed),
            sync_writes_aborted: self.sync_writes_aborted.load(Ordering::Relaxed),
            disk_queue_size: self.disk_queue_size.load(Ordering::Relaxed),
            oom_errors: self.oom_errors.load(Ordering::Relaxed),
            tmp_oom_errors: self.tmp_oom_errors.load(Ordering::Relaxed),
        }
    }

    /// Reset operation counters. Memory gauges and watermarks are live
    /// values and are left alone.
    pub fn reset(&self) {
        self.total_gets.store(0, Ordering::Relaxed);
        self.total_sets.store(0, Ordering::Relaxed);
        self.total_deletes.store(0, Ordering::Relaxed);
        self.bg_fetches_scheduled.store(0, Ordering::Relaxed);
        self.expired_access.store(0, Ordering::Relaxed);
        self.expired_pager.store(0, Ordering::Relaxed);
        self.expired_compactor.store(0, Ordering::Relaxed);
        self.pager_runs.store(0, Ordering::Relaxed);
        self.expiry_pager_runs.store(0, Ordering::Relaxed);
        self.num_values_ejected.store(0, Ordering::Relaxed);
        self.items_removed_from_checkpoints.store(0, Ordering::Relaxed);
        self.set_meta_resolution_failed.store(0, Ordering::Relaxed);
        self.del_meta_resolution_failed.store(0, Ordering::Relaxed);
        self.sync_writes_committed.store(0, Ordering::Relaxed);
        self.sync_writes_aborted.store(0, Ordering::Relaxed);
        self.oom_errors.store(0, Ordering::Relaxed);
        self.tmp_oom_errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`Statistics`].
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub memory_usage: usize,
    pub max_memory: usize,
    pub mem_low_wat: usize,
    pub mem_high_wat: usize,
    pub checkpoint_memory: usize,
    pub total_gets: u64,
    pub total_sets: u64,
    pub total_deletes: u64,
    pub expired_access: u64,
    pub expired_pager: u64,
    pub expired_compactor: u64,
    pub pager_runs: u64,
    pub expiry_pager_runs: u64,
    pub num_values_ejected: u64,
    pub items_removed_from_checkpoints: u64,
    pub set_meta_resolution_failed: u64,
    pub del_meta_resolution_failed: u64,
    pub sync_writes_committed: u64,
    pub sync_writes_aborted: u64,
    pub disk_queue_size: usize,
    pub oom_errors: u64,
    pub tmp_oom_errors: u64,
}
