use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::time;

/// Hybrid logical clock, one per vbucket.
///
/// CAS values are the wall clock in nanoseconds with the low 16 bits
/// masked off and used as a logical counter, so issuance is monotone even
/// when the wall clock stalls or steps backwards. Drift against remote CAS
/// values is only counted, never corrected.
#[derive(Debug)]
pub struct Hlc {
    max_cas: AtomicU64,
    epoch_seqno: i64,
    drift_ahead_threshold_us: u64,
    drift_behind_threshold_us: u64,
    drift_ahead_exceeded: AtomicU64,
    drift_behind_exceeded: AtomicU64,
    logical_clock_ticks: AtomicU64,
}

impl Hlc {
    pub fn new(
        initial_cas: u64,
        epoch_seqno: i64,
        drift_ahead_threshold_us: u64,
        drift_behind_threshold_us: u64,
    ) -> Self {
        Self {
            max_cas: AtomicU64::new(initial_cas),
            epoch_seqno,
            drift_ahead_threshold_us,
            drift_behind_threshold_us,
            drift_ahead_exceeded: AtomicU64::new(0),
            drift_behind_exceeded: AtomicU64::new(0),
            logical_clock_ticks: AtomicU64::new(0),
        }
    }

    /// Issue the next CAS.
    pub fn next_cas(&self) -> u64 {
        loop {
            let current = self.max_cas.load(Ordering::Acquire);
            let wall = time::epoch_nanos() & !0xffff;
            let candidate = if wall > current {
                wall
            } else {
                self.logical_clock_ticks.fetch_add(1, Ordering::Relaxed);
                current + 1
            };
            if self
                .max_cas
                .compare_exchange_weak(current, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    pub fn max_cas(&self) -> u64 {
        self.max_cas.load(Ordering::Acquire)
    }

    /// Fold a remote CAS into the clock (replica and withMeta paths).
    pub fn set_max_cas(&self, cas: u64) {
        let mut cur = self.max_cas.load(Ordering::Acquire);
        while cas > cur {
            match self
                .max_cas
                .compare_exchange_weak(cur, cas, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(now) => cur = now,
            }
        }
    }

    /// Fold a remote CAS in and account how far its wall-clock component
    /// drifts from ours.
    pub fn set_max_cas_and_track_drift(&self, cas: u64) {
        let local_wall = time::epoch_nanos();
        let remote_wall = cas & !0xffff;
        if remote_wall > local_wall
            && remote_wall - local_wall > self.drift_ahead_threshold_us * 1000
        {
            self.drift_ahead_exceeded.fetch_add(1, Ordering::Relaxed);
        } else if local_wall > remote_wall
            && local_wall - remote_wall > self.drift_behind_threshold_us * 1000
        {
            self.drift_behind_exceeded.fetch_add(1, Ordering::Relaxed);
        }
        self.set_max_cas(cas);
    }

    pub fn epoch_seqno(&self) -> i64 {
        self.epoch_seqno
    }

    pub fn drift_ahead_exceeded(&self) -> u64 {
        self.drift_ahead_exceeded.load(Ordering::Relaxed)
    }

    pub fn drift_behind_exceeded(&self) -> u64 {
        self.drift_behind_exceeded.load(Ordering::Relaxed)
    }

    pub fn logical_clock_ticks(&self) -> u64 {
        self.logical_clock_ticks.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.drift_ahead_exceeded.store(0, Ordering::Relaxed);
        self.drift_behind_exceeded.store(0, Ordering::Relaxed);
        self.logical_clock_ticks.store(0, Ordering::Relaxed);
    }
}
