use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::core::eviction;
use crate::core::item::{DocKey, Item};
use crate::core::stored_value::StoredValue;
use crate::stats::Statistics;

/// How values leave memory under pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Only the value is ejected; metadata stays resident.
    ValueOnly,
    /// The whole entry may be removed; keys can be absent from the table.
    FullEviction,
}

/// Whether a lookup should return deleted (tombstone) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WantsDeleted {
    Yes,
    No,
}

/// Whether a lookup counts as a reference for eviction purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReference {
    Yes,
    No,
}

/// Outcome of a visitor callback for one stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Keep,
    Eject,
}

struct Stripe {
    // Chains for the buckets this stripe's lock covers; bucket b lives at
    // chains[b / num_locks] within stripe b % num_locks.
    chains: Vec<Vec<StoredValue>>,
}

/// Witness that the stripe lock covering one hash bucket is held.
///
/// Every find/mutate entry point requires a `HashBucketLock`, so the
/// "StoredValue access implies lock held" invariant is enforced by the
/// borrow checker rather than by convention.
pub struct HashBucketLock<'a> {
    guard: MutexGuard<'a, Stripe>,
    bucket: usize,
    chain: usize,
}

impl HashBucketLock<'_> {
    pub fn bucket_num(&self) -> usize {
        self.bucket
    }
}

/// Striped-lock hash table of stored values.
///
/// `num_buckets` buckets share `num_locks` mutexes (`bucket mod locks`);
/// aggregate counters are atomics so they can be read without any lock.
pub struct HashTable {
    stripes: Box<[Mutex<Stripe>]>,
    num_buckets: usize,
    policy: EvictionPolicy,
    stats: Arc<Statistics>,

    num_items: AtomicUsize,
    num_temp_items: AtomicUsize,
    num_deleted_items: AtomicUsize,
    num_non_resident: AtomicUsize,
    num_ejects: AtomicU64,
    mem_size: AtomicUsize,
    meta_size: AtomicUsize,
    max_deleted_rev_seqno: AtomicU64,
}

/// Classification of one stored value for counter maintenance.
#[derive(Clone, Copy, Default)]
struct ValueStats {
    present: bool,
    size: usize,
    meta: usize,
    temp: bool,
    deleted: bool,
    non_resident: bool,
}

impl ValueStats {
    fn of(v: &StoredValue) -> Self {
        Self {
            present: true,
            size: v.size(),
            meta: v.metadata_size(),
            temp: v.is_temp_item(),
            deleted: v.is_deleted() && !v.is_temp_item(),
            non_resident: !v.is_resident() && !v.is_temp_item(),
        }
    }

    fn alive(&self) -> bool {
        self.present && !self.temp && !self.deleted
    }
}

impl HashTable {
    pub fn new(
        num_buckets: usize,
        num_locks: usize,
        policy: EvictionPolicy,
        stats: Arc<Statistics>,
    ) -> Self {
        assert!(num_buckets > 0 && num_locks > 0);
        let num_locks = num_locks.min(num_buckets);
        let chains_per_stripe = num_buckets.div_ceil(num_locks);
        let stripes = (0..num_locks)
            .map(|_| {
                Mutex::new(Stripe {
                    chains: (0..chains_per_stripe).map(|_| Vec::new()).collect(),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            stripes,
            num_buckets,
            policy,
            stats,
            num_items: AtomicUsize::new(0),
            num_temp_items: AtomicUsize::new(0),
            num_deleted_items: AtomicUsize::new(0),
            num_non_resident: AtomicUsize::new(0),
            num_ejects: AtomicU64::new(0),
            mem_size: AtomicUsize::new(0),
            meta_size: AtomicUsize::new(0),
            max_deleted_rev_seqno: AtomicU64::new(0),
        }
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Acquire the stripe lock covering `key`'s bucket.
    pub fn locked_bucket(&self, key: &DocKey) -> HashBucketLock<'_> {
        let bucket = key.hash() as usize % self.num_buckets;
        self.lock_bucket_num(bucket)
    }

    fn lock_bucket_num(&self, bucket: usize) -> HashBucketLock<'_> {
        let stripe = bucket % self.stripes.len();
        let chain = bucket / self.stripes.len();
        HashBucketLock {
            guard: self.stripes[stripe].lock(),
            bucket,
            chain,
        }
    }

    /// Find the stored value for `key` in the locked bucket.
    pub fn find<'a>(
        &self,
        lock: &'a mut HashBucketLock<'_>,
        key: &DocKey,
        wants_deleted: WantsDeleted,
        track_reference: TrackReference,
    ) -> Option<&'a mut StoredValue> {
        let chain = lock.chain;
        let v = lock.guard.chains[chain]
            .iter_mut()
            .find(|v| v.key() == key)?;
        if v.is_deleted() && wants_deleted == WantsDeleted::No {
            return None;
        }
        if track_reference == TrackReference::Yes && !v.is_deleted() {
            v.referenced();
            let freq = v.freq_counter();
            let bumped = eviction::approximate_increment(freq, &mut rand::rng());
            v.set_freq_counter(bumped);
        }
        Some(v)
    }

    /// Insert a brand new stored value built from `itm`.
    ///
    /// Panics if the key is already present: callers decide create-vs-update
    /// before reaching here.
    pub fn add_new<'a>(
        &self,
        lock: &'a mut HashBucketLock<'_>,
        itm: &Item,
    ) -> &'a mut StoredValue {
        let chain = lock.chain;
        assert!(
            !lock.guard.chains[chain].iter().any(|v| v.key() == &itm.key),
            "HashTable::add_new: key already present in bucket {}",
            lock.bucket
        );
        let v = StoredValue::new(itm);
        self.apply_delta(ValueStats::default(), ValueStats::of(&v));
        lock.guard.chains[chain].push(v);
        lock.guard.chains[chain].last_mut().unwrap()
    }

    /// Mutate the stored value for `key` through `f`, keeping the aggregate
    /// counters consistent with whatever the closure did to it.
    pub fn mutate<R>(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        f: impl FnOnce(&mut StoredValue) -> R,
    ) -> Option<R> {
        let chain = lock.chain;
        let v = lock.guard.chains[chain]
            .iter_mut()
            .find(|v| v.key() == key)?;
        let before = ValueStats::of(v);
        let r = f(v);
        let after = ValueStats::of(v);
        self.apply_delta(before, after);
        Some(r)
    }

    /// Remove the stored value for `key` outright.
    pub fn delete(&self, lock: &mut HashBucketLock<'_>, key: &DocKey) -> bool {
        let chain = lock.chain;
        let Some(pos) = lock.guard.chains[chain]
            .iter()
            .position(|v| v.key() == key)
        else {
            return false;
        };
        let v = lock.guard.chains[chain].swap_remove(pos);
        self.apply_delta(ValueStats::of(&v), ValueStats::default());
        true
    }

    /// Page the value for `key` out of memory per the table's eviction
    /// policy. Only clean, resident, non-deleted, non-temp values are
    /// eligible.
    pub fn eject(&self, lock: &mut HashBucketLock<'_>, key: &DocKey) -> bool {
        let chain = lock.chain;
        let Some(pos) = lock.guard.chains[chain]
            .iter()
            .position(|v| v.key() == key)
        else {
            return false;
        };
        {
            let v = &lock.guard.chains[chain][pos];
            if v.is_dirty() || v.is_deleted() || v.is_temp_item() || !v.is_resident() {
                return false;
            }
        }
        match self.policy {
            EvictionPolicy::ValueOnly => {
                let v = &mut lock.guard.chains[chain][pos];
                let before = ValueStats::of(v);
                v.eject_value();
                let after = ValueStats::of(v);
                self.apply_delta(before, after);
            }
            EvictionPolicy::FullEviction => {
                let v = lock.guard.chains[chain].swap_remove(pos);
                self.apply_delta(ValueStats::of(&v), ValueStats::default());
            }
        }
        self.num_ejects.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Walk every stored value, applying the action the visitor returns.
    /// Returns the number of values ejected during the walk.
    pub fn visit<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut StoredValue) -> VisitAction,
    {
        let mut ejected = 0;
        for stripe in self.stripes.iter() {
            let mut guard = stripe.lock();
            for chain in guard.chains.iter_mut() {
                let mut i = 0;
                while i < chain.len() {
                    let v = &mut chain[i];
                    let before = ValueStats::of(v);
                    let action = f(v);
                    match action {
                        VisitAction::Keep => {
                            let after = ValueStats::of(v);
                            self.apply_delta(before, after);
                            i += 1;
                        }
                        VisitAction::Eject => {
                            if v.is_dirty()
                                || v.is_deleted()
                                || v.is_temp_item()
                                || !v.is_resident()
                            {
                                let after = ValueStats::of(v);
                                self.apply_delta(before, after);
                                i += 1;
                                continue;
                            }
                            match self.policy {
                                EvictionPolicy::ValueOnly => {
                                    v.eject_value();
                                    let after = ValueStats::of(v);
                                    self.apply_delta(before, after);
                                    i += 1;
                                }
                                EvictionPolicy::FullEviction => {
                                    let v = chain.swap_remove(i);
                                    self.apply_delta(ValueStats::of(&v), ValueStats::default());
                                }
                            }
                            self.num_ejects.fetch_add(1, Ordering::Relaxed);
                            ejected += 1;
                        }
                    }
                }
            }
        }
        ejected
    }

    fn apply_delta(&self, before: ValueStats, after: ValueStats) {
        match (before.alive(), after.alive()) {
            (false, true) => {
                self.num_items.fetch_add(1, Ordering::AcqRel);
            }
            (true, false) => {
                self.num_items.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
        match (before.present && before.temp, after.present && after.temp) {
            (false, true) => {
                self.num_temp_items.fetch_add(1, Ordering::AcqRel);
            }
            (true, false) => {
                self.num_temp_items.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
        match (before.deleted, after.deleted) {
            (false, true) => {
                self.num_deleted_items.fetch_add(1, Ordering::AcqRel);
            }
            (true, false) => {
                self.num_deleted_items.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
        match (before.non_resident, after.non_resident) {
            (false, true) => {
                self.num_non_resident.fetch_add(1, Ordering::AcqRel);
            }
            (true, false) => {
                self.num_non_resident.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
        if after.size > before.size {
            let delta = after.size - before.size;
            self.mem_size.fetch_add(delta, Ordering::AcqRel);
            self.stats.memory_usage.fetch_add(delta, Ordering::AcqRel);
        } else {
            let delta = before.size - after.size;
            self.mem_size.fetch_sub(delta, Ordering::AcqRel);
            self.stats.memory_usage.fetch_sub(delta, Ordering::AcqRel);
        }
        if after.meta > before.meta {
            self.meta_size.fetch_add(after.meta - before.meta, Ordering::AcqRel);
        } else {
            self.meta_size.fetch_sub(before.meta - after.meta, Ordering::AcqRel);
        }
    }

    // --- counters ---

    pub fn num_items(&self) -> usize {
        self.num_items.load(Ordering::Acquire)
    }

    pub fn num_temp_items(&self) -> usize {
        self.num_temp_items.load(Ordering::Acquire)
    }

    pub fn num_deleted_items(&self) -> usize {
        self.num_deleted_items.load(Ordering::Acquire)
    }

    pub fn num_non_resident(&self) -> usize {
        self.num_non_resident.load(Ordering::Acquire)
    }

    pub fn num_ejects(&self) -> u64 {
        self.num_ejects.load(Ordering::Acquire)
    }

    pub fn mem_size(&self) -> usize {
        self.mem_size.load(Ordering::Acquire)
    }

    pub fn meta_size(&self) -> usize {
        self.meta_size.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.num_buckets
    }

    pub fn max_deleted_rev_seqno(&self) -> u64 {
        self.max_deleted_rev_seqno.load(Ordering::Acquire)
    }

    /// Advance the greatest deleted revision seen, monotonically.
    pub fn update_max_deleted_rev_seqno(&self, candidate: u64) {
        let mut cur = self.max_deleted_rev_seqno.load(Ordering::Acquire);
        while candidate > cur {
            match self.max_deleted_rev_seqno.compare_exchange_weak(
                cur,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(now) => cur = now,
            }
        }
    }

    /// Fraction of non-temp items whose value is resident.
    pub fn resident_ratio(&self) -> f64 {
        let items = self.num_items() + self.num_deleted_items();
        if items == 0 {
            return 1.0;
        }
        let non_res = self.num_non_resident().min(items);
        (items - non_res) as f64 / items as f64
    }
}
