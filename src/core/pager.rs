use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info};

use crate::constants::*;
use crate::core::engine::EmberEngine;
use crate::core::eviction::ItemEviction;
use crate::core::hash_table::{EvictionPolicy, VisitAction};
use crate::core::item::{DocKey, Item};
use crate::core::vbucket::{VBucket, VBucketState};
use crate::stats::ExpireBy;
use crate::utils::time;

/// Per-item selection algorithm the item pager runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerAlgorithm {
    /// Frequency-histogram percentile threshold.
    StatisticalCounter,
    /// Two-phase 2-bit NRU walk.
    Lru2Bit,
}

/// Phase of the 2-bit-LRU walk; phases alternate on pass completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerPhase {
    Unreferenced,
    Random,
}

/// Shared item-pager state living on the engine: the single-flight latch,
/// the wake flag, the LRU phase and the eviction multiplier carried across
/// passes.
pub struct PagerState {
    available: AtomicBool,
    expiry_available: AtomicBool,
    notified: AtomicBool,
    do_evict: AtomicBool,
    phase: AtomicU8,
    eviction_multiplier: Mutex<f64>,
    active_bias: f64,
    algorithm: PagerAlgorithm,
}

impl PagerState {
    pub fn new(active_vb_pcnt: usize, algorithm: PagerAlgorithm) -> Self {
        Self {
            available: AtomicBool::new(true),
            expiry_available: AtomicBool::new(true),
            notified: AtomicBool::new(false),
            do_evict: AtomicBool::new(false),
            phase: AtomicU8::new(0),
            eviction_multiplier: Mutex::new(0.0),
            active_bias: active_vb_pcnt as f64 / 50.0,
            algorithm,
        }
    }

    /// Coalescing wake request.
    pub fn schedule_now(&self) {
        self.notified.store(true, Ordering::Release);
    }

    pub fn phase(&self) -> PagerPhase {
        if self.phase.load(Ordering::Acquire) == 0 {
            PagerPhase::Unreferenced
        } else {
            PagerPhase::Random
        }
    }

    fn toggle_phase(&self) {
        self.phase.fetch_xor(1, Ordering::AcqRel);
    }

    pub fn eviction_multiplier(&self) -> f64 {
        *self.eviction_multiplier.lock()
    }

    #[cfg(test)]
    pub(crate) fn test_hold_latch(&self) -> bool {
        self.available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn test_release_latch(&self) {
        self.available.store(true, Ordering::Release);
    }
}

/// Visits vbuckets and their hash tables, batching expired items for
/// soft deletion and, when run by the item pager, ejecting values chosen
/// by the configured algorithm.
struct PagingVisitor<'e> {
    engine: &'e EmberEngine,
    is_item_pager: bool,
    can_pause: bool,
    start_time: u32,

    // Eviction inputs, adjusted per vbucket
    percent: f64,
    base_to_kill: f64,
    base_eviction_percent: f64,
    bias: f64,
    phase: PagerPhase,

    item_eviction: ItemEviction,
    freq_threshold: u8,

    expired: Vec<(u16, Item)>,
    ejected: usize,
    complete_phase: bool,
    stopped: bool,
}

impl<'e> PagingVisitor<'e> {
    fn item_pager(
        engine: &'e EmberEngine,
        to_kill: f64,
        eviction_percent: f64,
        bias: f64,
        phase: PagerPhase,
    ) -> Self {
        Self {
            engine,
            is_item_pager: true,
            can_pause: false,
            start_time: time::epoch_secs(),
            percent: 0.0,
            base_to_kill: to_kill,
            base_eviction_percent: eviction_percent,
            bias,
            phase,
            item_eviction: ItemEviction::new(),
            freq_threshold: 0,
            expired: Vec::new(),
            ejected: 0,
            complete_phase: true,
            stopped: false,
        }
    }

    fn expiry_pager(engine: &'e EmberEngine) -> Self {
        Self {
            engine,
            is_item_pager: false,
            can_pause: true,
            start_time: time::epoch_secs(),
            percent: 0.0,
            base_to_kill: 0.0,
            base_eviction_percent: 0.0,
            bias: 1.0,
            phase: PagerPhase::Unreferenced,
            item_eviction: ItemEviction::new(),
            freq_threshold: 0,
            expired: Vec::new(),
            ejected: 0,
            complete_phase: true,
            stopped: false,
        }
    }

    /// Replica and dead vbuckets evict more aggressively than actives,
    /// capped so a single pass never strips a replica bare.
    fn adjust_percent(&mut self, prob: f64, state: VBucketState) {
        if matches!(state, VBucketState::Replica | VBucketState::Dead) {
            let p = prob * (2.0 - self.bias);
            self.percent = p.min(MAX_REPLICA_EVICTION_RATIO);
        } else {
            self.percent = prob * self.bias;
        }
    }

    fn visit_bucket(&mut self, vb: &Arc<VBucket>) {
        self.flush_expired();
        // Closed, unreferenced checkpoints free memory without evicting
        // anything; always reclaim those first.
        vb.checkpoint_manager().remove_closed_unref_checkpoints();

        if !self.is_item_pager {
            self.visit_hash_table(vb);
            return;
        }

        let stats = self.engine.stats();
        let current = stats.estimated_total_memory_used() as f64;
        let lower = stats.mem_low_wat.load(Ordering::Acquire) as f64;
        let high = stats.mem_high_wat.load(Ordering::Acquire) as f64;
        let state = vb.get_state();

        // Active vbuckets already paged harder than the replicas are left
        // alone while memory is below the high watermark.
        if state == VBucketState::Active
            && current < high
            && self.engine.active_resident_ratio() < self.engine.replica_resident_ratio()
        {
            return;
        }

        if current > lower {
            self.adjust_percent(self.base_to_kill, state);
            self.item_eviction.reset();
            self.freq_threshold = 0;
            if self.engine.pager.algorithm == PagerAlgorithm::StatisticalCounter {
                // The percentile of the frequency histogram is selected
                // from the eviction-percent estimate, biased by state.
                self.adjust_percent(self.base_eviction_percent, state);
            }
            self.visit_hash_table(vb);
            vb.checkpoint_manager().remove_closed_unref_checkpoints();
        } else {
            // Memory dropped below the low watermark mid-pass: stop, and
            // leave the phase unchanged.
            self.complete_phase = false;
            self.stopped = true;
        }
    }

    fn visit_hash_table(&mut self, vb: &Arc<VBucket>) {
        let vbid = vb.id();
        let state = vb.get_state();
        let algorithm = self.engine.pager.algorithm;
        let full_eviction = vb.ht.eviction_policy() == EvictionPolicy::FullEviction;
        let mut rng = rand::rng();
        let mut ejected_keys: Vec<DocKey> = Vec::new();

        let start_time = self.start_time;
        let is_item_pager = self.is_item_pager;
        let percent = self.percent;
        let phase = self.phase;
        let expired = &mut self.expired;
        let item_eviction = &mut self.item_eviction;
        let freq_threshold = &mut self.freq_threshold;
        let mut ejected = 0usize;

        vb.ht.visit(|v| {
            let is_expired =
                state == VBucketState::Active && v.is_expired(start_time) && !v.is_deleted();
            if is_expired || v.is_temp_non_existent_item() || v.is_temp_deleted_item() {
                expired.push((vbid, v.to_item(false)));
                return VisitAction::Keep;
            }

            if !is_item_pager || percent <= 0.0 {
                return VisitAction::Keep;
            }

            // Mirror the ejection eligibility test so the bloom filter only
            // learns keys that actually leave.
            let eligible =
                !v.is_dirty() && !v.is_deleted() && !v.is_temp_item() && v.is_resident();

            match algorithm {
                PagerAlgorithm::Lru2Bit => {
                    let r: f64 = rng.random();
                    if phase == PagerPhase::Unreferenced && v.nru() == MAX_NRU_VALUE {
                        if eligible {
                            ejected += 1;
                            ejected_keys.push(v.key().clone());
                            return VisitAction::Eject;
                        }
                    } else if phase == PagerPhase::Random
                        && v.incr_nru() == MAX_NRU_VALUE
                        && r <= percent
                        && eligible
                    {
                        ejected += 1;
                        ejected_keys.push(v.key().clone());
                        return VisitAction::Eject;
                    }
                    VisitAction::Keep
                }
                PagerAlgorithm::StatisticalCounter => {
                    item_eviction.add_freq_value(v.freq_counter());
                    // Whilst learning it is worth always updating the
                    // threshold; afterwards refresh periodically.
                    if item_eviction.is_learning() || item_eviction.is_required_to_update() {
                        *freq_threshold =
                            item_eviction.freq_threshold((percent * 100.0).ceil());
                    }
                    if v.freq_counter() <= *freq_threshold && eligible {
                        ejected += 1;
                        ejected_keys.push(v.key().clone());
                        return VisitAction::Eject;
                    }
                    VisitAction::Keep
                }
            }
        });

        self.ejected += ejected;
        if ejected > 0 {
            self.engine
                .stats()
                .num_values_ejected
                .fetch_add(ejected as u64, Ordering::Relaxed);
        }
        if full_eviction {
            for key in ejected_keys {
                vb.add_to_filter(&key);
            }
        }

        // Let persistence catch up before moving to the next vbucket.
        if self.can_pause
            && self.engine.stats().disk_queue_size.load(Ordering::Acquire)
                >= MAX_PERSISTENCE_QUEUE_SIZE
        {
            std::thread::yield_now();
        }
    }

    /// Soft-delete the expired batch collected so far.
    fn flush_expired(&mut self) {
        if self.expired.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.expired);
        let count = batch.len();
        for (vbid, item) in batch {
            if let Ok(vb) = self.engine.get_vbucket(vbid) {
                vb.delete_expired_item(&item, self.start_time, ExpireBy::Pager);
            }
        }
        debug!(count, "pager: purged expired items");
    }

    fn complete(mut self) -> bool {
        self.flush_expired();
        if self.ejected > 0 {
            info!(ejected = self.ejected, "pager: paged out values");
        }
        self.complete_phase
    }
}

/// One item-pager pass: runs only when memory demands it and the
/// single-flight latch is free. Returns whether a pass actually ran.
pub fn item_pager_pass(engine: &EmberEngine) -> bool {
    let pager = &engine.pager;
    let stats = engine.stats();

    let current = stats.estimated_total_memory_used() as f64;
    let upper = stats.mem_high_wat.load(Ordering::Acquire) as f64;
    let lower = stats.mem_low_wat.load(Ordering::Acquire) as f64;

    if current <= lower {
        pager.do_evict.store(false, Ordering::Release);
    }

    // Memory may have dipped just below the high watermark since the wake
    // was requested; a notified pager still pages.
    let was_notified = pager.notified.swap(false, Ordering::AcqRel);
    let should_run =
        current > upper || pager.do_evict.load(Ordering::Acquire) || was_notified;
    if !should_run {
        return false;
    }
    if pager
        .available
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }

    if engine.config().eviction_policy == EvictionPolicy::ValueOnly {
        pager.do_evict.store(true, Ordering::Release);
    }

    stats.pager_runs.fetch_add(1, Ordering::Relaxed);

    let to_kill = (current - lower) / current;
    let multiplier = *pager.eviction_multiplier.lock();
    let eviction_percent = to_kill * (1.0 + multiplier);
    info!(
        mem_used = current as usize,
        to_kill, eviction_percent, "pager: starting eviction pass"
    );

    let mut visitor = PagingVisitor::item_pager(
        engine,
        to_kill,
        eviction_percent,
        pager.active_bias,
        pager.phase(),
    );
    for vbid in engine.vbucket_ids() {
        if let Ok(vb) = engine.get_vbucket(vbid) {
            visitor.visit_bucket(&vb);
        }
        if visitor.stopped {
            break;
        }
    }
    let complete_phase = visitor.complete();

    if complete_phase {
        pager.toggle_phase();
        // Every eligible value was visited yet memory did not reach the
        // low watermark: estimate higher next pass.
        *pager.eviction_multiplier.lock() += EVICTION_MULTIPLIER_INCREASE;
    } else {
        // The pass stopped early because memory fell below the low
        // watermark; the estimate was sufficient.
        *pager.eviction_multiplier.lock() = 0.0;
    }

    // Signal completion before re-evaluating memory so a concurrent wake
    // is not swallowed.
    pager.available.store(true, Ordering::Release);
    engine.check_and_maybe_free_memory();
    true
}

/// One expiry-pager pass over every vbucket. Returns whether it ran.
pub fn expiry_pager_pass(engine: &EmberEngine) -> bool {
    let pager = &engine.pager;
    if pager
        .expiry_available
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }
    engine
        .stats()
        .expiry_pager_runs
        .fetch_add(1, Ordering::Relaxed);

    let mut visitor = PagingVisitor::expiry_pager(engine);
    for vbid in engine.vbucket_ids() {
        if let Ok(vb) = engine.get_vbucket(vbid) {
            visitor.visit_bucket(&vb);
        }
    }
    visitor.complete();
    pager.expiry_available.store(true, Ordering::Release);
    true
}

/// Handle to a background pager thread.
pub struct PagerTask {
    shutdown: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PagerTask {
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PagerTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_pager_loop(
    name: &str,
    engine: Weak<EmberEngine>,
    sleep: Duration,
    pass: fn(&EmberEngine) -> bool,
) -> PagerTask {
    let (wake_tx, wake_rx): (Sender<()>, Receiver<()>) = bounded(1);
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();

    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            // A wake message interrupts the sleep; a timeout is the
            // periodic schedule.
            let _ = wake_rx.recv_timeout(sleep);
            if shutdown_flag.load(Ordering::Acquire) {
                break;
            }
            let Some(engine) = engine.upgrade() else {
                break;
            };
            pass(&engine);
        })
        .expect("failed to spawn pager thread");

    PagerTask {
        shutdown,
        wake_tx,
        handle: Some(handle),
    }
}

pub fn spawn_item_pager(engine: Weak<EmberEngine>, sleep: Duration) -> PagerTask {
    spawn_pager_loop("ember-item-pager", engine, sleep, item_pager_pass)
}

pub fn spawn_expiry_pager(engine: Weak<EmberEngine>, sleep: Duration) -> PagerTask {
    spawn_pager_loop("ember-expiry-pager", engine, sleep, expiry_pager_pass)
}
