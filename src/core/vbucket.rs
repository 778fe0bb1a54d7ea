use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::*;
use crate::core::bloom::{BloomFilter, FilterPair, FilterStatus};
use crate::core::checkpoint::{
    CheckpointManager, GenerateBySeqno, GenerateCas, QueueOp, QueuedItem,
};
use crate::core::collections::{
    CollectionsManifest, Manifest, SystemEventKind,
};
use crate::core::conflict::{make_resolver, ConflictResolutionMode, ConflictResolver};
use crate::core::durability::DurabilityMonitor;
use crate::core::failover::FailoverTable;
use crate::core::hash_table::{
    EvictionPolicy, HashBucketLock, HashTable, TrackReference, WantsDeleted,
};
use crate::core::hlc::Hlc;
use crate::core::item::{CollectionId, DocKey, DurabilityRequirements, Item, ItemMeta};
use crate::core::stored_value::STATE_TEMP_INIT;
use crate::error::{EmberError, Result};
use crate::stats::{ExpireBy, Statistics};
use crate::utils::{time, xattr};

/// Replication role of a vbucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VBucketState {
    Active,
    Replica,
    Pending,
    Dead,
}

impl VBucketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VBucketState::Active => "active",
            VBucketState::Replica => "replica",
            VBucketState::Pending => "pending",
            VBucketState::Dead => "dead",
        }
    }
}

/// What a completed mutation wants the engine to notify.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyCtx {
    pub notify_flusher: bool,
    pub notify_replication: bool,
    pub by_seqno: i64,
}

/// Callback invoked, with no hash-bucket lock held, whenever a vbucket
/// assigns a new seqno.
pub type SeqnoCallback = Box<dyn Fn(u16, &NotifyCtx) + Send + Sync>;

/// Per-item queueing context threaded from the public entry points down to
/// the checkpoint.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueItemCtx {
    pub gen_by_seqno: GenerateBySeqno,
    pub gen_cas: GenerateCas,
    pub track_cas_drift: bool,
}

impl QueueItemCtx {
    fn generated() -> Self {
        Self {
            gen_by_seqno: GenerateBySeqno::Yes,
            gen_cas: GenerateCas::Yes,
            track_cas_drift: false,
        }
    }
}

/// Outcome of the slot-level mutation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationStatus {
    NoMem,
    InvalidCas,
    IsLocked,
    NotFound,
    WasClean,
    WasDirty,
    NeedBgFetch,
}

/// Outcome of the add state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddStatus {
    Success,
    UnDel,
    NoMem,
    Exists,
    AddTmpAndBgFetch,
    BgFetch,
}

/// Per-key metadata returned by `get_key_stats`.
#[derive(Debug, Clone, Copy)]
pub struct KeyStats {
    pub logically_deleted: bool,
    pub dirty: bool,
    pub resident: bool,
    pub exptime: u32,
    pub flags: u32,
    pub cas: u64,
    pub vb_state: VBucketState,
}

/// Result of the background disk probe resolving a temp item.
#[derive(Debug, Clone)]
pub enum BgFetchResult {
    Found(Item),
    NotFound,
}

/// Options for the read path.
#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    pub track_reference: TrackReference,
    pub get_deleted_value: bool,
    /// Expired values found by this read are soft-deleted (active vbuckets
    /// only). Read-only call sites (backup, replication) opt out.
    pub queue_expired: bool,
    pub hide_locked_cas: bool,
    pub delete_temp: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            track_reference: TrackReference::Yes,
            get_deleted_value: false,
            queue_expired: true,
            hide_locked_cas: true,
            delete_temp: true,
        }
    }
}

/// The persisted per-vbucket state record handed to the flusher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VBucketStateRecord {
    pub state: VBucketState,
    pub persistence_checkpoint_id: u64,
    pub high_seqno: i64,
    pub purge_seqno: u64,
    pub snap_start: u64,
    pub snap_end: u64,
    pub max_cas: u64,
    pub hlc_epoch_seqno: i64,
    pub failover_log: String,
    pub collections_manifest: String,
}

/// Snapshot of one slot taken under the bucket lock, feeding the decision
/// tables without holding a borrow into the table.
#[derive(Debug, Clone, Copy)]
struct SlotView {
    cas: u64,
    rev_seqno: u64,
    dirty: bool,
    deleted: bool,
    locked: bool,
    temp_init: bool,
    temp_deleted: bool,
    temp_non_existent: bool,
    temp: bool,
    expired: bool,
    resident: bool,
    datatype: u8,
    has_value: bool,
}

/// Static construction parameters for a vbucket.
pub struct VBucketSpec {
    pub id: u16,
    pub state: VBucketState,
    pub ht_size: usize,
    pub ht_locks: usize,
    pub eviction_policy: EvictionPolicy,
    pub conflict_mode: ConflictResolutionMode,
    pub checkpoint_max_items: usize,
    pub last_seqno: i64,
    pub snap_start: u64,
    pub snap_end: u64,
    pub purge_seqno: u64,
    pub max_cas: u64,
    pub hlc_epoch_seqno: i64,
    pub collections_manifest: Option<String>,
}

impl VBucketSpec {
    pub fn new(id: u16, state: VBucketState) -> Self {
        Self {
            id,
            state,
            ht_size: DEFAULT_HT_SIZE,
            ht_locks: DEFAULT_HT_LOCKS,
            eviction_policy: EvictionPolicy::ValueOnly,
            conflict_mode: ConflictResolutionMode::RevisionSeqno,
            checkpoint_max_items: DEFAULT_CHECKPOINT_MAX_ITEMS,
            last_seqno: 0,
            snap_start: 0,
            snap_end: 0,
            purge_seqno: 0,
            max_cas: 0,
            hlc_epoch_seqno: 0,
            collections_manifest: None,
        }
    }
}

/// One virtual bucket: a hash table of stored values plus the checkpoint
/// manager, durability monitor, collections manifest, failover table, HLC
/// and bloom filter that hang off it.
///
/// All mutation primitives follow the same shape: take the hash-bucket
/// stripe lock, run the slot state machine, append to the checkpoint, then
/// release the lock before notifying the new seqno.
pub struct VBucket {
    id: u16,
    state: RwLock<VBucketState>,
    initial_state: VBucketState,

    pub(crate) ht: HashTable,
    checkpoint: CheckpointManager,
    durability: DurabilityMonitor,
    manifest: RwLock<Manifest>,
    failover: FailoverTable,
    hlc: Hlc,
    filters: Mutex<FilterPair>,
    conflict_resolver: Box<dyn ConflictResolver>,
    stats: Arc<Statistics>,
    seqno_cb: RwLock<Option<SeqnoCallback>>,

    persistence_seqno: AtomicU64,
    purge_seqno: AtomicU64,
    persistence_checkpoint_id: AtomicU64,
    persisted_snapshot: Mutex<(u64, u64)>,

    ops_create: AtomicU64,
    ops_update: AtomicU64,
    ops_delete: AtomicU64,
    ops_reject: AtomicU64,
    num_expired: AtomicU64,

    dirty_queue_size: AtomicUsize,
    dirty_queue_fill: AtomicU64,
    dirty_queue_drain: AtomicU64,
    dirty_queue_pending_writes: AtomicUsize,

    pending_ops: Mutex<Vec<u64>>,
}

impl VBucket {
    pub fn new(spec: VBucketSpec, stats: Arc<Statistics>) -> Result<Self> {
        let manifest = Manifest::new(spec.collections_manifest.as_deref())?;
        let vb = Self {
            id: spec.id,
            state: RwLock::new(spec.state),
            initial_state: spec.state,
            ht: HashTable::new(
                spec.ht_size,
                spec.ht_locks,
                spec.eviction_policy,
                stats.clone(),
            ),
            checkpoint: CheckpointManager::new(
                spec.last_seqno,
                spec.checkpoint_max_items,
                stats.clone(),
            ),
            durability: DurabilityMonitor::new(stats.clone()),
            manifest: RwLock::new(manifest),
            failover: FailoverTable::new(25),
            hlc: Hlc::new(
                spec.max_cas,
                spec.hlc_epoch_seqno,
                DEFAULT_HLC_DRIFT_AHEAD_US,
                DEFAULT_HLC_DRIFT_BEHIND_US,
            ),
            filters: Mutex::new(FilterPair::default()),
            conflict_resolver: make_resolver(spec.conflict_mode),
            stats,
            seqno_cb: RwLock::new(None),
            persistence_seqno: AtomicU64::new(0),
            purge_seqno: AtomicU64::new(spec.purge_seqno),
            persistence_checkpoint_id: AtomicU64::new(0),
            persisted_snapshot: Mutex::new((spec.snap_start, spec.snap_end)),
            ops_create: AtomicU64::new(0),
            ops_update: AtomicU64::new(0),
            ops_delete: AtomicU64::new(0),
            ops_reject: AtomicU64::new(0),
            num_expired: AtomicU64::new(0),
            dirty_queue_size: AtomicUsize::new(0),
            dirty_queue_fill: AtomicU64::new(0),
            dirty_queue_drain: AtomicU64::new(0),
            dirty_queue_pending_writes: AtomicUsize::new(0),
            pending_ops: Mutex::new(Vec::new()),
        };
        info!(
            vbid = vb.id,
            state = vb.get_state().as_str(),
            last_seqno = spec.last_seqno,
            max_cas = spec.max_cas,
            "vbucket created"
        );
        Ok(vb)
    }

    // --- identity and state ---

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn get_state(&self) -> VBucketState {
        *self.state.read()
    }

    pub fn initial_state(&self) -> VBucketState {
        self.initial_state
    }

    /// Transition the vbucket's replication role. Promotion to active bumps
    /// the open checkpoint id so replicas re-snapshot.
    pub fn set_state(&self, to: VBucketState) {
        let mut state = self.state.write();
        if to == VBucketState::Active && self.checkpoint.get_open_checkpoint_id() < 2 {
            self.checkpoint.set_open_checkpoint_id(2);
        }
        info!(
            vbid = self.id,
            from = state.as_str(),
            to = to.as_str(),
            "vbucket state transition"
        );
        *state = to;
    }

    pub fn set_seqno_callback(&self, cb: Option<SeqnoCallback>) {
        *self.seqno_cb.write() = cb;
    }

    // --- component access ---

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoint
    }

    pub fn durability_monitor(&self) -> &DurabilityMonitor {
        &self.durability
    }

    pub fn failover_table(&self) -> &FailoverTable {
        &self.failover
    }

    pub fn hlc(&self) -> &Hlc {
        &self.hlc
    }

    pub fn high_seqno(&self) -> i64 {
        self.checkpoint.high_seqno()
    }

    pub fn next_hlc_cas(&self) -> u64 {
        self.hlc.next_cas()
    }

    pub fn num_expired_items(&self) -> u64 {
        self.num_expired.load(Ordering::Relaxed)
    }

    // --- persistence bookkeeping (consumed from the external flusher) ---

    pub fn persistence_seqno(&self) -> u64 {
        self.persistence_seqno.load(Ordering::Acquire)
    }

    pub fn set_persistence_seqno(&self, seqno: u64) {
        self.persistence_seqno.store(seqno, Ordering::Release);
    }

    pub fn purge_seqno(&self) -> u64 {
        self.purge_seqno.load(Ordering::Acquire)
    }

    pub fn set_purge_seqno(&self, seqno: u64) {
        self.purge_seqno.store(seqno, Ordering::Release);
    }

    pub fn persistence_checkpoint_id(&self) -> u64 {
        self.persistence_checkpoint_id.load(Ordering::Acquire)
    }

    pub fn set_persistence_checkpoint_id(&self, id: u64) {
        self.persistence_checkpoint_id.store(id, Ordering::Release);
    }

    pub fn set_persisted_snapshot(&self, start: u64, end: u64) {
        *self.persisted_snapshot.lock() = (start, end);
    }

    /// The state record the flusher persists alongside the data.
    pub fn get_vbucket_state_record(&self) -> VBucketStateRecord {
        let (snap_start, snap_end) = *self.persisted_snapshot.lock();
        VBucketStateRecord {
            state: self.get_state(),
            persistence_checkpoint_id: self.persistence_checkpoint_id(),
            high_seqno: self.high_seqno(),
            purge_seqno: self.purge_seqno(),
            snap_start,
            snap_end,
            max_cas: self.hlc.max_cas(),
            hlc_epoch_seqno: self.hlc.epoch_seqno(),
            failover_log: self.failover.to_json(),
            collections_manifest: self.manifest.read().to_json(),
        }
    }

    // --- bloom filter surface ---

    pub fn create_filter(&self, key_count: usize, probability: f64) {
        let mut filters = self.filters.lock();
        if filters.filter.is_none() && filters.temp.is_none() {
            filters.filter = Some(BloomFilter::new(
                key_count,
                probability,
                FilterStatus::Enabled,
            ));
        } else {
            warn!(vbid = self.id, "bloom filter / temp filter already exist");
        }
    }

    pub fn init_temp_filter(&self, key_count: usize, probability: f64) {
        let mut filters = self.filters.lock();
        filters.temp = Some(BloomFilter::new(
            key_count,
            probability,
            FilterStatus::Compacting,
        ));
        if let Some(f) = filters.filter.as_mut() {
            f.set_status(FilterStatus::Compacting);
        }
    }

    pub fn add_to_filter(&self, key: &DocKey) {
        self.filters.lock().add_key(key);
    }

    pub fn maybe_key_exists_in_filter(&self, key: &DocKey) -> bool {
        self.filters.lock().maybe_key_exists(key)
    }

    pub fn swap_filter(&self) {
        self.filters.lock().swap();
    }

    pub fn clear_filter(&self) {
        let mut filters = self.filters.lock();
        filters.filter = None;
        filters.temp = None;
    }

    pub fn filter_status_string(&self) -> String {
        self.filters.lock().status_string()
    }

    // --- pending front-end operations ---

    /// Park a front-end cookie waiting for this vbucket to become usable.
    pub fn add_pending_op(&self, cookie: u64) {
        self.pending_ops.lock().push(cookie);
    }

    /// Complete parked operations according to the current state: active
    /// fires success, pending keeps waiting, anything else fails with
    /// not-my-vbucket.
    pub fn fire_all_ops(&self, mut notify: impl FnMut(u64, Result<()>)) {
        let status = match self.get_state() {
            VBucketState::Active => Ok(()),
            VBucketState::Pending => return,
            _ => Err(EmberError::NotMyVBucket),
        };
        let drained: Vec<u64> = {
            let mut ops = self.pending_ops.lock();
            ops.drain(..).collect()
        };
        for cookie in drained {
            notify(cookie, status.clone());
        }
    }

    // --- collections surface ---

    /// Apply a new bucket-level collections declaration to this vbucket.
    pub fn update_manifest(&self, declared: &CollectionsManifest) -> bool {
        let mut manifest = self.manifest.write();
        let mut events = Vec::new();
        let ok = manifest.update(
            declared,
            &mut |kind, cid, deleted, payload| {
                let seqno = self.queue_system_event(cid, deleted, payload);
                events.push((kind, seqno));
                seqno
            },
        );
        // Collection begin/end events close the open checkpoint so they
        // never de-dup with later mutations.
        if events
            .iter()
            .any(|(kind, _)| *kind == SystemEventKind::Collection)
        {
            self.checkpoint.create_new_checkpoint();
        }
        ok
    }

    /// The external flusher persisted the end event for `cid`: finish the
    /// collection's removal.
    pub fn complete_collection_deletion(&self, cid: CollectionId) {
        let mut manifest = self.manifest.write();
        manifest.complete_deletion(cid, &mut |_, cid, deleted, payload| {
            self.queue_system_event(cid, deleted, payload)
        });
    }

    pub fn does_key_contain_valid_collection(&self, key: &DocKey) -> bool {
        self.manifest.read().does_key_contain_valid_collection(key)
    }

    pub fn is_logically_deleted(&self, key: &DocKey, seqno: i64) -> bool {
        self.manifest.read().is_logically_deleted(key, seqno)
    }

    pub fn collections_uid(&self) -> u64 {
        self.manifest.read().uid()
    }

    pub fn collections_json(&self) -> String {
        self.manifest.read().to_json()
    }

    pub fn collections_entry(
        &self,
        cid: CollectionId,
    ) -> Option<crate::core::collections::ManifestEntry> {
        self.manifest.read().entry(cid).copied()
    }

    pub fn collections_deleting(&self) -> usize {
        self.manifest.read().n_deleting()
    }

    pub fn collections_greatest_end_seqno(&self) -> i64 {
        self.manifest.read().greatest_end_seqno()
    }

    fn queue_system_event(&self, cid: CollectionId, deleted: bool, payload: Bytes) -> i64 {
        let qi = QueuedItem {
            key: DocKey::new(cid, format!("_collection:{:#x}", cid.0).into_bytes()),
            by_seqno: 0,
            cas: 0,
            op: QueueOp::SystemEvent,
            deleted,
            value: Some(payload),
        };
        let result =
            self.checkpoint
                .queue_dirty(qi, GenerateBySeqno::Yes, GenerateCas::Yes, &self.hlc);
        self.notify_new_seqno(NotifyCtx {
            notify_flusher: true,
            notify_replication: true,
            by_seqno: result.by_seqno,
        });
        result.by_seqno
    }

    // --- durability surface ---

    pub fn set_replication_topology(&self, chain: Vec<String>) {
        self.durability.set_replication_topology(chain);
    }

    /// Acknowledge replica progress; returns the seqnos committed by this
    /// ack.
    pub fn seqno_ack_received(&self, node: &str, mem_seqno: u64, disk_seqno: u64) -> Vec<u64> {
        self.durability.seqno_ack_received(node, mem_seqno, disk_seqno)
    }

    /// The flusher persisted locally; feed the persistence seqno into the
    /// durability monitor.
    pub fn notify_local_persistence(&self) -> Vec<u64> {
        self.durability
            .notify_local_persistence(self.persistence_seqno())
    }

    pub fn process_durability_timeout(&self, now: Instant) -> Vec<u64> {
        self.durability.process_timeout(now)
    }

    /// A set that completes to the client only once the durability monitor
    /// reports commit. The write is tracked after it is enqueued in the
    /// checkpoint, so the active's memory ack is implicit.
    pub fn set_sync_write(&self, itm: &mut Item, reqs: DurabilityRequirements) -> Result<()> {
        self.set(itm)?;
        self.durability.add_sync_write(itm.by_seqno as u64, reqs);
        Ok(())
    }

    // --- admission checks ---

    fn validate_item(itm: &Item) -> Result<()> {
        if itm.key.key.is_empty() || itm.key.key.len() > MAX_KEY_SIZE {
            return Err(EmberError::InvalidKeySize);
        }
        if itm.value_len() > MAX_VALUE_SIZE {
            return Err(EmberError::InvalidValueSize);
        }
        Ok(())
    }

    fn has_available_space(&self, itm: &Item, is_replication: bool) -> bool {
        let threshold = if is_replication {
            REPLICATION_MEM_THRESHOLD
        } else {
            MUTATION_MEM_THRESHOLD
        };
        let max = self.stats.max_memory.load(Ordering::Acquire);
        let used = self.stats.estimated_total_memory_used();
        used + itm.size() <= (max as f64 * threshold) as usize
    }

    // --- slot inspection ---

    fn slot_view(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        now: u32,
    ) -> Option<SlotView> {
        self.ht
            .find(lock, key, WantsDeleted::Yes, TrackReference::No)
            .map(|v| SlotView {
                cas: v.cas(),
                rev_seqno: v.rev_seqno(),
                dirty: v.is_dirty(),
                deleted: v.is_deleted(),
                locked: v.is_locked(now),
                temp_init: v.is_temp_initial_item(),
                temp_deleted: v.is_temp_deleted_item(),
                temp_non_existent: v.is_temp_non_existent_item(),
                temp: v.is_temp_item(),
                expired: v.is_expired(now),
                resident: v.is_resident(),
                datatype: v.datatype(),
                has_value: v.value().is_some(),
            })
    }

    fn unlock_slot(&self, lock: &mut HashBucketLock<'_>, key: &DocKey) {
        self.ht.mutate(lock, key, |v| v.unlock());
    }

    /// Replica and pending vbuckets silently release client locks:
    /// replication wins over the lock.
    fn maybe_force_unlock(&self, lock: &mut HashBucketLock<'_>, key: &DocKey, now: u32) {
        if matches!(
            self.get_state(),
            VBucketState::Replica | VBucketState::Pending
        ) {
            self.ht.mutate(lock, key, |v| {
                if v.is_locked(now) {
                    v.unlock();
                }
            });
        }
    }

    // --- checkpoint glue ---

    /// Append the stored value's current incarnation to the checkpoint and
    /// stamp the assigned seqno (and CAS) back onto it.
    fn queue_stored_value(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        ctx: &QueueItemCtx,
    ) -> NotifyCtx {
        let snapshot = self
            .ht
            .mutate(lock, key, |v| v.to_item(false))
            .expect("VBucket::queue_stored_value: missing stored value");

        let qi = QueuedItem {
            key: key.clone(),
            by_seqno: snapshot.by_seqno,
            cas: snapshot.meta.cas,
            op: if snapshot.deleted {
                QueueOp::Deletion
            } else {
                QueueOp::Mutation
            },
            deleted: snapshot.deleted,
            value: None,
        };
        let item_bytes = snapshot.value_len();
        let result = self
            .checkpoint
            .queue_dirty(qi, ctx.gen_by_seqno, ctx.gen_cas, &self.hlc);

        self.ht.mutate(lock, key, |v| {
            v.set_by_seqno(result.by_seqno);
            if ctx.gen_cas == GenerateCas::Yes {
                v.set_cas(result.cas);
            }
            if ctx.track_cas_drift {
                self.hlc.set_max_cas_and_track_drift(v.cas());
            } else if ctx.gen_cas == GenerateCas::No {
                self.hlc.set_max_cas(v.cas());
            }
        });

        self.dirty_queue_size.fetch_add(1, Ordering::AcqRel);
        self.dirty_queue_fill.fetch_add(1, Ordering::Relaxed);
        self.dirty_queue_pending_writes
            .fetch_add(item_bytes, Ordering::AcqRel);
        self.stats.disk_queue_size.fetch_add(1, Ordering::AcqRel);

        NotifyCtx {
            notify_flusher: result.notify_flusher,
            notify_replication: true,
            by_seqno: result.by_seqno,
        }
    }

    /// The flusher drained one queued item.
    pub fn did_flush_item(&self, item_bytes: usize) {
        self.dirty_queue_size.fetch_sub(1, Ordering::AcqRel);
        self.dirty_queue_drain.fetch_add(1, Ordering::Relaxed);
        let mut cur = self.dirty_queue_pending_writes.load(Ordering::Relaxed);
        loop {
            let new = cur.saturating_sub(item_bytes);
            match self.dirty_queue_pending_writes.compare_exchange(
                cur,
                new,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(now) => cur = now,
            }
        }
        self.stats.disk_queue_size.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn dirty_queue_size(&self) -> usize {
        self.dirty_queue_size.load(Ordering::Acquire)
    }

    fn notify_new_seqno(&self, ctx: NotifyCtx) {
        if let Some(cb) = self.seqno_cb.read().as_ref() {
            cb(self.id, &ctx);
        }
    }

    // --- core slot mutations ---

    /// Overwrite an existing slot with `itm`. Returns clean/dirty by the
    /// slot's prior state.
    fn update_stored_value(
        &self,
        lock: &mut HashBucketLock<'_>,
        itm: &mut Item,
        ctx: &QueueItemCtx,
    ) -> (MutationStatus, NotifyCtx) {
        let was_dirty = self
            .ht
            .mutate(lock, &itm.key, |v| {
                let was_dirty = v.is_dirty();
                v.set_value(itm);
                was_dirty
            })
            .expect("VBucket::update_stored_value: missing stored value");

        let notify = self.queue_stored_value(lock, &itm.key, ctx);
        self.sync_item_from_slot(lock, itm);
        self.ops_update.fetch_add(1, Ordering::Relaxed);
        let status = if was_dirty {
            MutationStatus::WasDirty
        } else {
            MutationStatus::WasClean
        };
        (status, notify)
    }

    /// Create a fresh slot from `itm` and queue it.
    fn add_new_stored_value(
        &self,
        lock: &mut HashBucketLock<'_>,
        itm: &mut Item,
        ctx: &QueueItemCtx,
    ) -> NotifyCtx {
        self.ht.add_new(lock, itm);
        let notify = self.queue_stored_value(lock, &itm.key, ctx);
        self.sync_item_from_slot(lock, itm);
        self.ops_create.fetch_add(1, Ordering::Relaxed);
        notify
    }

    fn sync_item_from_slot(&self, lock: &mut HashBucketLock<'_>, itm: &mut Item) {
        if let Some(v) = self
            .ht
            .find(lock, &itm.key, WantsDeleted::Yes, TrackReference::No)
        {
            itm.by_seqno = v.by_seqno();
            itm.meta.cas = v.cas();
            itm.meta.rev_seqno = v.rev_seqno();
        }
    }

    /// Soft-delete the slot in place and queue the deletion. When
    /// `keep_value` the (already pruned) value survives with the deleted
    /// flag set, preserving system xattrs.
    fn soft_delete_stored_value(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        keep_value: bool,
        ctx: &QueueItemCtx,
        now: u32,
    ) -> NotifyCtx {
        self.ht.mutate(lock, key, |v| {
            if keep_value {
                v.unlock();
                v.set_deleted();
                v.mark_dirty();
            } else {
                v.del(now);
            }
        });
        let notify = self.queue_stored_value(lock, key, ctx);
        self.ops_delete.fetch_add(1, Ordering::Relaxed);
        notify
    }

    /// Recreated keys must not reuse a revision an earlier deletion already
    /// burned.
    fn update_rev_seqno_of_new_stored_value(&self, lock: &mut HashBucketLock<'_>, key: &DocKey) {
        let max_deleted = self.ht.max_deleted_rev_seqno();
        self.ht.mutate(lock, key, |v| {
            let mut rev = max_deleted;
            if !v.is_temp_item() {
                rev += 1;
            }
            v.set_rev_seqno(rev);
        });
    }

    // --- the mutation state machine ---

    #[allow(clippy::too_many_arguments)]
    fn process_set(
        &self,
        lock: &mut HashBucketLock<'_>,
        itm: &mut Item,
        cas: u64,
        allow_existing: bool,
        has_meta: bool,
        ctx: &QueueItemCtx,
        maybe_key_exists: bool,
        is_replication: bool,
    ) -> (MutationStatus, Option<NotifyCtx>) {
        if !self.has_available_space(itm, is_replication) {
            self.stats.oom_errors.fetch_add(1, Ordering::Relaxed);
            return (MutationStatus::NoMem, None);
        }

        let now = time::epoch_secs();
        let view = self.slot_view(lock, &itm.key, now);

        if cas != 0
            && self.ht.eviction_policy() == EvictionPolicy::FullEviction
            && maybe_key_exists
            && view.is_none_or(|v| v.temp_init)
        {
            return (MutationStatus::NeedBgFetch, None);
        }

        let Some(view) = view else {
            if cas != 0 {
                return (MutationStatus::NotFound, None);
            }
            let notify = self.add_new_stored_value(lock, itm, ctx);
            if !has_meta {
                self.update_rev_seqno_of_new_stored_value(lock, &itm.key);
                self.sync_item_from_slot(lock, itm);
            }
            return (MutationStatus::WasClean, Some(notify));
        };

        // An expired value under a CAS op reads as gone; deny before the
        // lock check.
        if view.expired && !has_meta && !itm.deleted {
            if view.locked {
                self.unlock_slot(lock, &itm.key);
            }
            if cas != 0 {
                return (MutationStatus::NotFound, None);
            }
        }

        if !allow_existing && !view.temp && !view.deleted {
            return (MutationStatus::InvalidCas, None);
        }

        if view.locked && !view.expired {
            if cas != view.cas {
                return (MutationStatus::IsLocked, None);
            }
            self.unlock_slot(lock, &itm.key);
        } else if cas != 0 && cas != view.cas {
            if view.temp_non_existent {
                return (MutationStatus::NotFound, None);
            }
            if (view.temp_deleted || view.deleted) && !itm.deleted {
                // Replacing a tombstone with a live value is a lookup miss,
                // not a CAS conflict.
                return (MutationStatus::NotFound, None);
            }
            return (MutationStatus::InvalidCas, None);
        }

        if !has_meta {
            itm.meta.rev_seqno = view.rev_seqno + 1;
            // A replace (set with CAS) of a deleted document fails: it
            // logically does not exist. A deleted incoming value is a
            // CAS delete and the deleted->deleted transition is permitted
            // for xattr preservation.
            if cas != 0 && (view.deleted || view.temp_deleted) && !itm.deleted {
                return (MutationStatus::NotFound, None);
            }
        }

        let (status, notify) = self.update_stored_value(lock, itm, ctx);
        (status, Some(notify))
    }

    fn process_add(
        &self,
        lock: &mut HashBucketLock<'_>,
        itm: &mut Item,
        maybe_key_exists: bool,
        is_replication: bool,
        ctx: &QueueItemCtx,
    ) -> (AddStatus, Option<NotifyCtx>) {
        let now = time::epoch_secs();
        let view = self.slot_view(lock, &itm.key, now);

        if let Some(v) = view {
            if !v.deleted && !v.expired && !v.temp {
                return (AddStatus::Exists, None);
            }
        }
        if !self.has_available_space(itm, is_replication) {
            self.stats.oom_errors.fetch_add(1, Ordering::Relaxed);
            return (AddStatus::NoMem, None);
        }

        match view {
            Some(v) => {
                if v.temp_init
                    && self.ht.eviction_policy() == EvictionPolicy::FullEviction
                    && maybe_key_exists
                {
                    return (AddStatus::BgFetch, None);
                }
                let status = if v.deleted || v.expired {
                    AddStatus::UnDel
                } else {
                    AddStatus::Success
                };
                itm.meta.rev_seqno = if v.temp && !v.temp_deleted {
                    self.ht.max_deleted_rev_seqno() + 1
                } else {
                    v.rev_seqno + 1
                };
                let (_, notify) = self.update_stored_value(lock, itm, ctx);
                (status, Some(notify))
            }
            None => {
                if itm.by_seqno != STATE_TEMP_INIT
                    && self.ht.eviction_policy() == EvictionPolicy::FullEviction
                    && maybe_key_exists
                {
                    return (AddStatus::AddTmpAndBgFetch, None);
                }

                let (status, notify) = if itm.by_seqno == STATE_TEMP_INIT {
                    // A temp initial item only enters the hash table; it is
                    // never checkpointed.
                    self.ht.add_new(lock, itm);
                    (AddStatus::BgFetch, None)
                } else {
                    let notify = self.add_new_stored_value(lock, itm, ctx);
                    (AddStatus::Success, Some(notify))
                };
                self.update_rev_seqno_of_new_stored_value(lock, &itm.key);
                self.sync_item_from_slot(lock, itm);
                if itm.by_seqno == STATE_TEMP_INIT {
                    self.ht.mutate(lock, &itm.key, |v| v.set_nru(MAX_NRU_VALUE));
                }
                (status, notify)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_soft_delete(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        cas: u64,
        metadata: &ItemMeta,
        ctx: &QueueItemCtx,
        use_meta: bool,
    ) -> (MutationStatus, Option<NotifyCtx>) {
        let now = time::epoch_secs();
        let Some(view) = self.slot_view(lock, key, now) else {
            return (MutationStatus::NotFound, None);
        };

        if view.temp_init && self.ht.eviction_policy() == EvictionPolicy::FullEviction {
            return (MutationStatus::NeedBgFetch, None);
        }

        if view.locked {
            if cas != view.cas {
                return (MutationStatus::IsLocked, None);
            }
            self.unlock_slot(lock, key);
        }

        if cas != 0 && cas != view.cas {
            return (MutationStatus::InvalidCas, None);
        }

        self.unlock_slot(lock, key);

        let status = if view.dirty {
            MutationStatus::WasDirty
        } else {
            MutationStatus::WasClean
        };

        self.ht.mutate(lock, key, |v| {
            if use_meta {
                v.set_cas(metadata.cas);
                v.set_flags(metadata.flags);
                v.set_exptime(metadata.exptime);
            }
            v.set_rev_seqno(metadata.rev_seqno);
        });

        let notify = self.soft_delete_stored_value(lock, key, false, ctx, now);
        self.ht.update_max_deleted_rev_seqno(metadata.rev_seqno);
        (status, Some(notify))
    }

    /// Soft-delete an expired value. xattr-bearing values keep only their
    /// system xattrs; everything else loses the value entirely.
    fn process_expired_item(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
    ) -> (MutationStatus, Option<NotifyCtx>) {
        let now = time::epoch_secs();
        let Some(view) = self.slot_view(lock, key, now) else {
            return (MutationStatus::NotFound, None);
        };

        if view.temp_init && self.ht.eviction_policy() == EvictionPolicy::FullEviction {
            return (MutationStatus::NeedBgFetch, None);
        }

        let keep_value = if is_xattr(view.datatype) && view.has_value {
            let pruned = self
                .ht
                .find(lock, key, WantsDeleted::Yes, TrackReference::No)
                .and_then(|v| v.value().and_then(|val| xattr::prune_user_keys(val)));
            match pruned {
                Some(blob) => {
                    self.ht.mutate(lock, key, |v| {
                        let mut itm = v.to_item(false);
                        itm.value = Some(blob);
                        itm.datatype = DATATYPE_XATTR;
                        v.set_value(&itm);
                    });
                    true
                }
                None => false,
            }
        } else {
            false
        };

        let new_rev = view.rev_seqno + 1;
        self.ht.mutate(lock, key, |v| v.set_rev_seqno(new_rev));
        let notify =
            self.soft_delete_stored_value(lock, key, keep_value, &QueueItemCtx::generated(), now);
        self.ht.update_max_deleted_rev_seqno(new_rev + 1);
        (MutationStatus::NotFound, Some(notify))
    }

    fn inc_expiration_stat(&self, source: ExpireBy) {
        self.stats.record_expired(source);
        self.num_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Shared read-path lookup: resolves expiry as a side effect.
    ///
    /// Returns a snapshot of the slot after any expiry processing. On
    /// non-active vbuckets expired values are returned untouched; on active
    /// vbuckets the expired value is soft-deleted first when
    /// `queue_expired` allows. Any seqno notification produced by the
    /// expiry lands in `pending_notify`; the caller fires it once the
    /// bucket lock is released.
    fn fetch_valid_value(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        wants_deleted: WantsDeleted,
        track_reference: TrackReference,
        queue_expired: bool,
        pending_notify: &mut Option<NotifyCtx>,
    ) -> Option<Item> {
        let now = time::epoch_secs();
        let snapshot = self
            .ht
            .find(lock, key, WantsDeleted::Yes, track_reference)
            .map(|v| (v.to_item(false), v.is_expired(now), v.is_temp_item()));

        let (item, expired, temp) = snapshot?;
        if !item.deleted && !temp && expired {
            if self.get_state() != VBucketState::Active {
                return match wants_deleted {
                    WantsDeleted::Yes => Some(item),
                    WantsDeleted::No => None,
                };
            }
            if queue_expired {
                self.inc_expiration_stat(ExpireBy::Access);
                let (_, notify) = self.process_expired_item(lock, key);
                let refreshed = self
                    .ht
                    .find(lock, key, WantsDeleted::Yes, TrackReference::No)
                    .map(|v| v.to_item(false));
                *pending_notify = notify;
                return match wants_deleted {
                    WantsDeleted::Yes => refreshed,
                    WantsDeleted::No => None,
                };
            }
            return match wants_deleted {
                WantsDeleted::Yes => Some(item),
                WantsDeleted::No => None,
            };
        }
        if item.deleted && wants_deleted == WantsDeleted::No {
            return None;
        }
        Some(item)
    }

    /// Release the bucket lock, then fire a deferred notification.
    fn finish_read(&self, lock: HashBucketLock<'_>, pending_notify: Option<NotifyCtx>) {
        drop(lock);
        if let Some(ctx) = pending_notify {
            self.notify_new_seqno(ctx);
        }
    }

    // --- temp items and background fetch ---

    fn add_temp_stored_value(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        is_replication: bool,
    ) -> (AddStatus, Option<Item>) {
        let mut itm = Item::new_temp_init(key.clone());
        if !self.has_available_space(&itm, is_replication) {
            self.stats.tmp_oom_errors.fetch_add(1, Ordering::Relaxed);
            return (AddStatus::NoMem, None);
        }
        self.ht.add_new(lock, &itm);
        self.update_rev_seqno_of_new_stored_value(lock, key);
        self.ht.mutate(lock, key, |v| v.set_nru(MAX_NRU_VALUE));
        self.sync_item_from_slot(lock, &mut itm);
        (AddStatus::BgFetch, Some(itm))
    }

    /// Insert a temp-initial slot for `key` and report that the caller must
    /// schedule a disk probe.
    fn add_temp_item_and_bg_fetch(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        is_replication: bool,
    ) -> EmberError {
        let (status, _) = self.add_temp_stored_value(lock, key, is_replication);
        if status == AddStatus::NoMem {
            return EmberError::NoMem;
        }
        self.stats
            .bg_fetches_scheduled
            .fetch_add(1, Ordering::Relaxed);
        EmberError::WouldBlock
    }

    /// Resolve an outstanding background fetch for `key`.
    ///
    /// A temp-initial slot is restored to the fetched document (or its
    /// tombstone), or marked temp-non-existent on a miss so subsequent
    /// lookups answer from memory. A paged-out (non-resident) slot gets its
    /// value back.
    pub fn complete_bg_fetch(&self, key: &DocKey, result: BgFetchResult) {
        let mut lock = self.ht.locked_bucket(key);
        let Some(v) = self
            .ht
            .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
        else {
            return;
        };
        let temp_init = v.is_temp_initial_item();
        let non_resident = !v.is_resident() && !v.is_temp_item();
        if !temp_init && !non_resident {
            return;
        }
        match result {
            BgFetchResult::Found(itm) => {
                self.ht.mutate(&mut lock, key, |v| {
                    if itm.deleted && temp_init {
                        v.restore_meta(&itm);
                    } else if !itm.deleted {
                        v.restore_value(&itm);
                    }
                });
            }
            BgFetchResult::NotFound => {
                if temp_init {
                    self.ht.mutate(&mut lock, key, |v| v.set_temp_non_existent());
                }
            }
        }
    }

    // --- public operations: reads ---

    /// Fetch the document for `key`.
    pub fn get(&self, key: &DocKey, options: GetOptions) -> Result<Item> {
        self.stats.total_gets.fetch_add(1, Ordering::Relaxed);
        let mut lock = self.ht.locked_bucket(key);
        let mut pending = None;
        let result = self.get_inner(&mut lock, key, options, &mut pending);
        self.finish_read(lock, pending);
        result
    }

    fn get_inner(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        options: GetOptions,
        pending: &mut Option<NotifyCtx>,
    ) -> Result<Item> {
        let now = time::epoch_secs();
        let item = self.fetch_valid_value(
            lock,
            key,
            WantsDeleted::Yes,
            options.track_reference,
            options.queue_expired,
            pending,
        );

        match item {
            Some(itm) => {
                if itm.deleted && !options.get_deleted_value {
                    return Err(EmberError::KeyNotFound);
                }
                if itm.is_temp_deleted() || itm.is_temp_non_existent() {
                    // Do not preserve a temp marker once the caller has
                    // seen the miss.
                    if options.delete_temp {
                        self.ht.delete(lock, key);
                    }
                    return Err(EmberError::KeyNotFound);
                }
                if itm.is_temp_initial() {
                    return Err(EmberError::WouldBlock);
                }
                if itm.value.is_none() && !itm.deleted {
                    // Non-resident: the caller must fetch from disk.
                    return Err(EmberError::WouldBlock);
                }
                let locked = self
                    .ht
                    .find(lock, key, WantsDeleted::Yes, TrackReference::No)
                    .is_some_and(|v| v.is_locked(now));
                let mut out = itm;
                if locked && options.hide_locked_cas {
                    out.meta.cas = u64::MAX;
                }
                Ok(out)
            }
            None => {
                if self.ht.eviction_policy() == EvictionPolicy::ValueOnly {
                    return Err(EmberError::KeyNotFound);
                }
                if self.maybe_key_exists_in_filter(key) {
                    Err(self.add_temp_item_and_bg_fetch(lock, key, false))
                } else {
                    Err(EmberError::KeyNotFound)
                }
            }
        }
    }

    /// Fetch and simultaneously update the document's TTL.
    pub fn get_and_update_ttl(&self, key: &DocKey, exptime: u32) -> Result<Item> {
        let mut lock = self.ht.locked_bucket(key);
        let mut pending = None;
        let result = self.get_and_update_ttl_inner(&mut lock, key, exptime, &mut pending);
        self.finish_read(lock, pending);
        result
    }

    fn get_and_update_ttl_inner(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        exptime: u32,
        pending: &mut Option<NotifyCtx>,
    ) -> Result<Item> {
        let now = time::epoch_secs();
        let found = self.fetch_valid_value(
            lock,
            key,
            WantsDeleted::Yes,
            TrackReference::Yes,
            true,
            pending,
        );

        let Some(itm) = found else {
            return match self.ht.eviction_policy() {
                EvictionPolicy::ValueOnly => Err(EmberError::KeyNotFound),
                EvictionPolicy::FullEviction => {
                    if self.maybe_key_exists_in_filter(key) {
                        Err(self.add_temp_item_and_bg_fetch(lock, key, false))
                    } else {
                        Err(EmberError::KeyNotFound)
                    }
                }
            };
        };

        if itm.deleted || itm.is_temp_deleted() || itm.is_temp_non_existent() {
            return Err(EmberError::KeyNotFound);
        }
        if itm.value.is_none() {
            return Err(EmberError::WouldBlock);
        }
        let locked = self
            .ht
            .find(lock, key, WantsDeleted::Yes, TrackReference::No)
            .is_some_and(|v| v.is_locked(now));
        if locked {
            return Err(EmberError::Locked);
        }

        let mutated = itm.meta.exptime != exptime;
        if !mutated {
            return Ok(itm);
        }

        self.ht.mutate(lock, key, |v| {
            v.mark_dirty();
            v.set_exptime(exptime);
            let rev = v.rev_seqno() + 1;
            v.set_rev_seqno(rev);
        });
        let notify = self.queue_stored_value(lock, key, &QueueItemCtx::generated());
        let out = self
            .ht
            .find(lock, key, WantsDeleted::Yes, TrackReference::No)
            .map(|v| v.to_item(false))
            .expect("VBucket::get_and_update_ttl: slot vanished");
        *pending = Some(notify);
        Ok(out)
    }

    /// Acquire a CAS lock on the document for `timeout` seconds. The
    /// returned item carries the new CAS required for subsequent writes.
    pub fn get_locked(&self, key: &DocKey, timeout: u32) -> Result<Item> {
        let mut lock = self.ht.locked_bucket(key);
        let mut pending = None;
        let result = self.get_locked_inner(&mut lock, key, timeout, &mut pending);
        self.finish_read(lock, pending);
        result
    }

    fn get_locked_inner(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        timeout: u32,
        pending: &mut Option<NotifyCtx>,
    ) -> Result<Item> {
        let now = time::epoch_secs();
        let timeout = if timeout == 0 || timeout > MAX_LOCK_TIMEOUT {
            DEFAULT_LOCK_TIMEOUT
        } else {
            timeout
        };
        let found = self.fetch_valid_value(
            lock,
            key,
            WantsDeleted::Yes,
            TrackReference::Yes,
            true,
            pending,
        );

        match found {
            Some(itm) => {
                if itm.deleted || itm.is_temp_deleted() || itm.is_temp_non_existent() {
                    return Err(EmberError::KeyNotFound);
                }
                let locked = self
                    .ht
                    .find(lock, key, WantsDeleted::Yes, TrackReference::No)
                    .is_some_and(|v| v.is_locked(now));
                if locked {
                    return Err(EmberError::LockedTmpFail);
                }
                if itm.value.is_none() {
                    return Err(EmberError::WouldBlock);
                }

                let cas = self.hlc.next_cas();
                let out = self
                    .ht
                    .mutate(lock, key, |v| {
                        v.lock(now + timeout);
                        v.set_cas(cas);
                        v.to_item(false)
                    })
                    .expect("VBucket::get_locked: slot vanished");
                Ok(out)
            }
            None => match self.ht.eviction_policy() {
                EvictionPolicy::ValueOnly => Err(EmberError::KeyNotFound),
                EvictionPolicy::FullEviction => {
                    if self.maybe_key_exists_in_filter(key) {
                        Err(self.add_temp_item_and_bg_fetch(lock, key, false))
                    } else {
                        Err(EmberError::KeyNotFound)
                    }
                }
            },
        }
    }

    /// Fetch only the metadata for `key`. The deleted flag is reported for
    /// tombstones and expired values; a locked value reports the sentinel
    /// CAS.
    pub fn get_meta_data(&self, key: &DocKey) -> Result<(ItemMeta, bool, u8)> {
        let now = time::epoch_secs();
        let mut lock = self.ht.locked_bucket(key);
        let view = self.slot_view(&mut lock, key, now);

        match view {
            Some(v) => {
                if v.temp_init {
                    self.stats
                        .bg_fetches_scheduled
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(EmberError::WouldBlock);
                }
                if v.temp_non_existent {
                    return Err(EmberError::KeyNotFound);
                }
                let deleted = v.temp_deleted || v.deleted || v.expired;
                let meta = ItemMeta {
                    cas: if v.locked { u64::MAX } else { v.cas },
                    rev_seqno: v.rev_seqno,
                    flags: self
                        .ht
                        .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
                        .map_or(0, |sv| sv.flags()),
                    exptime: self
                        .ht
                        .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
                        .map_or(0, |sv| sv.exptime()),
                };
                Ok((meta, deleted, v.datatype))
            }
            None => {
                if self.ht.eviction_policy() == EvictionPolicy::FullEviction
                    && self.maybe_key_exists_in_filter(key)
                {
                    Err(self.add_temp_item_and_bg_fetch(&mut lock, key, false))
                } else {
                    Err(EmberError::KeyNotFound)
                }
            }
        }
    }

    /// Per-key bookkeeping for the control surface.
    pub fn get_key_stats(&self, key: &DocKey, wants_deleted: WantsDeleted) -> Result<KeyStats> {
        let mut lock = self.ht.locked_bucket(key);
        let mut pending = None;
        let result = self.get_key_stats_inner(&mut lock, key, wants_deleted, &mut pending);
        self.finish_read(lock, pending);
        result
    }

    fn get_key_stats_inner(
        &self,
        lock: &mut HashBucketLock<'_>,
        key: &DocKey,
        wants_deleted: WantsDeleted,
        pending: &mut Option<NotifyCtx>,
    ) -> Result<KeyStats> {
        let found = self.fetch_valid_value(
            lock,
            key,
            WantsDeleted::Yes,
            TrackReference::Yes,
            true,
            pending,
        );

        match found {
            Some(itm) => {
                if (itm.deleted && wants_deleted == WantsDeleted::No)
                    || itm.is_temp_non_existent()
                    || itm.is_temp_deleted()
                {
                    return Err(EmberError::KeyNotFound);
                }
                if itm.is_temp_initial()
                    && self.ht.eviction_policy() == EvictionPolicy::FullEviction
                {
                    self.stats
                        .bg_fetches_scheduled
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(EmberError::WouldBlock);
                }
                let resident = self
                    .ht
                    .find(lock, key, WantsDeleted::Yes, TrackReference::No)
                    .is_some_and(|v| v.is_resident());
                let dirty = self
                    .ht
                    .find(lock, key, WantsDeleted::Yes, TrackReference::No)
                    .is_some_and(|v| v.is_dirty());
                Ok(KeyStats {
                    logically_deleted: itm.deleted,
                    dirty,
                    resident,
                    exptime: itm.meta.exptime,
                    flags: itm.meta.flags,
                    cas: itm.meta.cas,
                    vb_state: self.get_state(),
                })
            }
            None => match self.ht.eviction_policy() {
                EvictionPolicy::ValueOnly => Err(EmberError::KeyNotFound),
                EvictionPolicy::FullEviction => {
                    if self.maybe_key_exists_in_filter(key) {
                        Err(self.add_temp_item_and_bg_fetch(lock, key, false))
                    } else {
                        Err(EmberError::KeyNotFound)
                    }
                }
            },
        }
    }

    // --- public operations: writes ---

    /// Unconditional (or CAS-guarded, when `itm.meta.cas != 0`) store.
    /// On success the item is updated with the assigned CAS and seqno.
    pub fn set(&self, itm: &mut Item) -> Result<()> {
        Self::validate_item(itm)?;
        self.stats.total_sets.fetch_add(1, Ordering::Relaxed);
        let cas = itm.meta.cas;
        let cas_op = cas != 0;
        let now = time::epoch_secs();
        let mut lock = self.ht.locked_bucket(&itm.key);

        self.maybe_force_unlock(&mut lock, &itm.key, now);

        let view = self.slot_view(&mut lock, &itm.key, now);
        let maybe_key_exists = if view.is_none_or(|v| v.temp_init)
            && self.ht.eviction_policy() == EvictionPolicy::FullEviction
            && cas_op
        {
            self.maybe_key_exists_in_filter(&itm.key)
        } else {
            true
        };

        let ctx = QueueItemCtx::generated();
        let (status, notify) = self.process_set(
            &mut lock,
            itm,
            cas,
            true,
            false,
            &ctx,
            maybe_key_exists,
            false,
        );

        match status {
            MutationStatus::NoMem => Err(EmberError::NoMem),
            MutationStatus::InvalidCas => {
                self.ops_reject.fetch_add(1, Ordering::Relaxed);
                Err(EmberError::KeyExists)
            }
            MutationStatus::IsLocked => Err(EmberError::Locked),
            MutationStatus::NotFound if cas_op => {
                self.ops_reject.fetch_add(1, Ordering::Relaxed);
                Err(EmberError::KeyNotFound)
            }
            MutationStatus::NotFound | MutationStatus::WasDirty | MutationStatus::WasClean => {
                drop(lock);
                if let Some(ctx) = notify {
                    self.notify_new_seqno(ctx);
                }
                Ok(())
            }
            MutationStatus::NeedBgFetch => {
                let err = if self
                    .slot_view(&mut lock, &itm.key, now)
                    .is_some()
                {
                    self.stats
                        .bg_fetches_scheduled
                        .fetch_add(1, Ordering::Relaxed);
                    EmberError::WouldBlock
                } else {
                    self.add_temp_item_and_bg_fetch(&mut lock, &itm.key, false)
                };
                Err(err)
            }
        }
    }

    /// Store gated on a predicate over the current document's metadata.
    /// The predicate sees `None` when no live document exists.
    pub fn set_if(
        &self,
        itm: &mut Item,
        predicate: impl FnOnce(Option<&ItemMeta>) -> bool,
    ) -> Result<()> {
        let now = time::epoch_secs();
        {
            let mut lock = self.ht.locked_bucket(&itm.key);
            let meta = self
                .slot_view(&mut lock, &itm.key, now)
                .filter(|v| !v.temp && !v.deleted)
                .map(|v| ItemMeta {
                    cas: v.cas,
                    rev_seqno: v.rev_seqno,
                    flags: 0,
                    exptime: 0,
                });
            if !predicate(meta.as_ref()) {
                return Err(EmberError::PredicateFailed);
            }
        }
        self.set(itm)
    }

    /// Store only if the key does not already exist (tombstones and expired
    /// values do not count as existing).
    pub fn add(&self, itm: &mut Item) -> Result<()> {
        Self::validate_item(itm)?;
        self.stats.total_sets.fetch_add(1, Ordering::Relaxed);
        let mut lock = self.ht.locked_bucket(&itm.key);
        let now = time::epoch_secs();

        let view = self.slot_view(&mut lock, &itm.key, now);
        let maybe_key_exists = if view.is_none_or(|v| v.temp_init)
            && self.ht.eviction_policy() == EvictionPolicy::FullEviction
        {
            self.maybe_key_exists_in_filter(&itm.key)
        } else {
            true
        };

        let ctx = QueueItemCtx::generated();
        let (status, notify) = self.process_add(&mut lock, itm, maybe_key_exists, false, &ctx);

        match status {
            AddStatus::NoMem => Err(EmberError::NoMem),
            AddStatus::Exists => {
                self.ops_reject.fetch_add(1, Ordering::Relaxed);
                Err(EmberError::NotStored)
            }
            AddStatus::AddTmpAndBgFetch => {
                Err(self.add_temp_item_and_bg_fetch(&mut lock, &itm.key, false))
            }
            AddStatus::BgFetch => {
                drop(lock);
                self.stats
                    .bg_fetches_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                Err(EmberError::WouldBlock)
            }
            AddStatus::Success | AddStatus::UnDel => {
                drop(lock);
                if let Some(ctx) = notify {
                    self.notify_new_seqno(ctx);
                }
                Ok(())
            }
        }
    }

    /// Store only over an existing live document.
    pub fn replace(&self, itm: &mut Item) -> Result<()> {
        Self::validate_item(itm)?;
        self.stats.total_sets.fetch_add(1, Ordering::Relaxed);
        let mut lock = self.ht.locked_bucket(&itm.key);
        let now = time::epoch_secs();

        let Some(view) = self.slot_view(&mut lock, &itm.key, now) else {
            if self.ht.eviction_policy() == EvictionPolicy::ValueOnly {
                return Err(EmberError::KeyNotFound);
            }
            return if self.maybe_key_exists_in_filter(&itm.key) {
                Err(self.add_temp_item_and_bg_fetch(&mut lock, &itm.key, false))
            } else {
                Err(EmberError::KeyNotFound)
            };
        };

        if view.deleted || view.temp_deleted || view.temp_non_existent {
            return Err(EmberError::KeyNotFound);
        }

        if view.temp_init && self.ht.eviction_policy() == EvictionPolicy::FullEviction {
            drop(lock);
            self.stats
                .bg_fetches_scheduled
                .fetch_add(1, Ordering::Relaxed);
            return Err(EmberError::WouldBlock);
        }

        let ctx = QueueItemCtx::generated();
        let (status, notify) =
            self.process_set(&mut lock, itm, 0, true, false, &ctx, true, false);

        match status {
            MutationStatus::NoMem => Err(EmberError::NoMem),
            MutationStatus::IsLocked => Err(EmberError::Locked),
            MutationStatus::InvalidCas | MutationStatus::NotFound => {
                self.ops_reject.fetch_add(1, Ordering::Relaxed);
                Err(EmberError::NotStored)
            }
            MutationStatus::WasClean | MutationStatus::WasDirty => {
                drop(lock);
                if let Some(ctx) = notify {
                    self.notify_new_seqno(ctx);
                }
                Ok(())
            }
            MutationStatus::NeedBgFetch => {
                drop(lock);
                self.stats
                    .bg_fetches_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                Err(EmberError::WouldBlock)
            }
        }
    }

    /// Store a document carrying externally supplied metadata, arbitrated
    /// by the configured conflict-resolution policy unless `force`.
    #[allow(clippy::too_many_arguments)]
    pub fn set_with_meta(
        &self,
        itm: &mut Item,
        cas: u64,
        force: bool,
        allow_existing: bool,
        gen_by_seqno: GenerateBySeqno,
        gen_cas: GenerateCas,
        is_replication: bool,
    ) -> Result<i64> {
        Self::validate_item(itm)?;
        self.stats.total_sets.fetch_add(1, Ordering::Relaxed);
        let now = time::epoch_secs();
        let mut lock = self.ht.locked_bucket(&itm.key);

        let mut maybe_key_exists = true;
        if !force {
            let exists = self
                .ht
                .find(&mut lock, &itm.key, WantsDeleted::Yes, TrackReference::No)
                .is_some();
            if exists {
                let (temp_init, loses) = {
                    let v = self
                        .ht
                        .find(&mut lock, &itm.key, WantsDeleted::Yes, TrackReference::No)
                        .unwrap();
                    (
                        v.is_temp_initial_item(),
                        !v.is_temp_initial_item()
                            && !self.conflict_resolver.resolve(
                                v,
                                &itm.meta,
                                itm.datatype,
                                itm.deleted,
                            ),
                    )
                };
                if temp_init {
                    drop(lock);
                    self.stats
                        .bg_fetches_scheduled
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(EmberError::WouldBlock);
                }
                if loses {
                    self.stats
                        .set_meta_resolution_failed
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(EmberError::KeyExists);
                }
            } else {
                if self.maybe_key_exists_in_filter(&itm.key) {
                    return Err(self.add_temp_item_and_bg_fetch(&mut lock, &itm.key, is_replication));
                }
                maybe_key_exists = false;
            }
        } else if self.ht.eviction_policy() == EvictionPolicy::FullEviction
            && !self.maybe_key_exists_in_filter(&itm.key)
        {
            maybe_key_exists = false;
        }

        self.maybe_force_unlock(&mut lock, &itm.key, now);

        let ctx = QueueItemCtx {
            gen_by_seqno,
            gen_cas,
            track_cas_drift: true,
        };
        let (status, notify) = self.process_set(
            &mut lock,
            itm,
            cas,
            allow_existing,
            true,
            &ctx,
            maybe_key_exists,
            is_replication,
        );

        match status {
            MutationStatus::NoMem => Err(EmberError::NoMem),
            MutationStatus::InvalidCas => Err(EmberError::KeyExists),
            MutationStatus::IsLocked => Err(EmberError::Locked),
            MutationStatus::NotFound => Err(EmberError::KeyNotFound),
            MutationStatus::WasDirty | MutationStatus::WasClean => {
                let seqno = itm.by_seqno;
                drop(lock);
                if let Some(ctx) = notify {
                    self.notify_new_seqno(ctx);
                }
                Ok(seqno)
            }
            MutationStatus::NeedBgFetch => {
                let exists = self
                    .slot_view(&mut lock, &itm.key, now)
                    .is_some();
                if exists {
                    drop(lock);
                    self.stats
                        .bg_fetches_scheduled
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(EmberError::WouldBlock);
                }
                Err(self.add_temp_item_and_bg_fetch(&mut lock, &itm.key, is_replication))
            }
        }
    }

    /// Backfill path: replica/pending vbuckets receiving a disk snapshot.
    pub fn add_backfill_item(&self, itm: &mut Item, gen_by_seqno: GenerateBySeqno) -> Result<()> {
        let now = time::epoch_secs();
        let mut lock = self.ht.locked_bucket(&itm.key);

        // Only replica or pending vbuckets take backfill; any client lock
        // is void here.
        self.ht.mutate(&mut lock, &itm.key, |v| {
            if v.is_locked(now) {
                v.unlock();
            }
        });

        let ctx = QueueItemCtx {
            gen_by_seqno,
            gen_cas: GenerateCas::No,
            track_cas_drift: false,
        };
        let (status, notify) =
            self.process_set(&mut lock, itm, 0, true, true, &ctx, true, true);

        match status {
            MutationStatus::NoMem => Err(EmberError::NoMem),
            MutationStatus::InvalidCas | MutationStatus::IsLocked => Err(EmberError::KeyExists),
            MutationStatus::WasDirty
            | MutationStatus::NotFound
            | MutationStatus::WasClean => {
                drop(lock);
                if let Some(ctx) = notify {
                    self.notify_new_seqno(ctx);
                }
                Ok(())
            }
            MutationStatus::NeedBgFetch => {
                panic!(
                    "VBucket::add_backfill_item: set on a non-active vbucket should not \
                     require a metadata fetch"
                );
            }
        }
    }

    // --- public operations: deletes ---

    /// Soft-delete the document for `key`. `cas` guards the delete when
    /// nonzero and receives the tombstone's CAS on success. Returns the
    /// deletion's seqno and the tombstone metadata.
    pub fn delete_item(&self, key: &DocKey, cas: &mut u64) -> Result<(i64, ItemMeta)> {
        self.stats.total_deletes.fetch_add(1, Ordering::Relaxed);
        let now = time::epoch_secs();
        let mut lock = self.ht.locked_bucket(key);
        let view = self.slot_view(&mut lock, key, now);

        let Some(view) = view else {
            if self.ht.eviction_policy() == EvictionPolicy::ValueOnly {
                return Err(EmberError::KeyNotFound);
            }
            return if self.maybe_key_exists_in_filter(key) {
                Err(self.add_temp_item_and_bg_fetch(&mut lock, key, false))
            } else {
                Err(EmberError::KeyNotFound)
            };
        };

        if view.deleted || view.temp {
            if self.ht.eviction_policy() == EvictionPolicy::ValueOnly {
                return Err(EmberError::KeyNotFound);
            }
            if view.temp_init {
                drop(lock);
                self.stats
                    .bg_fetches_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                return Err(EmberError::WouldBlock);
            }
            if view.temp_non_existent || view.temp_deleted {
                // Do not preserve a temp marker for a key that does not
                // exist.
                self.ht.delete(&mut lock, key);
            }
            return Err(EmberError::KeyNotFound);
        }

        self.maybe_force_unlock(&mut lock, key, now);

        let (status, notify) = if view.expired {
            self.inc_expiration_stat(ExpireBy::Access);
            self.process_expired_item(&mut lock, key)
        } else {
            let metadata = ItemMeta {
                rev_seqno: view.rev_seqno + 1,
                ..Default::default()
            };
            self.process_soft_delete(
                &mut lock,
                key,
                *cas,
                &metadata,
                &QueueItemCtx::generated(),
                false,
            )
        };

        match status {
            MutationStatus::NoMem => Err(EmberError::NoMem),
            MutationStatus::InvalidCas => Err(EmberError::KeyExists),
            MutationStatus::IsLocked => Err(EmberError::LockedTmpFail),
            MutationStatus::NotFound | MutationStatus::WasClean | MutationStatus::WasDirty => {
                // NotFound here means the value had expired; the deletion is
                // still queued so it persists.
                let expired = status == MutationStatus::NotFound;
                let (seqno, meta) = self
                    .ht
                    .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
                    .map(|v| (v.by_seqno(), v.meta()))
                    .unwrap_or((0, ItemMeta::default()));
                *cas = meta.cas;
                drop(lock);
                if let Some(ctx) = notify {
                    self.notify_new_seqno(ctx);
                }
                if expired {
                    Err(EmberError::KeyNotFound)
                } else {
                    Ok((seqno, meta))
                }
            }
            MutationStatus::NeedBgFetch => {
                panic!("VBucket::delete_item: unexpected NeedBgFetch from processSoftDelete")
            }
        }
    }

    /// Delete carrying external metadata. When the current slot holds
    /// xattrs, user keys are pruned and the delete becomes an update that
    /// preserves the system xattrs.
    #[allow(clippy::too_many_arguments)]
    pub fn delete_with_meta(
        &self,
        key: &DocKey,
        cas: &mut u64,
        itm_meta: &ItemMeta,
        force: bool,
        gen_by_seqno: GenerateBySeqno,
        gen_cas: GenerateCas,
        is_replication: bool,
    ) -> Result<i64> {
        self.stats.total_deletes.fetch_add(1, Ordering::Relaxed);
        let now = time::epoch_secs();
        let mut lock = self.ht.locked_bucket(key);
        let view = self.slot_view(&mut lock, key, now);

        if !force {
            match view {
                Some(v) => {
                    if v.temp_init {
                        drop(lock);
                        self.stats
                            .bg_fetches_scheduled
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(EmberError::WouldBlock);
                    }
                    let loses = {
                        let sv = self
                            .ht
                            .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
                            .unwrap();
                        !self
                            .conflict_resolver
                            .resolve(sv, itm_meta, DATATYPE_RAW, true)
                    };
                    if loses {
                        self.stats
                            .del_meta_resolution_failed
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(EmberError::KeyExists);
                    }
                }
                None => {
                    if self.maybe_key_exists_in_filter(key) {
                        return Err(self.add_temp_item_and_bg_fetch(&mut lock, key, is_replication));
                    }
                    // The filter says the key is absent on disk, but a
                    // valid-CAS delete must still be persisted.
                    let (status, _) = self.add_temp_stored_value(&mut lock, key, is_replication);
                    if status == AddStatus::NoMem {
                        return Err(EmberError::NoMem);
                    }
                    self.ht.mutate(&mut lock, key, |v| v.set_deleted());
                }
            }
        } else if view.is_none() {
            let (status, _) = self.add_temp_stored_value(&mut lock, key, is_replication);
            if status == AddStatus::NoMem {
                return Err(EmberError::NoMem);
            }
            self.ht.mutate(&mut lock, key, |v| {
                v.set_deleted();
                v.set_cas(*cas);
            });
        } else if view.is_some_and(|v| v.temp_init) {
            self.ht.mutate(&mut lock, key, |v| {
                v.set_deleted();
                v.set_cas(*cas);
            });
        }

        self.maybe_force_unlock(&mut lock, key, now);

        let ctx = QueueItemCtx {
            gen_by_seqno,
            gen_cas,
            track_cas_drift: true,
        };

        // System xattrs must survive the delete.
        let pruned = self
            .ht
            .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
            .and_then(|v| {
                if is_xattr(v.datatype()) {
                    v.value().and_then(|val| xattr::prune_user_keys(val))
                } else {
                    None
                }
            });

        let (status, notify) = match pruned {
            Some(blob) => {
                let mut itm = Item {
                    key: key.clone(),
                    value: Some(blob),
                    meta: *itm_meta,
                    by_seqno: 0,
                    datatype: DATATYPE_XATTR,
                    deleted: true,
                    nru: INITIAL_NRU_VALUE,
                };
                let (s, n) = self.update_stored_value(&mut lock, &mut itm, &ctx);
                self.ht.update_max_deleted_rev_seqno(itm.meta.rev_seqno);
                (s, Some(n))
            }
            None => self.process_soft_delete(&mut lock, key, *cas, itm_meta, &ctx, true),
        };

        *cas = self
            .ht
            .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
            .map_or(0, |v| v.cas());

        match status {
            MutationStatus::NoMem => Err(EmberError::NoMem),
            MutationStatus::InvalidCas => Err(EmberError::KeyExists),
            MutationStatus::IsLocked => Err(EmberError::LockedTmpFail),
            MutationStatus::NotFound => Err(EmberError::KeyNotFound),
            MutationStatus::WasDirty | MutationStatus::WasClean => {
                let seqno = self
                    .ht
                    .find(&mut lock, key, WantsDeleted::Yes, TrackReference::No)
                    .map_or(0, |v| v.by_seqno());
                drop(lock);
                if let Some(ctx) = notify {
                    self.notify_new_seqno(ctx);
                }
                Ok(seqno)
            }
            MutationStatus::NeedBgFetch => {
                drop(lock);
                self.stats
                    .bg_fetches_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                Err(EmberError::WouldBlock)
            }
        }
    }

    /// Pager/compactor path: soft-delete `it` if the in-memory slot still
    /// matches its CAS.
    pub fn delete_expired_item(&self, it: &Item, start_time: u32, source: ExpireBy) {
        let key = &it.key;
        let mut lock = self.ht.locked_bucket(key);
        let view = self.slot_view(&mut lock, key, start_time);

        match view {
            Some(v) => {
                if v.cas != it.meta.cas {
                    return;
                }
                if v.temp_non_existent || v.temp_deleted {
                    self.ht.delete(&mut lock, key);
                } else if v.expired && !v.deleted {
                    let (_, notify) = self.process_expired_item(&mut lock, key);
                    drop(lock);
                    if let Some(ctx) = notify {
                        self.notify_new_seqno(ctx);
                    }
                }
            }
            None => {
                if self.ht.eviction_policy() == EvictionPolicy::FullEviction
                    && self.maybe_key_exists_in_filter(key)
                {
                    // Queue a deletion for the evicted key so the expiry
                    // reaches disk.
                    let (status, _) = self.add_temp_stored_value(&mut lock, key, false);
                    if status == AddStatus::NoMem {
                        return;
                    }
                    self.ht.mutate(&mut lock, key, |v| {
                        v.set_deleted();
                        v.set_rev_seqno(it.meta.rev_seqno);
                        let mut restored = it.clone();
                        restored.deleted = false;
                        v.restore_value(&restored);
                    });
                    let (_, notify) = self.process_expired_item(&mut lock, key);
                    drop(lock);
                    if let Some(ctx) = notify {
                        self.notify_new_seqno(ctx);
                    }
                }
            }
        }
        self.inc_expiration_stat(source);
    }

    /// Remove the stored value outright, bypassing the tombstone protocol.
    /// Fails on a live CAS-locked value.
    pub fn delete_key(&self, key: &DocKey) -> bool {
        let now = time::epoch_secs();
        let mut lock = self.ht.locked_bucket(key);
        let Some(view) = self.slot_view(&mut lock, key, now) else {
            return false;
        };
        if !view.deleted && view.locked {
            return false;
        }
        self.ht.delete(&mut lock, key)
    }

    /// Flusher callback after a mutation reached disk: the slot becomes
    /// clean when its revision still matches the persisted item.
    pub fn persisted_on_disk(&self, queued: &Item) {
        let mut lock = self.ht.locked_bucket(&queued.key);
        self.ht.mutate(&mut lock, &queued.key, |v| {
            if v.rev_seqno() == queued.meta.rev_seqno && !v.is_deleted() {
                v.mark_clean();
            }
        });
        drop(lock);
        self.did_flush_item(queued.value_len());
    }

    /// Flusher callback after a deletion reached disk: drop the tombstone
    /// from memory when the revision still matches, and remember the key in
    /// the bloom filter.
    pub fn deleted_on_disk(&self, queued: &Item) {
        let mut lock = self.ht.locked_bucket(&queued.key);
        let matches = self
            .ht
            .find(&mut lock, &queued.key, WantsDeleted::Yes, TrackReference::No)
            .is_some_and(|v| v.is_deleted() && v.rev_seqno() == queued.meta.rev_seqno);
        if matches {
            let deleted = self.ht.delete(&mut lock, &queued.key);
            assert!(
                deleted,
                "VBucket::deleted_on_disk: failed to delete key with seqno {}",
                queued.by_seqno
            );
            drop(lock);
            self.add_to_filter(&queued.key);
        }
    }

    /// Force the dirty flag on an existing slot.
    pub fn mark_dirty(&self, key: &DocKey) {
        let mut lock = self.ht.locked_bucket(key);
        if self
            .ht
            .mutate(&mut lock, key, |v| v.mark_dirty())
            .is_none()
        {
            warn!(vbid = self.id, "mark_dirty: key missing from vbucket");
        }
    }

    /// Evict the value for `key` if eligible; full eviction also records
    /// the key in the bloom filter.
    pub fn page_out(&self, key: &DocKey) -> bool {
        let mut lock = self.ht.locked_bucket(key);
        let ejected = self.ht.eject(&mut lock, key);
        drop(lock);
        if ejected {
            self.stats
                .num_values_ejected
                .fetch_add(1, Ordering::Relaxed);
            if self.ht.eviction_policy() == EvictionPolicy::FullEviction {
                self.add_to_filter(key);
            }
        }
        ejected
    }

    // --- resident ratio, used by the pager ---

    pub fn num_items(&self) -> usize {
        self.ht.num_items()
    }

    pub fn num_non_resident_items(&self) -> usize {
        self.ht.num_non_resident()
    }

    pub fn is_resident_ratio_under_threshold(&self, threshold: f64) -> bool {
        assert!(
            self.ht.eviction_policy() == EvictionPolicy::FullEviction,
            "VBucket::is_resident_ratio_under_threshold: policy must be full-eviction"
        );
        self.ht.resident_ratio() <= threshold
    }

    // --- stats surface ---

    pub fn ops_create(&self) -> u64 {
        self.ops_create.load(Ordering::Relaxed)
    }

    pub fn ops_update(&self) -> u64 {
        self.ops_update.load(Ordering::Relaxed)
    }

    pub fn ops_delete(&self) -> u64 {
        self.ops_delete.load(Ordering::Relaxed)
    }

    pub fn ops_reject(&self) -> u64 {
        self.ops_reject.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.ops_create.store(0, Ordering::Relaxed);
        self.ops_update.store(0, Ordering::Relaxed);
        self.ops_delete.store(0, Ordering::Relaxed);
        self.ops_reject.store(0, Ordering::Relaxed);
        self.dirty_queue_fill.store(0, Ordering::Relaxed);
        self.dirty_queue_drain.store(0, Ordering::Relaxed);
        self.hlc.reset_stats();
    }

    /// Key/value stat pairs for the `vbucket-details` control command.
    pub fn add_stats(&self, detail: bool) -> Vec<(String, String)> {
        let prefix = format!("vb_{}", self.id);
        let mut out = vec![(prefix.clone(), self.get_state().as_str().to_string())];
        if detail {
            let mut push = |name: &str, value: String| {
                out.push((format!("{}:{}", prefix, name), value));
            };
            push("num_items", self.ht.num_items().to_string());
            push("num_temp_items", self.ht.num_temp_items().to_string());
            push("num_non_resident", self.ht.num_non_resident().to_string());
            push("ht_memory", self.ht.mem_size().to_string());
            push("ht_meta_memory", self.ht.meta_size().to_string());
            push("ht_size", self.ht.size().to_string());
            push("num_ejects", self.ht.num_ejects().to_string());
            push("ops_create", self.ops_create().to_string());
            push("ops_update", self.ops_update().to_string());
            push("ops_delete", self.ops_delete().to_string());
            push("ops_reject", self.ops_reject().to_string());
            push("queue_size", self.dirty_queue_size().to_string());
            push(
                "queue_fill",
                self.dirty_queue_fill.load(Ordering::Relaxed).to_string(),
            );
            push(
                "queue_drain",
                self.dirty_queue_drain.load(Ordering::Relaxed).to_string(),
            );
            push(
                "pending_writes",
                self.dirty_queue_pending_writes
                    .load(Ordering::Relaxed)
                    .to_string(),
            );
            push("high_seqno", self.high_seqno().to_string());
            push("purge_seqno", self.purge_seqno().to_string());
            push("uuid", self.failover.latest_uuid().to_string());
            push("bloom_filter", self.filter_status_string());
            push("max_cas", self.hlc.max_cas().to_string());
            push("num_expired", self.num_expired_items().to_string());
            push(
                "sync_writes_in_flight",
                self.durability.num_tracked().to_string(),
            );
            push("manifest_uid", self.collections_uid().to_string());
        }
        out
    }
}
