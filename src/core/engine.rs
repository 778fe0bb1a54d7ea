use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::constants::*;
use crate::core::conflict::ConflictResolutionMode;
use crate::core::hash_table::EvictionPolicy;
use crate::core::pager::{self, PagerAlgorithm, PagerState, PagerTask};
use crate::core::vbucket::{VBucket, VBucketSpec, VBucketState};
use crate::error::{EmberError, Result};
use crate::stats::Statistics;

/// Engine-wide configuration. Use [`EngineBuilder`] to construct.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub num_vbuckets: u16,
    pub num_shards: usize,
    pub max_memory: usize,
    pub mem_low_wat_fraction: f64,
    pub mem_high_wat_fraction: f64,
    pub ht_size: usize,
    pub ht_locks: usize,
    pub eviction_policy: EvictionPolicy,
    pub pager_algorithm: PagerAlgorithm,
    pub conflict_mode: ConflictResolutionMode,
    pub checkpoint_max_items: usize,
    pub pager_sleep: Duration,
    pub pager_active_vb_pcnt: usize,
    pub exp_pager_sleep: Duration,
    /// Spawn the item/expiry pager threads. Off for embedders that drive
    /// passes themselves.
    pub background_pagers: bool,
    pub bloom_key_count: usize,
    pub bloom_probability: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_vbuckets: DEFAULT_NUM_VBUCKETS,
            num_shards: num_cpus::get().max(1),
            max_memory: DEFAULT_MAX_MEMORY,
            mem_low_wat_fraction: DEFAULT_MEM_LOW_WAT,
            mem_high_wat_fraction: DEFAULT_MEM_HIGH_WAT,
            ht_size: DEFAULT_HT_SIZE,
            ht_locks: DEFAULT_HT_LOCKS,
            eviction_policy: EvictionPolicy::ValueOnly,
            pager_algorithm: PagerAlgorithm::StatisticalCounter,
            conflict_mode: ConflictResolutionMode::RevisionSeqno,
            checkpoint_max_items: DEFAULT_CHECKPOINT_MAX_ITEMS,
            pager_sleep: DEFAULT_PAGER_SLEEP,
            pager_active_vb_pcnt: DEFAULT_PAGER_ACTIVE_VB_PCNT,
            exp_pager_sleep: DEFAULT_EXP_PAGER_SLEEP,
            background_pagers: false,
            bloom_key_count: BLOOM_DEFAULT_KEY_COUNT,
            bloom_probability: BLOOM_DEFAULT_PROBABILITY,
        }
    }
}

/// Fluent builder for [`EmberEngine`].
///
/// # Example
///
/// ```rust
/// use emberdb::EmberEngine;
///
/// # fn main() -> emberdb::Result<()> {
/// let engine = EmberEngine::builder()
///     .num_vbuckets(64)
///     .max_memory(256 * 1024 * 1024)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn num_vbuckets(mut self, n: u16) -> Self {
        self.config.num_vbuckets = n;
        self
    }

    pub fn num_shards(mut self, n: usize) -> Self {
        self.config.num_shards = n.max(1);
        self
    }

    /// Memory ceiling in bytes. Watermarks derive from this unless set
    /// explicitly.
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.config.max_memory = bytes;
        self
    }

    pub fn watermarks(mut self, low_fraction: f64, high_fraction: f64) -> Self {
        self.config.mem_low_wat_fraction = low_fraction;
        self.config.mem_high_wat_fraction = high_fraction;
        self
    }

    pub fn ht_size(mut self, buckets: usize) -> Self {
        self.config.ht_size = buckets;
        self
    }

    pub fn ht_locks(mut self, locks: usize) -> Self {
        self.config.ht_locks = locks;
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction_policy = policy;
        self
    }

    pub fn pager_algorithm(mut self, algorithm: PagerAlgorithm) -> Self {
        self.config.pager_algorithm = algorithm;
        self
    }

    pub fn conflict_mode(mut self, mode: ConflictResolutionMode) -> Self {
        self.config.conflict_mode = mode;
        self
    }

    pub fn checkpoint_max_items(mut self, n: usize) -> Self {
        self.config.checkpoint_max_items = n;
        self
    }

    pub fn pager_sleep(mut self, sleep: Duration) -> Self {
        self.config.pager_sleep = sleep;
        self
    }

    pub fn pager_active_vb_pcnt(mut self, pcnt: usize) -> Self {
        self.config.pager_active_vb_pcnt = pcnt.min(100);
        self
    }

    pub fn background_pagers(mut self, on: bool) -> Self {
        self.config.background_pagers = on;
        self
    }

    pub fn build(self) -> Result<Arc<EmberEngine>> {
        EmberEngine::with_config(self.config)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The engine: a fixed vector of vbuckets sharded across I/O shards, the
/// shared statistics hub and the process-wide pagers.
pub struct EmberEngine {
    config: EngineConfig,
    stats: Arc<Statistics>,
    buckets: Vec<RwLock<Option<Arc<VBucket>>>>,
    pub(crate) pager: PagerState,
    tasks: Mutex<Vec<PagerTask>>,
}

impl EmberEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn with_config(config: EngineConfig) -> Result<Arc<Self>> {
        assert!(
            config.num_vbuckets > 0 && config.num_vbuckets <= MAX_VBUCKETS,
            "EmberEngine: vbucket count {} out of range",
            config.num_vbuckets
        );
        let stats = Arc::new(Statistics::new(config.max_memory));
        stats.set_watermarks(
            (config.max_memory as f64 * config.mem_low_wat_fraction) as usize,
            (config.max_memory as f64 * config.mem_high_wat_fraction) as usize,
        );
        let buckets = (0..config.num_vbuckets)
            .map(|_| RwLock::new(None))
            .collect();

        let engine = Arc::new(Self {
            pager: PagerState::new(config.pager_active_vb_pcnt, config.pager_algorithm),
            config,
            stats,
            buckets,
            tasks: Mutex::new(Vec::new()),
        });

        if engine.config.background_pagers {
            let mut tasks = engine.tasks.lock();
            tasks.push(pager::spawn_item_pager(
                Arc::downgrade(&engine),
                engine.config.pager_sleep,
            ));
            tasks.push(pager::spawn_expiry_pager(
                Arc::downgrade(&engine),
                engine.config.exp_pager_sleep,
            ));
        }

        info!(
            vbuckets = engine.config.num_vbuckets,
            shards = engine.config.num_shards,
            max_memory = engine.config.max_memory,
            "engine created"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// I/O shard owning `vbid`.
    pub fn shard_id(&self, vbid: u16) -> usize {
        vbid as usize % self.config.num_shards
    }

    // --- vbucket map ---

    /// Set the state of a vbucket, creating it if it does not exist yet.
    pub fn set_vbucket_state(&self, vbid: u16, state: VBucketState) -> Result<Arc<VBucket>> {
        self.check_vbid(vbid)?;
        let slot = &self.buckets[vbid as usize];
        {
            let guard = slot.read();
            if let Some(vb) = guard.as_ref() {
                vb.set_state(state);
                return Ok(vb.clone());
            }
        }
        let mut guard = slot.write();
        if let Some(vb) = guard.as_ref() {
            vb.set_state(state);
            return Ok(vb.clone());
        }
        let mut spec = VBucketSpec::new(vbid, state);
        spec.ht_size = self.config.ht_size;
        spec.ht_locks = self.config.ht_locks;
        spec.eviction_policy = self.config.eviction_policy;
        spec.conflict_mode = self.config.conflict_mode;
        spec.checkpoint_max_items = self.config.checkpoint_max_items;
        let vb = Arc::new(VBucket::new(spec, self.stats.clone())?);
        if self.config.eviction_policy == EvictionPolicy::FullEviction {
            vb.create_filter(self.config.bloom_key_count, self.config.bloom_probability);
        }
        *guard = Some(vb.clone());
        Ok(vb)
    }

    pub fn get_vbucket(&self, vbid: u16) -> Result<Arc<VBucket>> {
        self.check_vbid(vbid)?;
        self.buckets[vbid as usize]
            .read()
            .clone()
            .ok_or(EmberError::UnknownVBucket(vbid))
    }

    /// Drop the vbucket from the map. The memory teardown happens on a
    /// background thread once the last in-flight handle is released, never
    /// on a front-end thread.
    pub fn drop_vbucket(&self, vbid: u16) -> Result<()> {
        self.check_vbid(vbid)?;
        let vb = self.buckets[vbid as usize].write().take();
        match vb {
            Some(vb) => {
                debug!(vbid, "vbucket dropped; deferring deletion");
                std::thread::Builder::new()
                    .name(format!("ember-vb-del-{}", vbid))
                    .spawn(move || drop(vb))
                    .ok();
                Ok(())
            }
            None => Err(EmberError::UnknownVBucket(vbid)),
        }
    }

    fn check_vbid(&self, vbid: u16) -> Result<()> {
        if vbid as usize >= self.buckets.len() {
            return Err(EmberError::UnknownVBucket(vbid));
        }
        Ok(())
    }

    /// Ids of all live vbuckets.
    pub fn vbucket_ids(&self) -> Vec<u16> {
        (0..self.buckets.len() as u16)
            .filter(|&id| self.buckets[id as usize].read().is_some())
            .collect()
    }

    pub fn num_vbuckets_in_state(&self, state: VBucketState) -> usize {
        self.vbucket_ids()
            .into_iter()
            .filter(|&id| {
                self.get_vbucket(id)
                    .map(|vb| vb.get_state() == state)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Visit every live vbucket.
    pub fn visit_vbuckets(&self, mut f: impl FnMut(&Arc<VBucket>)) {
        for id in self.vbucket_ids() {
            if let Ok(vb) = self.get_vbucket(id) {
                f(&vb);
            }
        }
    }

    // --- resident ratios, consumed by the pager ---

    fn resident_ratio_for(&self, want_active: bool) -> f64 {
        let mut items = 0usize;
        let mut non_resident = 0usize;
        self.visit_vbuckets(|vb| {
            let is_active = vb.get_state() == VBucketState::Active;
            if is_active == want_active {
                items += vb.num_items();
                non_resident += vb.num_non_resident_items();
            }
        });
        if items == 0 {
            return 1.0;
        }
        (items.saturating_sub(non_resident)) as f64 / items as f64
    }

    pub fn active_resident_ratio(&self) -> f64 {
        self.resident_ratio_for(true)
    }

    pub fn replica_resident_ratio(&self) -> f64 {
        self.resident_ratio_for(false)
    }

    // --- memory pressure ---

    pub fn is_memory_usage_too_high(&self) -> bool {
        self.stats.is_memory_usage_too_high()
    }

    /// Wake the item pager if memory has risen above the high watermark.
    pub fn check_and_maybe_free_memory(&self) {
        if self.is_memory_usage_too_high() {
            self.schedule_pager_now();
        }
    }

    /// Request an immediate pager pass; reentrant requests coalesce.
    pub fn schedule_pager_now(&self) {
        self.pager.schedule_now();
        let tasks = self.tasks.lock();
        for t in tasks.iter() {
            t.wake();
        }
    }

    /// Run one item-pager pass synchronously on the calling thread.
    pub fn run_item_pager_pass(&self) -> bool {
        pager::item_pager_pass(self)
    }

    /// Run one expiry-pager pass synchronously on the calling thread.
    pub fn run_expiry_pager_pass(&self) -> bool {
        pager::expiry_pager_pass(self)
    }

    // --- control surface ---

    /// Serve one administrative stat command as ordered key/value pairs.
    /// The socket front end rendering these as text or JSON is an external
    /// collaborator.
    pub fn stat_group(&self, command: &str) -> Result<Vec<(String, String)>> {
        let mut parts = command.split_whitespace();
        let group = parts.next().unwrap_or("all");
        let arg = parts.next();

        let parse_vbid = |arg: Option<&str>| -> Result<Option<u16>> {
            match arg {
                None => Ok(None),
                Some(s) => s
                    .parse::<u16>()
                    .map(Some)
                    .map_err(|_| EmberError::UnknownStatGroup(format!("bad vbid: {}", s))),
            }
        };

        match group {
            "all" | "memory" => {
                let s = self.stats.snapshot();
                Ok(vec![
                    ("mem_used".into(), s.memory_usage.to_string()),
                    ("ep_max_size".into(), s.max_memory.to_string()),
                    ("ep_mem_low_wat".into(), s.mem_low_wat.to_string()),
                    ("ep_mem_high_wat".into(), s.mem_high_wat.to_string()),
                    ("checkpoint_memory".into(), s.checkpoint_memory.to_string()),
                    ("ep_total_gets".into(), s.total_gets.to_string()),
                    ("ep_total_sets".into(), s.total_sets.to_string()),
                    ("ep_total_deletes".into(), s.total_deletes.to_string()),
                    ("ep_expired_access".into(), s.expired_access.to_string()),
                    ("ep_expired_pager".into(), s.expired_pager.to_string()),
                    ("ep_num_pager_runs".into(), s.pager_runs.to_string()),
                    (
                        "ep_num_expiry_pager_runs".into(),
                        s.expiry_pager_runs.to_string(),
                    ),
                    (
                        "ep_num_value_ejects".into(),
                        s.num_values_ejected.to_string(),
                    ),
                    (
                        "ep_items_rm_from_checkpoints".into(),
                        s.items_removed_from_checkpoints.to_string(),
                    ),
                    ("ep_oom_errors".into(), s.oom_errors.to_string()),
                    ("ep_tmp_oom_errors".into(), s.tmp_oom_errors.to_string()),
                    (
                        "ep_num_ops_set_meta_res_fail".into(),
                        s.set_meta_resolution_failed.to_string(),
                    ),
                    (
                        "ep_num_ops_del_meta_res_fail".into(),
                        s.del_meta_resolution_failed.to_string(),
                    ),
                    (
                        "ep_sync_writes_committed".into(),
                        s.sync_writes_committed.to_string(),
                    ),
                    (
                        "ep_sync_writes_aborted".into(),
                        s.sync_writes_aborted.to_string(),
                    ),
                    ("ep_diskqueue_items".into(), s.disk_queue_size.to_string()),
                ])
            }
            "vbucket-details" => {
                let mut out = Vec::new();
                self.for_stat_vbuckets(parse_vbid(arg)?, |vb| {
                    out.extend(vb.add_stats(true));
                })?;
                Ok(out)
            }
            "checkpoint" => {
                let mut out = Vec::new();
                self.for_stat_vbuckets(parse_vbid(arg)?, |vb| {
                    let prefix = format!("vb_{}", vb.id());
                    let cm = vb.checkpoint_manager();
                    out.push((
                        format!("{}:open_checkpoint_id", prefix),
                        cm.get_open_checkpoint_id().to_string(),
                    ));
                    out.push((
                        format!("{}:num_checkpoints", prefix),
                        cm.num_checkpoints().to_string(),
                    ));
                    out.push((
                        format!("{}:num_open_checkpoint_items", prefix),
                        cm.num_open_checkpoint_items().to_string(),
                    ));
                    out.push((
                        format!("{}:high_seqno", prefix),
                        cm.high_seqno().to_string(),
                    ));
                    out.push((
                        format!("{}:persistence_checkpoint_id", prefix),
                        vb.persistence_checkpoint_id().to_string(),
                    ));
                })?;
                Ok(out)
            }
            "durability-monitor" => {
                let mut out = Vec::new();
                self.for_stat_vbuckets(parse_vbid(arg)?, |vb| {
                    let prefix = format!("vb_{}", vb.id());
                    let dm = vb.durability_monitor();
                    out.push((
                        format!("{}:num_tracked", prefix),
                        dm.num_tracked().to_string(),
                    ));
                    out.push((
                        format!("{}:replication_chain_size", prefix),
                        dm.replication_chain_size().to_string(),
                    ));
                    out.push((
                        format!("{}:high_tracked_seqnos", prefix),
                        format!("{:?}", dm.tracked_seqnos()),
                    ));
                })?;
                Ok(out)
            }
            "hash" => {
                let detail = arg == Some("detail");
                let mut out = Vec::new();
                self.for_stat_vbuckets(None, |vb| {
                    let prefix = format!("vb_{}", vb.id());
                    out.push((
                        format!("{}:num_items", prefix),
                        vb.ht.num_items().to_string(),
                    ));
                    out.push((
                        format!("{}:mem_size", prefix),
                        vb.ht.mem_size().to_string(),
                    ));
                    if detail {
                        out.push((
                            format!("{}:num_temp_items", prefix),
                            vb.ht.num_temp_items().to_string(),
                        ));
                        out.push((
                            format!("{}:num_non_resident", prefix),
                            vb.ht.num_non_resident().to_string(),
                        ));
                        out.push((
                            format!("{}:num_ejects", prefix),
                            vb.ht.num_ejects().to_string(),
                        ));
                        out.push((
                            format!("{}:max_deleted_revid", prefix),
                            vb.ht.max_deleted_rev_seqno().to_string(),
                        ));
                    }
                })?;
                Ok(out)
            }
            "vbucket-seqno" => {
                let mut out = Vec::new();
                self.for_stat_vbuckets(parse_vbid(arg)?, |vb| {
                    let prefix = format!("vb_{}", vb.id());
                    out.push((
                        format!("{}:high_seqno", prefix),
                        vb.high_seqno().to_string(),
                    ));
                    out.push((
                        format!("{}:uuid", prefix),
                        vb.failover_table().latest_uuid().to_string(),
                    ));
                    out.push((
                        format!("{}:purge_seqno", prefix),
                        vb.purge_seqno().to_string(),
                    ));
                })?;
                Ok(out)
            }
            "reset" => {
                self.stats.reset();
                self.visit_vbuckets(|vb| vb.reset_stats());
                Ok(Vec::new())
            }
            other => Err(EmberError::UnknownStatGroup(other.to_string())),
        }
    }

    fn for_stat_vbuckets(
        &self,
        vbid: Option<u16>,
        mut f: impl FnMut(&Arc<VBucket>),
    ) -> Result<()> {
        match vbid {
            Some(id) => {
                let vb = self.get_vbucket(id)?;
                f(&vb);
                Ok(())
            }
            None => {
                self.visit_vbuckets(|vb| f(vb));
                Ok(())
            }
        }
    }
}

impl Drop for EmberEngine {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        for task in tasks.iter_mut() {
            task.stop();
        }
    }
}
