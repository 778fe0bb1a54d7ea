use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::constants::MAX_CHAIN_SIZE;
use crate::core::item::{DurabilityLevel, DurabilityRequirements};
use crate::stats::Statistics;
use std::sync::atomic::Ordering;

/// A node's progress through the tracked writes, kept as plain seqno
/// values so it stays valid across removals. `last_write_seqno` is the
/// seqno of the last tracked write this node has covered (the past-the-end
/// position is simply a seqno at or beyond the tail); `last_ack_seqno` is
/// the raw value the node acknowledged.
#[derive(Debug, Clone, Copy, Default)]
struct Position {
    last_write_seqno: u64,
    last_ack_seqno: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct NodePositions {
    memory: Position,
    disk: Position,
}

#[derive(Debug)]
struct Chain {
    nodes: Vec<String>,
    positions: HashMap<String, NodePositions>,
}

impl Chain {
    fn active(&self) -> &str {
        &self.nodes[0]
    }

    fn majority(&self) -> usize {
        self.nodes.len() / 2 + 1
    }
}

/// One tracked synchronous write.
#[derive(Debug, Clone)]
pub struct SyncWrite {
    pub seqno: u64,
    pub reqs: DurabilityRequirements,
    created: Instant,
}

impl SyncWrite {
    fn expired(&self, now: Instant) -> bool {
        self.reqs.timeout_ms != 0
            && self.created + Duration::from_millis(self.reqs.timeout_ms) <= now
    }
}

struct Inner {
    chain: Option<Chain>,
    tracked: BTreeMap<u64, SyncWrite>,
    // Highest seqno ever tracked; additions must stay strictly increasing
    // even across commits and aborts.
    high_tracked_seqno: u64,
}

/// Tracks in-flight synchronous writes for one vbucket until the
/// replication chain has acknowledged them at the required durability
/// level, then commits them in seqno order; writes whose timeout passes
/// are aborted.
///
/// All state lives behind a single mutex: ack, add, timeout and topology
/// changes are mutually exclusive.
pub struct DurabilityMonitor {
    inner: Mutex<Inner>,
    stats: Arc<Statistics>,
}

impl DurabilityMonitor {
    pub fn new(stats: Arc<Statistics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                chain: None,
                tracked: BTreeMap::new(),
                high_tracked_seqno: 0,
            }),
            stats,
        }
    }

    /// Install or replace the replication chain. The first node is the
    /// active. Positions of nodes surviving the change are carried over;
    /// new nodes start from zero.
    ///
    /// Panics on an empty chain, more than `MAX_CHAIN_SIZE` nodes, or a
    /// duplicate node name: topology invariants are programmer faults.
    pub fn set_replication_topology(&self, nodes: Vec<String>) {
        assert!(
            !nodes.is_empty(),
            "DurabilityMonitor::set_replication_topology: Topology is empty"
        );
        assert!(
            nodes.len() <= MAX_CHAIN_SIZE,
            "DurabilityMonitor::set_replication_topology: Too many nodes in chain: {}",
            nodes.len()
        );
        for (i, n) in nodes.iter().enumerate() {
            assert!(
                !nodes[..i].contains(n),
                "DurabilityMonitor::set_replication_topology: Duplicate node: {}",
                n
            );
        }

        let mut inner = self.inner.lock();
        let mut positions = HashMap::new();
        for n in &nodes {
            let carried = inner
                .chain
                .as_ref()
                .and_then(|c| c.positions.get(n))
                .copied()
                .unwrap_or_default();
            positions.insert(n.clone(), carried);
        }
        info!(?nodes, "durability: replication topology set");
        inner.chain = Some(Chain { nodes, positions });
    }

    /// Start tracking a sync write. Called after the write has been
    /// enqueued in the checkpoint, so the active has implicitly
    /// acknowledged the memory position for its own write.
    pub fn add_sync_write(&self, seqno: u64, reqs: DurabilityRequirements) -> Vec<u64> {
        let mut inner = self.inner.lock();
        assert!(
            inner.chain.is_some(),
            "DurabilityMonitor::add_sync_write: no replication topology set"
        );
        assert!(
            seqno > inner.high_tracked_seqno,
            "DurabilityMonitor::add_sync_write: seqno {} not greater than highest tracked {}",
            seqno,
            inner.high_tracked_seqno
        );
        inner.high_tracked_seqno = seqno;
        inner.tracked.insert(
            seqno,
            SyncWrite {
                seqno,
                reqs,
                created: Instant::now(),
            },
        );

        let chain = inner.chain.as_mut().unwrap();
        let active = chain.active().to_string();
        let pos = chain.positions.get_mut(&active).unwrap();
        pos.memory.last_write_seqno = seqno;
        pos.memory.last_ack_seqno = seqno;

        self.check_commit(&mut inner)
    }

    /// Acknowledgement from `node` that it holds everything up to
    /// `mem_seqno` in memory and `disk_seqno` on disk. Returns the seqnos
    /// committed as a result.
    ///
    /// Panics when `mem_seqno < disk_seqno`, on a non-monotonic ack, or for
    /// a node outside the chain.
    pub fn seqno_ack_received(&self, node: &str, mem_seqno: u64, disk_seqno: u64) -> Vec<u64> {
        assert!(
            mem_seqno >= disk_seqno,
            "DurabilityMonitor::seqno_ack_received: memorySeqno < diskSeqno ({} < {})",
            mem_seqno,
            disk_seqno
        );
        let mut inner = self.inner.lock();
        {
            let chain = inner
                .chain
                .as_ref()
                .expect("DurabilityMonitor::seqno_ack_received: no replication topology set");
            assert!(
                chain.positions.contains_key(node),
                "DurabilityMonitor::seqno_ack_received: node {} not in chain",
                node
            );
        }
        debug!(node, mem_seqno, disk_seqno, "durability: seqno ack");
        Self::advance_node(&mut inner, node, mem_seqno, disk_seqno);
        self.check_commit(&mut inner)
    }

    fn advance_node(inner: &mut Inner, node: &str, mem_seqno: u64, disk_seqno: u64) {
        // Split borrows: read the tracked map while mutating the position.
        let tracked = std::mem::take(&mut inner.tracked);
        {
            let chain = inner.chain.as_mut().unwrap();
            let pos = chain.positions.get_mut(node).unwrap();
            Self::advance_position(&tracked, &mut pos.memory, mem_seqno, "memory");
            Self::advance_position(&tracked, &mut pos.disk, disk_seqno, "disk");
        }
        inner.tracked = tracked;
    }

    fn advance_position(
        tracked: &BTreeMap<u64, SyncWrite>,
        pos: &mut Position,
        ack: u64,
        kind: &str,
    ) {
        assert!(
            ack >= pos.last_ack_seqno,
            "DurabilityMonitor: Monotonic invariant violated for {} ack: {} < {}",
            kind,
            ack,
            pos.last_ack_seqno
        );
        pos.last_ack_seqno = ack;
        // Walk forward over tracked writes the ack covers; an ack beyond
        // the tail simply leaves the position parked past the last entry.
        while let Some((&next, _)) = tracked
            .range((Excluded(pos.last_write_seqno), Unbounded))
            .next()
        {
            if next > ack {
                break;
            }
            pos.last_write_seqno = next;
        }
    }

    /// The flusher persisted up to `persisted_seqno` locally: advance the
    /// active node's disk position. Returns the seqnos committed as a
    /// result.
    pub fn notify_local_persistence(&self, persisted_seqno: u64) -> Vec<u64> {
        let mut inner = self.inner.lock();
        if inner.chain.is_none() {
            return Vec::new();
        }
        let active = inner.chain.as_ref().unwrap().active().to_string();
        // Flusher notifications are idempotent; only move forward.
        let current = inner.chain.as_ref().unwrap().positions[&active]
            .disk
            .last_ack_seqno;
        if persisted_seqno > current {
            let tracked = std::mem::take(&mut inner.tracked);
            {
                let chain = inner.chain.as_mut().unwrap();
                let pos = chain.positions.get_mut(&active).unwrap();
                Self::advance_position(&tracked, &mut pos.disk, persisted_seqno, "disk");
            }
            inner.tracked = tracked;
        }
        self.check_commit(&mut inner)
    }

    /// Abort every tracked write whose timeout has passed at `now`.
    /// Returns the aborted seqnos; the caller surfaces the failure to the
    /// original clients. A timeout of zero never expires.
    pub fn process_timeout(&self, now: Instant) -> Vec<u64> {
        let mut inner = self.inner.lock();
        let expired: Vec<u64> = inner
            .tracked
            .values()
            .filter(|w| w.expired(now))
            .map(|w| w.seqno)
            .collect();
        for seqno in &expired {
            inner.tracked.remove(seqno);
        }
        if !expired.is_empty() {
            info!(?expired, "durability: sync writes timed out");
            self.stats
                .sync_writes_aborted
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
        expired
    }

    /// Re-evaluate the commit condition for every tracked write and remove
    /// those satisfied, in seqno order. A satisfied write is committed even
    /// when an earlier write is still pending (out-of-order commit); the
    /// seqno-keyed positions stay valid throughout.
    fn check_commit(&self, inner: &mut Inner) -> Vec<u64> {
        let Some(chain) = inner.chain.as_ref() else {
            return Vec::new();
        };
        let majority = chain.majority();
        let active = chain.active();
        let active_disk = chain.positions[active].disk.last_write_seqno;

        let mut committed = Vec::new();
        for (&seqno, write) in inner.tracked.iter() {
            let mem_count = chain
                .nodes
                .iter()
                .filter(|n| chain.positions[*n].memory.last_write_seqno >= seqno)
                .count();
            let disk_count = chain
                .nodes
                .iter()
                .filter(|n| chain.positions[*n].disk.last_write_seqno >= seqno)
                .count();
            let satisfied = match write.reqs.level {
                DurabilityLevel::Majority => mem_count >= majority,
                DurabilityLevel::MajorityAndPersistOnMaster => {
                    mem_count >= majority && active_disk >= seqno
                }
                DurabilityLevel::PersistToMajority => disk_count >= majority,
            };
            if satisfied {
                committed.push(seqno);
            }
        }
        for seqno in &committed {
            inner.tracked.remove(seqno);
        }
        if !committed.is_empty() {
            debug!(?committed, "durability: sync writes committed");
            self.stats
                .sync_writes_committed
                .fetch_add(committed.len() as u64, Ordering::Relaxed);
        }
        committed
    }

    // --- introspection, used by stats and tests ---

    pub fn num_tracked(&self) -> usize {
        self.inner.lock().tracked.len()
    }

    pub fn tracked_seqnos(&self) -> Vec<u64> {
        self.inner.lock().tracked.keys().copied().collect()
    }

    pub fn replication_chain_size(&self) -> usize {
        self.inner
            .lock()
            .chain
            .as_ref()
            .map_or(0, |c| c.nodes.len())
    }

    /// (memory, disk) last-write seqnos for `node`.
    pub fn node_write_seqnos(&self, node: &str) -> (u64, u64) {
        let inner = self.inner.lock();
        let pos = inner
            .chain
            .as_ref()
            .and_then(|c| c.positions.get(node))
            .copied()
            .unwrap_or_default();
        (pos.memory.last_write_seqno, pos.disk.last_write_seqno)
    }

    /// (memory, disk) last-acked seqnos for `node`.
    pub fn node_ack_seqnos(&self, node: &str) -> (u64, u64) {
        let inner = self.inner.lock();
        let pos = inner
            .chain
            .as_ref()
            .and_then(|c| c.positions.get(node))
            .copied()
            .unwrap_or_default();
        (pos.memory.last_ack_seqno, pos.disk.last_ack_seqno)
    }
}
