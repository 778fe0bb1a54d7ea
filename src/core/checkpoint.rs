use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::core::hlc::Hlc;
use crate::core::item::DocKey;
use crate::stats::Statistics;

/// Whether the engine assigns the by-seqno or the item brings its own
/// (replica/backfill paths).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateBySeqno {
    Yes,
    No,
}

/// Whether the engine assigns a fresh CAS from the HLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateCas {
    Yes,
    No,
}

/// Kind of entry in a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    Mutation,
    Deletion,
    SystemEvent,
}

/// Reference to a stored value captured in a checkpoint, consumed by
/// persistence and replication.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub key: DocKey,
    pub by_seqno: i64,
    pub cas: u64,
    pub op: QueueOp,
    pub deleted: bool,
    /// System events carry their serialized payload here.
    pub value: Option<Bytes>,
}

impl QueuedItem {
    fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.key.size()
            + self.value.as_ref().map_or(0, |v| v.len())
    }
}

/// Result of queueing one dirty item.
#[derive(Debug, Clone, Copy)]
pub struct QueueDirtyResult {
    pub by_seqno: i64,
    pub cas: u64,
    /// True when the flusher should be prodded (the open checkpoint was
    /// drained before this item arrived).
    pub notify_flusher: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckpointState {
    Open,
    Closed,
}

struct Checkpoint {
    id: u64,
    state: CheckpointState,
    items: Vec<QueuedItem>,
    num_cursors: usize,
}

struct Inner {
    checkpoints: VecDeque<Checkpoint>,
    cursors: HashMap<u64, u64>,
    next_cursor: u64,
}

/// Per-vbucket ordered log of checkpoints.
///
/// by-seqno values handed out here are strictly monotonic per vbucket;
/// closed checkpoints are reclaimed once no cursor references them.
pub struct CheckpointManager {
    inner: Mutex<Inner>,
    high_seqno: AtomicI64,
    max_items: usize,
    stats: Arc<Statistics>,
}

impl CheckpointManager {
    pub fn new(last_seqno: i64, max_items: usize, stats: Arc<Statistics>) -> Self {
        let mut checkpoints = VecDeque::new();
        checkpoints.push_back(Checkpoint {
            id: 1,
            state: CheckpointState::Open,
            items: Vec::new(),
            num_cursors: 0,
        });
        Self {
            inner: Mutex::new(Inner {
                checkpoints,
                cursors: HashMap::new(),
                next_cursor: 0,
            }),
            high_seqno: AtomicI64::new(last_seqno),
            max_items,
            stats,
        }
    }

    /// Append a dirty item to the open checkpoint, assigning by-seqno and
    /// CAS as requested.
    pub fn queue_dirty(
        &self,
        mut qi: QueuedItem,
        generate_by_seqno: GenerateBySeqno,
        generate_cas: GenerateCas,
        hlc: &Hlc,
    ) -> QueueDirtyResult {
        let mut inner = self.inner.lock();

        match generate_by_seqno {
            GenerateBySeqno::Yes => {
                qi.by_seqno = self.high_seqno.fetch_add(1, Ordering::AcqRel) + 1;
            }
            GenerateBySeqno::No => {
                let high = self.high_seqno.load(Ordering::Acquire);
                assert!(
                    qi.by_seqno > high,
                    "CheckpointManager::queue_dirty: supplied seqno {} not greater than \
                     high seqno {}",
                    qi.by_seqno,
                    high
                );
                self.high_seqno.store(qi.by_seqno, Ordering::Release);
            }
        }

        if generate_cas == GenerateCas::Yes {
            qi.cas = hlc.next_cas();
        }

        let open = inner
            .checkpoints
            .back_mut()
            .expect("CheckpointManager: no open checkpoint");
        debug_assert_eq!(open.state, CheckpointState::Open);
        let notify_flusher = open.items.is_empty();
        self.stats
            .checkpoint_memory
            .fetch_add(qi.mem_size(), Ordering::AcqRel);
        let result = QueueDirtyResult {
            by_seqno: qi.by_seqno,
            cas: qi.cas,
            notify_flusher,
        };
        open.items.push(qi);
        result
    }

    /// Close the open checkpoint and start a new one. Returns the new open
    /// checkpoint id.
    pub fn create_new_checkpoint(&self) -> u64 {
        let mut inner = self.inner.lock();
        self.create_new_checkpoint_locked(&mut inner)
    }

    fn create_new_checkpoint_locked(&self, inner: &mut Inner) -> u64 {
        let open = inner
            .checkpoints
            .back_mut()
            .expect("CheckpointManager: no open checkpoint");
        open.state = CheckpointState::Closed;
        let id = open.id + 1;
        inner.checkpoints.push_back(Checkpoint {
            id,
            state: CheckpointState::Open,
            items: Vec::new(),
            num_cursors: 0,
        });
        id
    }

    pub fn get_open_checkpoint_id(&self) -> u64 {
        let inner = self.inner.lock();
        inner.checkpoints.back().map_or(0, |c| c.id)
    }

    /// Force the open checkpoint id forward (promotion to active bumps the
    /// id so replicas re-snapshot).
    pub fn set_open_checkpoint_id(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(open) = inner.checkpoints.back_mut() {
            open.id = id;
        }
    }

    /// Reclaim closed checkpoints with no registered cursors. Returns the
    /// number of queued items released and whether a new open checkpoint was
    /// created because the current one had grown past the item cap.
    pub fn remove_closed_unref_checkpoints(&self) -> (usize, bool) {
        let mut inner = self.inner.lock();
        let mut new_checkpoint = false;

        if inner
            .checkpoints
            .back()
            .is_some_and(|c| c.items.len() >= self.max_items)
        {
            self.create_new_checkpoint_locked(&mut inner);
            new_checkpoint = true;
        }

        let mut removed = 0;
        while inner.checkpoints.len() > 1 {
            let front = inner.checkpoints.front().unwrap();
            if front.state != CheckpointState::Closed || front.num_cursors > 0 {
                break;
            }
            let front = inner.checkpoints.pop_front().unwrap();
            removed += front.items.len();
            let freed: usize = front.items.iter().map(|i| i.mem_size()).sum();
            self.stats
                .checkpoint_memory
                .fetch_sub(freed, Ordering::AcqRel);
        }
        if removed > 0 {
            self.stats
                .items_removed_from_checkpoints
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        (removed, new_checkpoint)
    }

    /// Pin the current open checkpoint (e.g. a replication cursor).
    pub fn register_cursor(&self) -> u64 {
        let mut inner = self.inner.lock();
        let ckpt_id = inner.checkpoints.back().map_or(0, |c| c.id);
        if let Some(c) = inner.checkpoints.back_mut() {
            c.num_cursors += 1;
        }
        inner.next_cursor += 1;
        let cursor = inner.next_cursor;
        inner.cursors.insert(cursor, ckpt_id);
        cursor
    }

    pub fn deregister_cursor(&self, cursor: u64) {
        let mut inner = self.inner.lock();
        if let Some(ckpt_id) = inner.cursors.remove(&cursor) {
            if let Some(c) = inner.checkpoints.iter_mut().find(|c| c.id == ckpt_id) {
                c.num_cursors = c.num_cursors.saturating_sub(1);
            }
        }
    }

    pub fn high_seqno(&self) -> i64 {
        self.high_seqno.load(Ordering::Acquire)
    }

    pub fn num_checkpoints(&self) -> usize {
        self.inner.lock().checkpoints.len()
    }

    pub fn num_open_checkpoint_items(&self) -> usize {
        let inner = self.inner.lock();
        inner.checkpoints.back().map_or(0, |c| c.items.len())
    }

    /// Snapshot of every queued item still held, oldest first. Test and
    /// stat-surface helper.
    pub fn queued_items(&self) -> Vec<QueuedItem> {
        let inner = self.inner.lock();
        inner
            .checkpoints
            .iter()
            .flat_map(|c| c.items.iter().cloned())
            .collect()
    }

    /// Drop all checkpoints at or above `seqno` after a rollback and reopen
    /// a fresh checkpoint.
    pub fn clear(&self, seqno: i64) {
        let mut inner = self.inner.lock();
        let mut freed = 0;
        for c in inner.checkpoints.iter() {
            freed += c.items.iter().map(|i| i.mem_size()).sum::<usize>();
        }
        inner.checkpoints.clear();
        inner.checkpoints.push_back(Checkpoint {
            id: 1,
            state: CheckpointState::Open,
            items: Vec::new(),
            num_cursors: 0,
        });
        self.stats
            .checkpoint_memory
            .fetch_sub(freed, Ordering::AcqRel);
        self.high_seqno.store(seqno, Ordering::Release);
    }
}
