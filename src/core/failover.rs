use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One failover log entry: the vbucket UUID that was active from `seqno`
/// onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEntry {
    pub id: u64,
    pub seq: u64,
}

/// Per-vbucket failover log, newest entry first.
///
/// The latest UUID stamps mutation results so clients can detect history
/// branches; the JSON form is embedded in the persisted vbucket state
/// record.
#[derive(Debug)]
pub struct FailoverTable {
    entries: RwLock<Vec<FailoverEntry>>,
    max_entries: usize,
}

impl FailoverTable {
    /// Fresh table with a newly generated UUID at seqno 0.
    pub fn new(max_entries: usize) -> Self {
        let uuid = rand::rng().random::<u64>() >> 16;
        Self {
            entries: RwLock::new(vec![FailoverEntry { id: uuid, seq: 0 }]),
            max_entries,
        }
    }

    pub fn from_json(json: &str, max_entries: usize) -> Result<Self> {
        let entries: Vec<FailoverEntry> = serde_json::from_str(json)?;
        Ok(Self {
            entries: RwLock::new(entries),
            max_entries,
        })
    }

    pub fn latest_uuid(&self) -> u64 {
        self.entries.read().first().map_or(0, |e| e.id)
    }

    /// Record a failover at `high_seqno`: a new UUID heads the table.
    pub fn create_entry(&self, high_seqno: u64) {
        let mut entries = self.entries.write();
        // Entries at or above the new branch point are no longer valid
        // history.
        entries.retain(|e| e.seq < high_seqno || e.seq == 0);
        let uuid = rand::rng().random::<u64>() >> 16;
        entries.insert(
            0,
            FailoverEntry {
                id: uuid,
                seq: high_seqno,
            },
        );
        entries.truncate(self.max_entries);
    }

    /// Drop entries beyond `seqno` after a rollback.
    pub fn prune_entries(&self, seqno: u64) {
        self.entries.write().retain(|e| e.seq <= seqno);
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&*self.entries.read()).unwrap_or_else(|_| "[]".into())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
