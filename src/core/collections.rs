use std::collections::{BTreeSet, HashMap};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::item::{CollectionId, DocKey};
use crate::core::stored_value::STATE_COLLECTION_OPEN;
use crate::error::{EmberError, Result};

/// Kind of collection system event appended to the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventKind {
    /// Collection begin / end (create and begin-delete share the event; the
    /// deleted flag distinguishes them).
    Collection,
    /// The collection's data is fully purged; the entry is gone.
    DeleteCollectionHard,
}

/// Callback handed into manifest operations to append a system event to the
/// vbucket's checkpoint. Returns the seqno the event was assigned.
pub type QueueSystemEvent<'a> =
    dyn FnMut(SystemEventKind, CollectionId, bool, Bytes) -> i64 + 'a;

/// The bucket-level collections declaration pushed down by the cluster
/// manager: a uid and the set of collections that should exist.
#[derive(Debug, Clone, Default)]
pub struct CollectionsManifest {
    pub uid: u64,
    pub collections: BTreeSet<CollectionId>,
}

impl CollectionsManifest {
    pub fn new(uid: u64) -> Self {
        Self {
            uid,
            collections: BTreeSet::new(),
        }
    }

    pub fn with(mut self, cid: CollectionId) -> Self {
        self.collections.insert(cid);
        self
    }

    pub fn without(mut self, cid: CollectionId) -> Self {
        self.collections.remove(&cid);
        self
    }
}

/// Lifetime bounds of one collection within a vbucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestEntry {
    pub start_seqno: i64,
    pub end_seqno: i64,
}

impl ManifestEntry {
    pub fn is_open(&self) -> bool {
        self.end_seqno == STATE_COLLECTION_OPEN
    }

    pub fn is_deleting(&self) -> bool {
        !self.is_open()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct CollectionJson {
    uid: u32,
    #[serde(rename = "startSeqno")]
    start_seqno: i64,
    #[serde(rename = "endSeqno")]
    end_seqno: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestJson {
    uid: u64,
    collections: Vec<CollectionJson>,
}

/// Per-vbucket view of the collections manifest.
///
/// Tracks which collections are open or deleting, drives the system-event
/// stream for manifest changes, and answers the logical-deletion gate
/// consulted when items from dropped collections are replayed.
#[derive(Debug)]
pub struct Manifest {
    uid: u64,
    map: HashMap<CollectionId, ManifestEntry>,
    default_collection_exists: bool,
    greatest_end_seqno: i64,
    n_deleting: usize,
}

impl Manifest {
    /// Build from the persisted JSON blob; an empty blob initialises the
    /// manifest with the default collection open.
    pub fn new(persisted: Option<&str>) -> Result<Self> {
        let mut m = Self {
            uid: 0,
            map: HashMap::new(),
            default_collection_exists: false,
            greatest_end_seqno: STATE_COLLECTION_OPEN,
            n_deleting: 0,
        };
        match persisted {
            None | Some("") => {
                m.map.insert(
                    CollectionId::DEFAULT,
                    ManifestEntry {
                        start_seqno: 0,
                        end_seqno: STATE_COLLECTION_OPEN,
                    },
                );
                m.default_collection_exists = true;
            }
            Some(json) => {
                let parsed: ManifestJson = serde_json::from_str(json)?;
                m.uid = parsed.uid;
                for c in parsed.collections {
                    let cid = CollectionId(c.uid);
                    let entry = ManifestEntry {
                        start_seqno: c.start_seqno,
                        end_seqno: c.end_seqno,
                    };
                    if m.map.insert(cid, entry).is_some() {
                        return Err(EmberError::ManifestUpdate(format!(
                            "duplicate collection {} in persisted manifest",
                            c.uid
                        )));
                    }
                    if entry.is_deleting() {
                        m.track_end_seqno(entry.end_seqno);
                    }
                    if cid.is_default() {
                        m.default_collection_exists = entry.is_open();
                    }
                }
            }
        }
        Ok(m)
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn n_deleting(&self) -> usize {
        self.n_deleting
    }

    pub fn greatest_end_seqno(&self) -> i64 {
        self.greatest_end_seqno
    }

    pub fn default_collection_exists(&self) -> bool {
        self.default_collection_exists
    }

    pub fn entry(&self, cid: CollectionId) -> Option<&ManifestEntry> {
        self.map.get(&cid)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Apply a new bucket-level declaration.
    ///
    /// Deletions are applied before additions, one system event each; every
    /// event carries the pre-update uid except the very last, which carries
    /// the new one. An addition that targets a collection still being
    /// deleted refuses the whole update.
    pub fn update(
        &mut self,
        declared: &CollectionsManifest,
        queue: &mut QueueSystemEvent<'_>,
    ) -> bool {
        if declared.uid < self.uid {
            warn!(
                declared_uid = declared.uid,
                current_uid = self.uid,
                "collections: refusing manifest update with stale uid"
            );
            return false;
        }

        let mut additions = Vec::new();
        for cid in &declared.collections {
            match self.map.get(cid) {
                None => additions.push(*cid),
                Some(e) if e.is_deleting() => {
                    warn!(
                        cid = cid.0,
                        "collections: attempt to add a deleting collection"
                    );
                    return false;
                }
                Some(_) => {}
            }
        }
        let mut deletions: Vec<CollectionId> = self
            .map
            .iter()
            .filter(|(cid, e)| e.is_open() && !declared.collections.contains(*cid))
            .map(|(cid, _)| *cid)
            .collect();
        deletions.sort();

        let old_uid = self.uid;
        let final_deletion = deletions.pop();
        for cid in deletions {
            self.begin_collection_delete(old_uid, cid, queue);
        }
        if let Some(cid) = final_deletion {
            let uid = if additions.is_empty() {
                declared.uid
            } else {
                old_uid
            };
            self.begin_collection_delete(uid, cid, queue);
        }

        let final_addition = additions.pop();
        for cid in additions {
            self.add_collection(old_uid, cid, queue);
        }
        if let Some(cid) = final_addition {
            self.add_collection(declared.uid, cid, queue);
        }
        true
    }

    /// Open a collection: entry first, then the system event, then patch the
    /// entry with the seqno the event was assigned.
    pub fn add_collection(
        &mut self,
        manifest_uid: u64,
        cid: CollectionId,
        queue: &mut QueueSystemEvent<'_>,
    ) {
        assert!(
            !self.map.contains_key(&cid),
            "Manifest::add_collection: collection {} already exists",
            cid.0
        );
        self.map.insert(
            cid,
            ManifestEntry {
                start_seqno: 0,
                end_seqno: STATE_COLLECTION_OPEN,
            },
        );
        if cid.is_default() {
            self.default_collection_exists = true;
        }
        self.uid = manifest_uid;

        let payload = self.build_event_payload(cid);
        let seqno = queue(SystemEventKind::Collection, cid, false, payload);
        info!(
            cid = cid.0,
            seqno,
            manifest = manifest_uid,
            "collections: adding collection"
        );
        self.map.get_mut(&cid).unwrap().start_seqno = seqno;
    }

    /// Begin deleting a collection: the end event is queued and the entry
    /// marked deleting at the event's seqno.
    pub fn begin_collection_delete(
        &mut self,
        manifest_uid: u64,
        cid: CollectionId,
        queue: &mut QueueSystemEvent<'_>,
    ) {
        assert!(
            self.map.contains_key(&cid),
            "Manifest::begin_collection_delete: unknown collection {}",
            cid.0
        );
        self.uid = manifest_uid;

        let payload = self.build_event_payload(cid);
        let seqno = queue(SystemEventKind::Collection, cid, true, payload);
        info!(
            cid = cid.0,
            seqno,
            manifest = manifest_uid,
            "collections: begin delete of collection"
        );
        if cid.is_default() {
            self.default_collection_exists = false;
        }
        self.map.get_mut(&cid).unwrap().end_seqno = seqno;
        self.track_end_seqno(seqno);
    }

    /// The flusher has persisted the end event and purged the data: drop the
    /// entry and emit the hard-delete marker.
    pub fn complete_deletion(&mut self, cid: CollectionId, queue: &mut QueueSystemEvent<'_>) {
        let entry = self
            .map
            .remove(&cid)
            .unwrap_or_else(|| panic!("Manifest::complete_deletion: unknown collection {}", cid.0));
        assert!(
            entry.is_deleting(),
            "Manifest::complete_deletion: collection {} is not deleting",
            cid.0
        );
        info!(cid = cid.0, "collections: complete delete of collection");

        self.n_deleting -= 1;
        if self.n_deleting == 0 {
            self.greatest_end_seqno = STATE_COLLECTION_OPEN;
        }
        let payload = self.build_event_payload(cid);
        queue(SystemEventKind::DeleteCollectionHard, cid, false, payload);
    }

    fn track_end_seqno(&mut self, seqno: i64) {
        self.n_deleting += 1;
        if seqno > self.greatest_end_seqno || self.greatest_end_seqno == STATE_COLLECTION_OPEN {
            self.greatest_end_seqno = seqno;
        }
    }

    /// Can a front-end operation on `key` proceed? Only keys of open
    /// collections are writable.
    pub fn does_key_contain_valid_collection(&self, key: &DocKey) -> bool {
        if self.default_collection_exists && key.collection.is_default() {
            return true;
        }
        self.map
            .get(&key.collection)
            .is_some_and(|e| e.is_open())
    }

    /// The hot-path gate consulted when replaying history: is the document
    /// at `seqno` part of a dropped collection?
    ///
    /// Keys of a collection still in the deleting state are dead at any
    /// seqno (additions of deleting collections are refused, so no newer
    /// incarnation can exist until the hard delete completes).
    pub fn is_logically_deleted(&self, key: &DocKey, seqno: i64) -> bool {
        if seqno <= self.greatest_end_seqno {
            if key.collection.is_default() {
                return !self.default_collection_exists;
            }
            return match self.map.get(&key.collection) {
                Some(e) => seqno <= e.end_seqno,
                None => false,
            };
        }
        self.map
            .get(&key.collection)
            .is_some_and(|e| e.is_deleting())
    }

    // --- serialization ---

    /// Compact JSON persisted with the vbucket state.
    pub fn to_json(&self) -> String {
        let mut collections: Vec<CollectionJson> = self
            .map
            .iter()
            .map(|(cid, e)| CollectionJson {
                uid: cid.0,
                start_seqno: e.start_seqno,
                end_seqno: e.end_seqno,
            })
            .collect();
        collections.sort_by_key(|c| c.uid);
        serde_json::to_string(&ManifestJson {
            uid: self.uid,
            collections,
        })
        .expect("Manifest::to_json: serialization cannot fail")
    }

    /// Binary payload attached to a system event: manifest uid, entry count,
    /// then length-prefixed entries with the just-changed collection last.
    fn build_event_payload(&self, changed: CollectionId) -> Bytes {
        let mut trailing = None;
        let mut rest: Vec<(&CollectionId, &ManifestEntry)> = Vec::new();
        for (cid, e) in &self.map {
            if *cid == changed {
                trailing = Some((cid, e));
            } else {
                rest.push((cid, e));
            }
        }
        rest.sort_by_key(|(cid, _)| cid.0);
        let mut buf = BytesMut::new();
        buf.put_u64(self.uid);
        buf.put_u32(rest.len() as u32 + 1);
        for (cid, e) in rest {
            put_entry(&mut buf, *cid, e);
        }
        match trailing {
            Some((cid, e)) => put_entry(&mut buf, *cid, e),
            // The changed collection has already been removed from the map
            // (hard delete); emit a bare entry for it.
            None => put_entry(
                &mut buf,
                changed,
                &ManifestEntry {
                    start_seqno: 0,
                    end_seqno: 0,
                },
            ),
        }
        buf.freeze()
    }
}

fn put_entry(buf: &mut BytesMut, cid: CollectionId, e: &ManifestEntry) {
    buf.put_u32(cid.0);
    buf.put_i64(e.start_seqno);
    buf.put_i64(e.end_seqno);
}

/// Decode the (manifest uid, changed collection) pair from a system event
/// payload; the changed collection is the trailing entry.
pub fn system_event_data(payload: &[u8]) -> Result<(u64, CollectionId)> {
    const ENTRY: usize = 4 + 8 + 8;
    if payload.len() < 8 + 4 + ENTRY {
        return Err(EmberError::Serialization(
            "system event payload too short".into(),
        ));
    }
    let uid = u64::from_be_bytes(payload[0..8].try_into().unwrap());
    let tail = &payload[payload.len() - ENTRY..];
    let cid = u32::from_be_bytes(tail[0..4].try_into().unwrap());
    Ok((uid, CollectionId(cid)))
}
