use bytes::Bytes;

use crate::constants::*;

/// Identifier of a logical collection within a vbucket's keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(pub u32);

impl CollectionId {
    pub const DEFAULT: CollectionId = CollectionId(0);

    #[inline]
    pub fn is_default(self) -> bool {
        self.0 == 0
    }
}

/// A document key: raw key bytes qualified by the owning collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    pub collection: CollectionId,
    pub key: Vec<u8>,
}

impl DocKey {
    pub fn new(collection: CollectionId, key: impl Into<Vec<u8>>) -> Self {
        Self {
            collection,
            key: key.into(),
        }
    }

    /// Key in the default collection.
    pub fn plain(key: impl Into<Vec<u8>>) -> Self {
        Self::new(CollectionId::DEFAULT, key)
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        crate::utils::hash::hash_doc_key(self.collection.0, &self.key)
    }

    pub fn size(&self) -> usize {
        self.key.len() + std::mem::size_of::<CollectionId>()
    }
}

/// Metadata carried alongside a document: the fields replicated and
/// persisted with every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemMeta {
    pub cas: u64,
    pub rev_seqno: u64,
    pub flags: u32,
    pub exptime: u32,
}

/// Durability level of a synchronous write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityLevel {
    Majority,
    MajorityAndPersistOnMaster,
    PersistToMajority,
}

/// Durability requirements attached to a sync write. `timeout_ms == 0`
/// means the write never times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurabilityRequirements {
    pub level: DurabilityLevel,
    pub timeout_ms: u64,
}

impl DurabilityRequirements {
    pub fn majority() -> Self {
        Self {
            level: DurabilityLevel::Majority,
            timeout_ms: 0,
        }
    }
}

/// A complete document in transit through the mutation paths: key, value,
/// metadata and engine-assigned sequencing.
#[derive(Debug, Clone)]
pub struct Item {
    pub key: DocKey,
    pub value: Option<Bytes>,
    pub meta: ItemMeta,
    pub by_seqno: i64,
    pub datatype: u8,
    pub deleted: bool,
    pub nru: u8,
}

impl Item {
    pub fn new(key: DocKey, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: Some(value.into()),
            meta: ItemMeta::default(),
            by_seqno: 0,
            datatype: DATATYPE_RAW,
            deleted: false,
            nru: INITIAL_NRU_VALUE,
        }
    }

    pub fn with_meta(key: DocKey, value: impl Into<Bytes>, meta: ItemMeta, datatype: u8) -> Self {
        Self {
            key,
            value: Some(value.into()),
            meta,
            by_seqno: 0,
            datatype,
            deleted: false,
            nru: INITIAL_NRU_VALUE,
        }
    }

    /// Placeholder item backing a temp-initial stored value while a
    /// background fetch is outstanding. Carries no value and the temp-init
    /// sentinel seqno.
    pub fn new_temp_init(key: DocKey) -> Self {
        Self {
            key,
            value: None,
            meta: ItemMeta::default(),
            by_seqno: super::stored_value::STATE_TEMP_INIT,
            datatype: DATATYPE_RAW,
            deleted: false,
            nru: MAX_NRU_VALUE,
        }
    }

    pub fn exptime(mut self, exptime: u32) -> Self {
        self.meta.exptime = exptime;
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.meta.cas = cas;
        self
    }

    pub fn datatype(mut self, datatype: u8) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    #[inline]
    pub fn is_expired(&self, now: u32) -> bool {
        self.meta.exptime != 0 && self.meta.exptime < now
    }

    #[inline]
    pub fn is_temp_initial(&self) -> bool {
        self.by_seqno == super::stored_value::STATE_TEMP_INIT
    }

    #[inline]
    pub fn is_temp_deleted(&self) -> bool {
        self.by_seqno == super::stored_value::STATE_DELETED_KEY
    }

    #[inline]
    pub fn is_temp_non_existent(&self) -> bool {
        self.by_seqno == super::stored_value::STATE_NON_EXISTENT_KEY
    }

    #[inline]
    pub fn is_temp(&self) -> bool {
        self.is_temp_initial() || self.is_temp_deleted() || self.is_temp_non_existent()
    }

    pub fn value_len(&self) -> usize {
        self.value.as_ref().map_or(0, |v| v.len())
    }

    /// Memory a stored value created from this item will account for.
    pub fn size(&self) -> usize {
        std::mem::size_of::<super::stored_value::StoredValue>() + self.key.size() + self.value_len()
    }
}
