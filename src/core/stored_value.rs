use bytes::Bytes;

use crate::constants::*;
use crate::core::item::{DocKey, Item, ItemMeta};

// Sentinel by-seqno values. Negative seqnos tag slots that are not (yet)
// part of the visible mutation sequence.
pub const STATE_PENDING: i64 = -2;
pub const STATE_DELETED_KEY: i64 = -3;
pub const STATE_NON_EXISTENT_KEY: i64 = -4;
pub const STATE_TEMP_INIT: i64 = -5;
pub const STATE_COLLECTION_OPEN: i64 = -6;

// State bits
const BIT_DIRTY: u8 = 0x01;
const BIT_DELETED: u8 = 0x02;
const BIT_NEW_CACHE_ITEM: u8 = 0x04;
const BIT_ORDERED: u8 = 0x08;
const BIT_RESIDENT: u8 = 0x10;
const BIT_STALE: u8 = 0x20;

/// One hash-table slot entry.
///
/// All fields are read and written only while the covering hash-bucket
/// stripe lock is held; the lock is witnessed by the `HashBucketLock`
/// guard every accessor path requires.
#[derive(Debug)]
pub struct StoredValue {
    key: DocKey,
    value: Option<Bytes>,
    cas: u64,
    rev_seqno: u64,
    by_seqno: i64,
    /// Lock expiry while alive, deletion time while deleted. Tagged by the
    /// deleted bit.
    lock_expiry_or_delete_time: u32,
    exptime: u32,
    flags: u32,
    datatype: u8,
    bits: u8,
    nru: u8,
    freq_counter: u8,
}

impl StoredValue {
    pub fn new(itm: &Item) -> Self {
        let mut v = Self {
            key: itm.key.clone(),
            value: None,
            cas: itm.meta.cas,
            rev_seqno: itm.meta.rev_seqno,
            by_seqno: itm.by_seqno,
            lock_expiry_or_delete_time: 0,
            exptime: itm.meta.exptime,
            flags: itm.meta.flags,
            datatype: itm.datatype,
            bits: 0,
            nru: itm.nru,
            freq_counter: INITIAL_FREQ_COUNT,
        };
        v.set_bit(BIT_DELETED, itm.deleted);
        v.set_bit(BIT_NEW_CACHE_ITEM, true);
        v.set_bit(BIT_RESIDENT, !v.is_temp_item());
        if v.is_temp_initial_item() {
            v.mark_clean();
        } else {
            v.mark_dirty();
        }
        if !v.is_temp_item() {
            v.value = itm.value.clone();
        }
        v
    }

    #[inline]
    fn set_bit(&mut self, bit: u8, on: bool) {
        if on {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }

    #[inline]
    fn bit(&self, bit: u8) -> bool {
        self.bits & bit != 0
    }

    // --- accessors ---

    pub fn key(&self) -> &DocKey {
        &self.key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn set_cas(&mut self, cas: u64) {
        self.cas = cas;
    }

    pub fn rev_seqno(&self) -> u64 {
        self.rev_seqno
    }

    pub fn set_rev_seqno(&mut self, rev: u64) {
        self.rev_seqno = rev;
    }

    pub fn by_seqno(&self) -> i64 {
        self.by_seqno
    }

    pub fn set_by_seqno(&mut self, seqno: i64) {
        self.by_seqno = seqno;
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn exptime(&self) -> u32 {
        self.exptime
    }

    pub fn set_exptime(&mut self, exptime: u32) {
        self.exptime = exptime;
    }

    pub fn datatype(&self) -> u8 {
        self.datatype
    }

    pub fn set_datatype(&mut self, datatype: u8) {
        self.datatype = datatype;
    }

    pub fn meta(&self) -> ItemMeta {
        ItemMeta {
            cas: self.cas,
            rev_seqno: self.rev_seqno,
            flags: self.flags,
            exptime: self.exptime,
        }
    }

    // --- state bits ---

    pub fn is_dirty(&self) -> bool {
        self.bit(BIT_DIRTY)
    }

    pub fn mark_dirty(&mut self) {
        self.set_bit(BIT_DIRTY, true);
    }

    pub fn mark_clean(&mut self) {
        self.set_bit(BIT_DIRTY, false);
    }

    pub fn is_deleted(&self) -> bool {
        self.bit(BIT_DELETED)
    }

    pub fn is_new_cache_item(&self) -> bool {
        self.bit(BIT_NEW_CACHE_ITEM)
    }

    pub fn set_new_cache_item(&mut self, on: bool) {
        self.set_bit(BIT_NEW_CACHE_ITEM, on);
    }

    pub fn is_ordered(&self) -> bool {
        self.bit(BIT_ORDERED)
    }

    pub fn is_resident(&self) -> bool {
        self.bit(BIT_RESIDENT)
    }

    pub fn is_stale(&self) -> bool {
        self.bit(BIT_STALE)
    }

    pub fn mark_stale(&mut self) {
        self.set_bit(BIT_STALE, true);
    }

    // --- temp states, encoded in the by-seqno sentinel ---

    pub fn is_temp_item(&self) -> bool {
        self.is_temp_initial_item()
            || self.is_temp_deleted_item()
            || self.is_temp_non_existent_item()
    }

    pub fn is_temp_initial_item(&self) -> bool {
        self.by_seqno == STATE_TEMP_INIT
    }

    pub fn is_temp_deleted_item(&self) -> bool {
        self.by_seqno == STATE_DELETED_KEY
    }

    pub fn is_temp_non_existent_item(&self) -> bool {
        self.by_seqno == STATE_NON_EXISTENT_KEY
    }

    pub fn set_temp_deleted(&mut self) {
        self.by_seqno = STATE_DELETED_KEY;
    }

    pub fn set_temp_non_existent(&mut self) {
        self.by_seqno = STATE_NON_EXISTENT_KEY;
    }

    pub fn set_pending_seqno(&mut self) {
        self.by_seqno = STATE_PENDING;
    }

    pub fn set_deleted(&mut self) {
        self.set_bit(BIT_DELETED, true);
    }

    // --- expiry and locking ---

    pub fn is_expired(&self, now: u32) -> bool {
        self.exptime != 0 && self.exptime < now
    }

    pub fn is_locked(&self, now: u32) -> bool {
        if self.is_deleted() {
            // The shared field holds the deletion time.
            return false;
        }
        if self.lock_expiry_or_delete_time == 0 {
            return false;
        }
        now < self.lock_expiry_or_delete_time
    }

    pub fn lock(&mut self, expiry: u32) {
        debug_assert!(!self.is_deleted());
        self.lock_expiry_or_delete_time = expiry;
    }

    pub fn unlock(&mut self) {
        if !self.is_deleted() {
            self.lock_expiry_or_delete_time = 0;
        }
    }

    pub fn deleted_time(&self) -> Option<u32> {
        self.is_deleted().then_some(self.lock_expiry_or_delete_time)
    }

    // --- NRU and frequency counter ---

    pub fn nru(&self) -> u8 {
        self.nru
    }

    pub fn set_nru(&mut self, nru: u8) {
        if nru <= MAX_NRU_VALUE {
            self.nru = nru;
        }
    }

    /// Record a reference: NRU decays towards hot.
    pub fn referenced(&mut self) {
        if self.nru > MIN_NRU_VALUE {
            self.nru -= 1;
        }
    }

    /// Age the value one NRU step, returning the new value. Saturates at
    /// the coldest state.
    pub fn incr_nru(&mut self) -> u8 {
        if self.nru < MAX_NRU_VALUE {
            self.nru += 1;
        }
        self.nru
    }

    pub fn freq_counter(&self) -> u8 {
        self.freq_counter
    }

    pub fn set_freq_counter(&mut self, freq: u8) {
        self.freq_counter = freq;
    }

    // --- value lifecycle ---

    /// Overwrite this slot from `itm`, the update path of the mutation
    /// state machine.
    pub fn set_value(&mut self, itm: &Item) {
        if self.is_deleted() && !itm.deleted {
            // deleted -> alive increases the number of live items.
            self.set_bit(BIT_NEW_CACHE_ITEM, true);
        }
        self.set_bit(BIT_DELETED, itm.deleted);
        self.flags = itm.meta.flags;
        self.datatype = itm.datatype;
        self.by_seqno = itm.by_seqno;
        self.cas = itm.meta.cas;
        self.lock_expiry_or_delete_time = 0;
        self.exptime = itm.meta.exptime;
        self.rev_seqno = itm.meta.rev_seqno;

        if self.is_temp_initial_item() {
            self.mark_clean();
        } else {
            self.mark_dirty();
        }

        if self.is_temp_item() {
            self.set_bit(BIT_RESIDENT, false);
            self.value = None;
        } else {
            self.set_bit(BIT_RESIDENT, true);
            self.value = itm.value.clone();
        }
    }

    /// Drop the value, keeping the metadata. The slot becomes non-resident.
    pub fn eject_value(&mut self) -> usize {
        let freed = self.value.as_ref().map_or(0, |v| v.len());
        self.value = None;
        self.set_bit(BIT_RESIDENT, false);
        freed
    }

    /// Background-fetch completion: the full document came back from disk.
    pub fn restore_value(&mut self, itm: &Item) {
        if self.is_temp_initial_item() || self.is_temp_deleted_item() {
            self.cas = itm.meta.cas;
            self.flags = itm.meta.flags;
            self.exptime = itm.meta.exptime;
            self.rev_seqno = itm.meta.rev_seqno;
            self.by_seqno = itm.by_seqno;
            self.nru = INITIAL_NRU_VALUE;
        }
        self.datatype = itm.datatype;
        self.set_bit(BIT_DELETED, itm.deleted);
        self.value = itm.value.clone();
        self.freq_counter = INITIAL_FREQ_COUNT;
        self.set_bit(BIT_RESIDENT, true);
    }

    /// Background-fetch completion: only the metadata came back.
    pub fn restore_meta(&mut self, itm: &Item) {
        self.cas = itm.meta.cas;
        self.flags = itm.meta.flags;
        self.datatype = itm.datatype;
        self.exptime = itm.meta.exptime;
        self.rev_seqno = itm.meta.rev_seqno;
        if itm.deleted {
            self.set_temp_deleted();
        } else {
            self.by_seqno = itm.by_seqno;
            self.set_bit(BIT_NEW_CACHE_ITEM, false);
        }
        if self.nru == MAX_NRU_VALUE {
            self.nru = INITIAL_NRU_VALUE;
        }
        self.freq_counter = INITIAL_FREQ_COUNT;
    }

    /// Soft-delete in place. Returns false if the slot is already a bare
    /// tombstone and nothing further can be deleted.
    pub fn del(&mut self, delete_time: u32) -> bool {
        if self.is_deleted() && self.value.is_none() {
            return false;
        }
        self.value = None;
        self.datatype = DATATYPE_RAW;
        self.set_pending_seqno();
        self.set_bit(BIT_DELETED, true);
        self.lock_expiry_or_delete_time = delete_time;
        self.mark_dirty();
        true
    }

    /// Project this slot back into an `Item`, e.g. for checkpointing or a
    /// read response. A locked value reports the sentinel CAS.
    pub fn to_item(&self, hide_cas: bool) -> Item {
        Item {
            key: self.key.clone(),
            value: self.value.clone(),
            meta: ItemMeta {
                cas: if hide_cas { u64::MAX } else { self.cas },
                rev_seqno: self.rev_seqno,
                flags: self.flags,
                exptime: self.exptime,
            },
            by_seqno: self.by_seqno,
            datatype: self.datatype,
            deleted: self.is_deleted(),
            nru: self.nru,
        }
    }

    /// Key-only projection: metadata without the value.
    pub fn to_item_key_only(&self) -> Item {
        let mut itm = self.to_item(false);
        itm.value = None;
        itm
    }

    /// Memory accounted for this slot.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.key.size()
            + self.value.as_ref().map_or(0, |v| v.len())
    }

    pub fn metadata_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.key.size()
    }
}
