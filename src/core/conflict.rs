use crate::core::item::ItemMeta;
use crate::core::stored_value::StoredValue;

/// Which conflict-resolution policy a bucket runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolutionMode {
    #[default]
    RevisionSeqno,
    LastWriteWins,
}

/// Resolves a conflict between the local stored value and remote metadata
/// arriving on a `*withMeta` path. Returns true when the remote document
/// wins and may overwrite the local one.
pub trait ConflictResolver: Send + Sync {
    fn resolve(
        &self,
        local: &StoredValue,
        remote: &ItemMeta,
        remote_datatype: u8,
        is_delete: bool,
    ) -> bool;
}

/// Winner is the higher revision; ties break on CAS, then expiry and flags.
pub struct RevisionSeqnoResolution;

impl ConflictResolver for RevisionSeqnoResolution {
    fn resolve(
        &self,
        local: &StoredValue,
        remote: &ItemMeta,
        _remote_datatype: u8,
        is_delete: bool,
    ) -> bool {
        if local.is_temp_non_existent_item() {
            // Nothing on disk either; the remote always wins.
            return true;
        }
        if remote.rev_seqno != local.rev_seqno() {
            return remote.rev_seqno > local.rev_seqno();
        }
        if remote.cas != local.cas() {
            return remote.cas > local.cas();
        }
        if is_delete {
            // A delete with identical metadata brings nothing new.
            return false;
        }
        if remote.exptime != local.exptime() {
            return remote.exptime > local.exptime();
        }
        remote.flags != local.flags() && remote.flags > local.flags()
    }
}

/// Winner is the higher CAS (HLC timestamp); ties fall back to revision.
pub struct LastWriteWinsResolution;

impl ConflictResolver for LastWriteWinsResolution {
    fn resolve(
        &self,
        local: &StoredValue,
        remote: &ItemMeta,
        _remote_datatype: u8,
        is_delete: bool,
    ) -> bool {
        if local.is_temp_non_existent_item() {
            return true;
        }
        if remote.cas != local.cas() {
            return remote.cas > local.cas();
        }
        if remote.rev_seqno != local.rev_seqno() {
            return remote.rev_seqno > local.rev_seqno();
        }
        if is_delete {
            return false;
        }
        if remote.exptime != local.exptime() {
            return remote.exptime > local.exptime();
        }
        remote.flags != local.flags() && remote.flags > local.flags()
    }
}

pub fn make_resolver(mode: ConflictResolutionMode) -> Box<dyn ConflictResolver> {
    match mode {
        ConflictResolutionMode::RevisionSeqno => Box::new(RevisionSeqnoResolution),
        ConflictResolutionMode::LastWriteWins => Box::new(LastWriteWinsResolution),
    }
}
