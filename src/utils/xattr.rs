//! Extended-attribute blob handling.
//!
//! A value whose datatype carries the xattr bit is laid out as a 4-byte
//! big-endian total length, followed by that many bytes of entries, followed
//! by the document body. Each entry is a 4-byte big-endian length followed by
//! `key\0value\0`. Keys beginning with `_` are system xattrs and survive
//! soft deletion; all other keys are user xattrs.

use bytes::{BufMut, Bytes, BytesMut};

/// Offset of the document body within an xattr-bearing value.
///
/// Returns 0 for a value too short to carry the length header.
pub fn body_offset(value: &[u8]) -> usize {
    if value.len() < 4 {
        return 0;
    }
    let total = u32::from_be_bytes([value[0], value[1], value[2], value[3]]) as usize;
    let offset = 4 + total;
    if offset > value.len() {
        0
    } else {
        offset
    }
}

/// Iterate the `(key, value)` pairs of the xattr section of `value`.
fn entries(value: &[u8]) -> Vec<(&[u8], &[u8])> {
    let end = body_offset(value);
    let mut out = Vec::new();
    let mut pos = 4;
    while pos + 4 <= end {
        let len =
            u32::from_be_bytes([value[pos], value[pos + 1], value[pos + 2], value[pos + 3]])
                as usize;
        pos += 4;
        if pos + len > end || len == 0 {
            break;
        }
        let entry = &value[pos..pos + len];
        pos += len;
        let Some(key_end) = entry.iter().position(|&b| b == 0) else {
            break;
        };
        let key = &entry[..key_end];
        // value is NUL terminated as well
        let val = &entry[key_end + 1..entry.len().saturating_sub(1)];
        out.push((key, val));
    }
    out
}

#[inline]
fn is_system_key(key: &[u8]) -> bool {
    key.first() == Some(&b'_')
}

/// Strip user xattrs from an xattr-bearing value, dropping the body.
///
/// Returns the pruned blob holding only system xattrs, or `None` when no
/// system xattrs remain (the caller then deletes the value outright).
pub fn prune_user_keys(value: &[u8]) -> Option<Bytes> {
    let system: Vec<(&[u8], &[u8])> = entries(value)
        .into_iter()
        .filter(|(k, _)| is_system_key(k))
        .collect();
    if system.is_empty() {
        return None;
    }
    Some(build_blob(&system))
}

/// Assemble an xattr blob (with no document body) from `(key, value)` pairs.
pub fn build_blob(pairs: &[(&[u8], &[u8])]) -> Bytes {
    let mut section = BytesMut::new();
    for (key, val) in pairs {
        let entry_len = key.len() + 1 + val.len() + 1;
        section.put_u32(entry_len as u32);
        section.put_slice(key);
        section.put_u8(0);
        section.put_slice(val);
        section.put_u8(0);
    }
    let mut blob = BytesMut::with_capacity(4 + section.len());
    blob.put_u32(section.len() as u32);
    blob.extend_from_slice(&section);
    blob.freeze()
}

/// Look up a single xattr key, for tests and stat emission.
pub fn get(value: &[u8], key: &[u8]) -> Option<Vec<u8>> {
    entries(value)
        .into_iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_vec())
}
