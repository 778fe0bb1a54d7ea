use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as seconds since the epoch. Expiry times and lock
/// expiries are expressed in this unit.
#[inline]
pub fn epoch_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Wall-clock time in microseconds, fed to the HLC.
#[inline]
pub fn epoch_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Wall-clock time in nanoseconds; the HLC's physical component.
#[inline]
pub fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
