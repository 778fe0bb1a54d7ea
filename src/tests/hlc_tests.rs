use crate::core::failover::FailoverTable;
use crate::core::hlc::Hlc;

#[test]
fn test_cas_is_strictly_increasing() {
    let hlc = Hlc::new(0, 0, u64::MAX, u64::MAX);
    let mut last = 0;
    for _ in 0..1000 {
        let cas = hlc.next_cas();
        assert!(cas > last);
        last = cas;
    }
}

#[test]
fn test_cas_advances_past_remote_max() {
    let hlc = Hlc::new(0, 0, u64::MAX, u64::MAX);
    // A remote CAS far in the future.
    let remote = u64::MAX - (1 << 20);
    hlc.set_max_cas(remote);
    assert_eq!(hlc.max_cas(), remote);

    // Issuance continues monotonically from the remote value by ticking
    // the logical counter.
    let next = hlc.next_cas();
    assert!(next > remote);
    assert!(hlc.logical_clock_ticks() > 0);
}

#[test]
fn test_set_max_cas_never_regresses() {
    let hlc = Hlc::new(5000, 0, u64::MAX, u64::MAX);
    hlc.set_max_cas(100);
    assert_eq!(hlc.max_cas(), 5000);
}

#[test]
fn test_drift_counters() {
    // Thresholds of one second either way.
    let hlc = Hlc::new(0, 0, 1_000_000, 1_000_000);

    // A remote CAS one hour ahead of the local wall clock.
    let ahead = (crate::utils::time::epoch_nanos() + 3_600_000_000_000) & !0xffff;
    hlc.set_max_cas_and_track_drift(ahead);
    assert_eq!(hlc.drift_ahead_exceeded(), 1);

    // A remote CAS one hour behind.
    let behind = (crate::utils::time::epoch_nanos() - 3_600_000_000_000) & !0xffff;
    hlc.set_max_cas_and_track_drift(behind);
    assert_eq!(hlc.drift_behind_exceeded(), 1);

    hlc.reset_stats();
    assert_eq!(hlc.drift_ahead_exceeded(), 0);
}

#[test]
fn test_epoch_seqno_is_preserved() {
    let hlc = Hlc::new(0, 42, u64::MAX, u64::MAX);
    assert_eq!(hlc.epoch_seqno(), 42);
}

// ============ failover table ============

#[test]
fn test_failover_table_new_has_one_entry() {
    let t = FailoverTable::new(25);
    assert_eq!(t.len(), 1);
    assert!(t.latest_uuid() != 0);
}

#[test]
fn test_failover_entry_creation_changes_uuid() {
    let t = FailoverTable::new(25);
    let first = t.latest_uuid();
    t.create_entry(100);
    assert_ne!(t.latest_uuid(), first);
    assert_eq!(t.len(), 2);
}

#[test]
fn test_failover_json_round_trip() {
    let t = FailoverTable::new(25);
    t.create_entry(100);
    t.create_entry(250);

    let json = t.to_json();
    let reloaded = FailoverTable::from_json(&json, 25).unwrap();
    assert_eq!(reloaded.len(), t.len());
    assert_eq!(reloaded.latest_uuid(), t.latest_uuid());
    assert_eq!(reloaded.to_json(), json);
}

#[test]
fn test_failover_prune_entries() {
    let t = FailoverTable::new(25);
    t.create_entry(100);
    t.create_entry(250);
    assert_eq!(t.len(), 3);

    // Rollback to seqno 150: the 250 branch is gone.
    t.prune_entries(150);
    assert_eq!(t.len(), 2);
}
