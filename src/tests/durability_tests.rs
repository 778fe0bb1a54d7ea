use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::durability::DurabilityMonitor;
use crate::core::item::{DurabilityLevel, DurabilityRequirements};
use crate::stats::Statistics;

const ACTIVE: &str = "active";
const REPLICA: &str = "replica";

fn monitor() -> DurabilityMonitor {
    let m = DurabilityMonitor::new(Arc::new(Statistics::new(usize::MAX)));
    m.set_replication_topology(vec![ACTIVE.into(), REPLICA.into()]);
    m
}

fn majority(timeout_ms: u64) -> DurabilityRequirements {
    DurabilityRequirements {
        level: DurabilityLevel::Majority,
        timeout_ms,
    }
}

fn persist_to_majority() -> DurabilityRequirements {
    DurabilityRequirements {
        level: DurabilityLevel::PersistToMajority,
        timeout_ms: 0,
    }
}

fn add_sync_writes(m: &DurabilityMonitor, seqnos: &[u64], reqs: DurabilityRequirements) {
    for &seqno in seqnos {
        let before = m.num_tracked();
        m.add_sync_write(seqno, reqs);
        assert_eq!(m.num_tracked(), before + 1);
    }
}

// ============ Tracking and acks ============

#[test]
fn test_add_sync_writes() {
    let m = monitor();
    add_sync_writes(&m, &[1, 2, 3], majority(0));
    assert_eq!(m.num_tracked(), 3);

    // The active implicitly acked its own memory position when the write
    // entered the checkpoint.
    assert_eq!(m.node_write_seqnos(ACTIVE).0, 3);
    assert_eq!(m.node_ack_seqnos(ACTIVE).0, 3);
    assert_eq!(m.node_write_seqnos(REPLICA).0, 0);
}

#[test]
fn test_ack_equal_pending_commits_one_at_a_time() {
    let m = monitor();
    add_sync_writes(&m, &[1, 2, 3], majority(0));

    let mut remaining = 3;
    for seqno in 1..=3u64 {
        let committed = m.seqno_ack_received(REPLICA, seqno, 0);
        assert_eq!(committed, vec![seqno]);
        remaining -= 1;
        assert_eq!(m.num_tracked(), remaining);
        // Seqno tracking is not lost after commit and removal.
        assert_eq!(m.node_write_seqnos(REPLICA).0, seqno);
        assert_eq!(m.node_ack_seqnos(REPLICA).0, seqno);
    }
}

#[test]
fn test_ack_in_middle_of_sparse_seqnos() {
    let m = monitor();
    add_sync_writes(&m, &[1, 3, 5], majority(0));

    let committed = m.seqno_ack_received(REPLICA, 4, 0);
    assert_eq!(committed, vec![1, 3]);
    // The write position advanced to the last tracked seqno covered by the
    // ack; the ack position keeps the raw value.
    assert_eq!(m.node_write_seqnos(REPLICA).0, 3);
    assert_eq!(m.node_ack_seqnos(REPLICA).0, 4);
    assert_eq!(m.num_tracked(), 1);
}

#[test]
fn test_ack_beyond_last_tracked_parks_at_end() {
    let m = monitor();
    add_sync_writes(&m, &[1, 3, 5], majority(0));

    let committed = m.seqno_ack_received(REPLICA, 10, 0);
    assert_eq!(committed, vec![1, 3, 5]);
    assert_eq!(m.num_tracked(), 0);
    // Position parked past the tail stays valid and keeps its values.
    assert_eq!(m.node_write_seqnos(REPLICA).0, 5);
    assert_eq!(m.node_ack_seqnos(REPLICA).0, 10);

    // Adding after the park must not trip over stale positions.
    m.add_sync_write(11, majority(0));
    assert_eq!(m.num_tracked(), 1);
}

#[test]
#[should_panic(expected = "Monotonic")]
fn test_ack_must_be_monotonic() {
    let m = monitor();
    add_sync_writes(&m, &[1, 2], majority(0));
    m.seqno_ack_received(REPLICA, 1, 0);
    m.seqno_ack_received(REPLICA, 0, 0);
}

#[test]
#[should_panic(expected = "memorySeqno < diskSeqno")]
fn test_ack_memory_below_disk_is_fatal() {
    let m = monitor();
    add_sync_writes(&m, &[1], majority(0));
    m.seqno_ack_received(REPLICA, 0, 1);
}

#[test]
#[should_panic(expected = "not in chain")]
fn test_ack_from_unknown_node_is_fatal() {
    let m = monitor();
    add_sync_writes(&m, &[1], majority(0));
    m.seqno_ack_received("stranger", 1, 0);
}

// ============ Topology validation ============

#[test]
#[should_panic(expected = "Topology is empty")]
fn test_topology_empty() {
    let m = DurabilityMonitor::new(Arc::new(Statistics::new(usize::MAX)));
    m.set_replication_topology(Vec::new());
}

#[test]
#[should_panic(expected = "Too many nodes in chain")]
fn test_topology_too_many_nodes() {
    let m = DurabilityMonitor::new(Arc::new(Statistics::new(usize::MAX)));
    m.set_replication_topology(vec![
        "active".into(),
        "replica1".into(),
        "replica2".into(),
        "replica3".into(),
        "replica4".into(),
    ]);
}

#[test]
#[should_panic(expected = "Duplicate node")]
fn test_topology_duplicate_node() {
    let m = DurabilityMonitor::new(Arc::new(Statistics::new(usize::MAX)));
    m.set_replication_topology(vec!["node1".into(), "node1".into()]);
}

#[test]
fn test_topology_change_carries_positions() {
    let m = monitor();
    add_sync_writes(&m, &[1, 2], majority(0));
    m.seqno_ack_received(REPLICA, 1, 0);

    // Replace the chain, keeping both nodes and adding a new replica.
    m.set_replication_topology(vec![ACTIVE.into(), REPLICA.into(), "replica2".into()]);
    assert_eq!(m.replication_chain_size(), 3);
    assert_eq!(m.node_write_seqnos(REPLICA).0, 1);
    assert_eq!(m.node_write_seqnos("replica2").0, 0);
}

// ============ Commit levels ============

#[test]
fn test_majority_commit_with_three_nodes() {
    let m = DurabilityMonitor::new(Arc::new(Statistics::new(usize::MAX)));
    m.set_replication_topology(vec![ACTIVE.into(), "r1".into(), "r2".into()]);

    m.add_sync_write(1, majority(0));
    assert_eq!(m.num_tracked(), 1);

    // Majority of 3 is 2: the active plus one replica.
    let committed = m.seqno_ack_received("r1", 1, 0);
    assert_eq!(committed, vec![1]);
    assert_eq!(m.num_tracked(), 0);
}

#[test]
fn test_majority_commit_four_node_chain() {
    let m = DurabilityMonitor::new(Arc::new(Statistics::new(usize::MAX)));
    m.set_replication_topology(vec![
        ACTIVE.into(),
        "replica1".into(),
        "replica2".into(),
        "replica3".into(),
    ]);
    assert_eq!(m.replication_chain_size(), 4);

    m.add_sync_write(1, majority(0));
    assert_eq!(m.node_write_seqnos(ACTIVE).0, 1);
    assert_eq!(m.num_tracked(), 1);

    // One replica ack is not enough: majority of 4 is 3.
    assert!(m.seqno_ack_received("replica2", 1, 0).is_empty());
    assert_eq!(m.num_tracked(), 1);

    // The second replica ack reaches majority.
    assert_eq!(m.seqno_ack_received("replica3", 1, 0), vec![1]);
    assert_eq!(m.num_tracked(), 0);
    assert_eq!(m.node_write_seqnos("replica1").0, 0);
}

#[test]
fn test_persist_to_majority_waits_for_local_persistence() {
    let m = monitor();
    add_sync_writes(&m, &[1, 3, 5], persist_to_majority());

    // The replica has everything in memory and on disk, but disk-majority
    // still needs the active's persistence.
    assert!(m.seqno_ack_received(REPLICA, 10, 10).is_empty());
    assert_eq!(m.num_tracked(), 3);
    assert_eq!(m.node_write_seqnos(REPLICA).1, 5);
    assert_eq!(m.node_ack_seqnos(REPLICA).1, 10);
    assert_eq!(m.node_write_seqnos(ACTIVE).1, 0);

    // The flusher reports local persistence; everything commits.
    let committed = m.notify_local_persistence(10);
    assert_eq!(committed, vec![1, 3, 5]);
    assert_eq!(m.num_tracked(), 0);
    assert_eq!(m.node_write_seqnos(ACTIVE).1, 5);
    assert_eq!(m.node_ack_seqnos(ACTIVE).1, 10);
}

#[test]
fn test_majority_and_persist_on_master() {
    let m = monitor();
    add_sync_writes(
        &m,
        &[1, 3, 5],
        DurabilityRequirements {
            level: DurabilityLevel::MajorityAndPersistOnMaster,
            timeout_ms: 0,
        },
    );

    // Replica ack gives memory majority, but nothing is persisted on the
    // master yet.
    assert!(m.seqno_ack_received(REPLICA, 10, 0).is_empty());
    assert_eq!(m.num_tracked(), 3);

    // Local persistence completes the requirement even though the replica
    // never acked its disk seqno.
    let committed = m.notify_local_persistence(10);
    assert_eq!(committed, vec![1, 3, 5]);
    assert_eq!(m.node_write_seqnos(ACTIVE).1, 5);
}

#[test]
fn test_out_of_order_commit_keeps_positions_valid() {
    let m = monitor();
    m.add_sync_write(1, persist_to_majority());
    m.add_sync_write(2, majority(0));
    assert_eq!(m.num_tracked(), 2);

    // Seqno 2 (Majority) commits on the memory ack while seqno 1
    // (PersistToMajority) stays tracked.
    let committed = m.seqno_ack_received(REPLICA, 2, 0);
    assert_eq!(committed, vec![2]);
    assert_eq!(m.num_tracked(), 1);
    assert_eq!(m.tracked_seqnos(), vec![1]);
    assert_eq!(m.node_write_seqnos(REPLICA).0, 2);

    // Local persistence of seqno 1, then the replica's disk ack, commits
    // the straggler.
    assert!(m.notify_local_persistence(1).is_empty());
    let committed = m.seqno_ack_received(REPLICA, 2, 1);
    assert_eq!(committed, vec![1]);
    assert_eq!(m.num_tracked(), 0);
    assert_eq!(m.node_write_seqnos(ACTIVE).1, 1);
    assert_eq!(m.node_write_seqnos(REPLICA).1, 1);

    // Positions parked by the removals must not break later additions.
    m.add_sync_write(10, majority(0));
    assert_eq!(m.num_tracked(), 1);
}

// ============ Timeouts ============

#[test]
fn test_never_expire_when_timeout_not_set() {
    let m = monitor();
    add_sync_writes(&m, &[1], majority(0));

    let year = Duration::from_secs(3600 * 24 * 365);
    let aborted = m.process_timeout(Instant::now() + year);
    assert!(aborted.is_empty());
    assert_eq!(m.num_tracked(), 1);
}

#[test]
fn test_process_timeout_unordered() {
    let m = monitor();
    // Timeouts deliberately not ordered by seqno.
    add_sync_writes(&m, &[201], majority(20));
    add_sync_writes(&m, &[202], majority(1));
    add_sync_writes(&m, &[203], majority(50_000));
    assert_eq!(m.num_tracked(), 3);
    assert_eq!(m.node_write_seqnos(ACTIVE).0, 203);

    let mut aborted = m.process_timeout(Instant::now() + Duration::from_millis(10_000));
    aborted.sort_unstable();
    assert_eq!(aborted, vec![201, 202]);
    assert_eq!(m.tracked_seqnos(), vec![203]);
    assert_eq!(m.node_write_seqnos(ACTIVE).0, 203);

    let aborted = m.process_timeout(Instant::now() + Duration::from_millis(100_000));
    assert_eq!(aborted, vec![203]);
    assert_eq!(m.num_tracked(), 0);
    assert_eq!(m.node_write_seqnos(ACTIVE).0, 203);
}

#[test]
fn test_commit_after_timeout_of_earlier_write() {
    let m = monitor();
    add_sync_writes(&m, &[1], majority(1));
    add_sync_writes(&m, &[2], majority(0));

    let aborted = m.process_timeout(Instant::now() + Duration::from_secs(10));
    assert_eq!(aborted, vec![1]);
    assert_eq!(m.num_tracked(), 1);

    let committed = m.seqno_ack_received(REPLICA, 2, 0);
    assert_eq!(committed, vec![2]);
    assert_eq!(m.num_tracked(), 0);
}
