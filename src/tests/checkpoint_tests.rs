use std::sync::Arc;

use crate::core::checkpoint::{
    CheckpointManager, GenerateBySeqno, GenerateCas, QueueOp, QueuedItem,
};
use crate::core::hlc::Hlc;
use crate::core::item::DocKey;
use crate::stats::Statistics;

fn manager(max_items: usize) -> (CheckpointManager, Hlc, Arc<Statistics>) {
    let stats = Arc::new(Statistics::new(usize::MAX));
    (
        CheckpointManager::new(0, max_items, stats.clone()),
        Hlc::new(0, 0, u64::MAX, u64::MAX),
        stats,
    )
}

fn queued(key: &str) -> QueuedItem {
    QueuedItem {
        key: DocKey::plain(key),
        by_seqno: 0,
        cas: 0,
        op: QueueOp::Mutation,
        deleted: false,
        value: None,
    }
}

#[test]
fn test_queue_dirty_assigns_monotonic_seqnos() {
    let (cm, hlc, _) = manager(1000);

    let mut last = 0;
    for i in 0..20 {
        let r = cm.queue_dirty(
            queued(&format!("k{}", i)),
            GenerateBySeqno::Yes,
            GenerateCas::Yes,
            &hlc,
        );
        assert!(r.by_seqno > last);
        assert!(r.cas > 0);
        last = r.by_seqno;
    }
    assert_eq!(cm.high_seqno(), 20);
}

#[test]
fn test_queue_dirty_accepts_supplied_seqnos() {
    let (cm, hlc, _) = manager(1000);

    let mut qi = queued("k");
    qi.by_seqno = 10;
    qi.cas = 999;
    let r = cm.queue_dirty(qi, GenerateBySeqno::No, GenerateCas::No, &hlc);
    assert_eq!(r.by_seqno, 10);
    assert_eq!(r.cas, 999);
    assert_eq!(cm.high_seqno(), 10);
}

#[test]
#[should_panic(expected = "not greater than")]
fn test_supplied_seqno_must_be_monotonic() {
    let (cm, hlc, _) = manager(1000);
    let mut qi = queued("a");
    qi.by_seqno = 10;
    cm.queue_dirty(qi, GenerateBySeqno::No, GenerateCas::No, &hlc);

    let mut stale = queued("b");
    stale.by_seqno = 10;
    cm.queue_dirty(stale, GenerateBySeqno::No, GenerateCas::No, &hlc);
}

#[test]
fn test_notify_flusher_only_for_first_item() {
    let (cm, hlc, _) = manager(1000);
    let first = cm.queue_dirty(queued("a"), GenerateBySeqno::Yes, GenerateCas::Yes, &hlc);
    let second = cm.queue_dirty(queued("b"), GenerateBySeqno::Yes, GenerateCas::Yes, &hlc);
    assert!(first.notify_flusher);
    assert!(!second.notify_flusher);
}

#[test]
fn test_create_new_checkpoint() {
    let (cm, hlc, _) = manager(1000);
    assert_eq!(cm.get_open_checkpoint_id(), 1);
    cm.queue_dirty(queued("a"), GenerateBySeqno::Yes, GenerateCas::Yes, &hlc);

    let id = cm.create_new_checkpoint();
    assert_eq!(id, 2);
    assert_eq!(cm.get_open_checkpoint_id(), 2);
    assert_eq!(cm.num_checkpoints(), 2);
    assert_eq!(cm.num_open_checkpoint_items(), 0);
}

#[test]
fn test_remove_closed_unref_checkpoints() {
    let (cm, hlc, stats) = manager(1000);
    for i in 0..5 {
        cm.queue_dirty(
            queued(&format!("k{}", i)),
            GenerateBySeqno::Yes,
            GenerateCas::Yes,
            &hlc,
        );
    }
    cm.create_new_checkpoint();
    assert!(stats.checkpoint_memory.load(std::sync::atomic::Ordering::Acquire) > 0);

    let (removed, created) = cm.remove_closed_unref_checkpoints();
    assert_eq!(removed, 5);
    assert!(!created);
    assert_eq!(cm.num_checkpoints(), 1);
    assert_eq!(
        stats
            .checkpoint_memory
            .load(std::sync::atomic::Ordering::Acquire),
        0
    );
    // The seqno counter is unaffected by reclamation.
    assert_eq!(cm.high_seqno(), 5);
}

#[test]
fn test_cursor_pins_checkpoint() {
    let (cm, hlc, _) = manager(1000);
    cm.queue_dirty(queued("a"), GenerateBySeqno::Yes, GenerateCas::Yes, &hlc);
    let cursor = cm.register_cursor();
    cm.create_new_checkpoint();

    // The closed checkpoint is still referenced.
    let (removed, _) = cm.remove_closed_unref_checkpoints();
    assert_eq!(removed, 0);
    assert_eq!(cm.num_checkpoints(), 2);

    cm.deregister_cursor(cursor);
    let (removed, _) = cm.remove_closed_unref_checkpoints();
    assert_eq!(removed, 1);
    assert_eq!(cm.num_checkpoints(), 1);
}

#[test]
fn test_oversized_open_checkpoint_rolls_over_on_reclaim() {
    let (cm, hlc, _) = manager(4);
    for i in 0..4 {
        cm.queue_dirty(
            queued(&format!("k{}", i)),
            GenerateBySeqno::Yes,
            GenerateCas::Yes,
            &hlc,
        );
    }
    // The open checkpoint reached the item cap: reclamation closes it,
    // opens a new one and immediately frees the closed one.
    let (removed, created) = cm.remove_closed_unref_checkpoints();
    assert!(created);
    assert_eq!(removed, 4);
    assert_eq!(cm.get_open_checkpoint_id(), 2);
}

#[test]
fn test_clear_resets_to_single_open_checkpoint() {
    let (cm, hlc, stats) = manager(1000);
    for i in 0..3 {
        cm.queue_dirty(
            queued(&format!("k{}", i)),
            GenerateBySeqno::Yes,
            GenerateCas::Yes,
            &hlc,
        );
    }
    cm.create_new_checkpoint();
    cm.clear(1);

    assert_eq!(cm.num_checkpoints(), 1);
    assert_eq!(cm.high_seqno(), 1);
    assert!(cm.queued_items().is_empty());
    assert_eq!(
        stats
            .checkpoint_memory
            .load(std::sync::atomic::Ordering::Acquire),
        0
    );
}
