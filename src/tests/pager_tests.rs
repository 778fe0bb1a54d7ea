use std::sync::atomic::Ordering;

use crate::core::engine::EmberEngine;
use crate::core::item::{DocKey, Item};
use crate::core::pager::PagerAlgorithm;
use crate::core::vbucket::{GetOptions, VBucketState};
use crate::utils::time;

const VALUE_SIZE: usize = 1024;

fn small_engine(max_memory: usize) -> std::sync::Arc<EmberEngine> {
    EmberEngine::builder()
        .num_vbuckets(4)
        .max_memory(max_memory)
        .watermarks(0.3, 0.45)
        .checkpoint_max_items(64)
        .pager_algorithm(PagerAlgorithm::StatisticalCounter)
        .build()
        .unwrap()
}

/// Fill the engine with `count` clean items spread over its vbuckets and
/// return their keys.
fn populate(engine: &EmberEngine, count: usize) -> Vec<(u16, DocKey)> {
    let mut keys = Vec::new();
    for i in 0..count {
        let vbid = (i % 4) as u16;
        let vb = engine
            .set_vbucket_state(vbid, VBucketState::Active)
            .unwrap();
        let key = DocKey::plain(format!("key-{:05}", i));
        let mut itm = Item::new(key.clone(), vec![0u8; VALUE_SIZE]);
        vb.set(&mut itm).unwrap();
        // The flusher has persisted everything; values are evictable.
        vb.persisted_on_disk(&itm);
        keys.push((vbid, key));
    }
    keys
}

#[test]
fn test_pager_does_not_run_below_high_watermark() {
    let engine = small_engine(64 * 1024 * 1024);
    populate(&engine, 16);
    assert!(!engine.run_item_pager_pass());
    assert_eq!(engine.stats().snapshot().pager_runs, 0);
}

#[test]
fn test_schedule_now_forces_a_pass() {
    let engine = small_engine(64 * 1024 * 1024);
    populate(&engine, 16);
    engine.schedule_pager_now();
    assert!(engine.run_item_pager_pass());
    assert_eq!(engine.stats().snapshot().pager_runs, 1);
}

#[test]
fn test_pager_single_flight_latch() {
    let engine = small_engine(64 * 1024 * 1024);
    populate(&engine, 16);

    // A held latch coalesces the request instead of running twice.
    assert!(engine.pager.test_hold_latch());
    engine.schedule_pager_now();
    assert!(!engine.run_item_pager_pass());
    engine.pager.test_release_latch();

    engine.schedule_pager_now();
    assert!(engine.run_item_pager_pass());
}

#[test]
fn test_pager_converges_below_low_watermark() {
    // Memory budget sized so ~300 one-KB values overflow the high
    // watermark without tripping the mutation ceiling.
    let engine = small_engine(600 * 1024);
    let keys = populate(&engine, 300);

    // Skewed access: 10% hot keys are read repeatedly.
    for (vbid, key) in keys.iter().take(30) {
        let vb = engine.get_vbucket(*vbid).unwrap();
        for _ in 0..100 {
            let _ = vb.get(key, GetOptions::default());
        }
    }

    // Replicas are the pager's preferred victims; actives with a healthy
    // resident ratio are spared.
    for vbid in engine.vbucket_ids() {
        engine
            .get_vbucket(vbid)
            .unwrap()
            .set_state(VBucketState::Replica);
    }

    let stats = engine.stats();
    assert!(
        stats.estimated_total_memory_used() > stats.mem_high_wat.load(Ordering::Acquire),
        "test setup must start above the high watermark"
    );

    let mut passes = 0;
    while stats.estimated_total_memory_used() > stats.mem_low_wat.load(Ordering::Acquire) {
        engine.schedule_pager_now();
        assert!(engine.run_item_pager_pass());
        passes += 1;
        assert!(
            passes < 50,
            "pager failed to converge below the low watermark"
        );
    }
    assert!(stats.snapshot().num_values_ejected > 0);

    // One more pass stops immediately (memory below low watermark) and
    // resets the eviction multiplier.
    engine.schedule_pager_now();
    assert!(engine.run_item_pager_pass());
    assert_eq!(engine.pager.eviction_multiplier(), 0.0);
}

#[test]
fn test_failed_pass_raises_eviction_multiplier() {
    let engine = small_engine(600 * 1024);
    let keys = populate(&engine, 300);

    // Every value is dirty again: nothing is evictable, so a pass visits
    // everything and fails to reach the low watermark.
    for (vbid, key) in &keys {
        engine.get_vbucket(*vbid).unwrap().mark_dirty(key);
    }
    for vbid in engine.vbucket_ids() {
        engine
            .get_vbucket(vbid)
            .unwrap()
            .set_state(VBucketState::Replica);
    }

    engine.schedule_pager_now();
    assert!(engine.run_item_pager_pass());
    assert!(engine.pager.eviction_multiplier() > 0.0);

    engine.schedule_pager_now();
    assert!(engine.run_item_pager_pass());
    assert!(engine.pager.eviction_multiplier() >= 0.1 - f64::EPSILON);
}

#[test]
fn test_lru_pager_evicts_cold_values() {
    let engine = EmberEngine::builder()
        .num_vbuckets(2)
        .max_memory(400 * 1024)
        .watermarks(0.3, 0.4)
        .pager_algorithm(PagerAlgorithm::Lru2Bit)
        .build()
        .unwrap();

    let vb = engine.set_vbucket_state(0, VBucketState::Replica).unwrap();
    for i in 0..150 {
        let mut itm = Item::new(DocKey::plain(format!("k{}", i)), vec![0u8; VALUE_SIZE]);
        vb.set(&mut itm).unwrap();
        vb.persisted_on_disk(&itm);
        // Everything starts cold.
        let key = itm.key.clone();
        let mut lock = vb.ht.locked_bucket(&key);
        vb.ht.mutate(&mut lock, &key, |v| {
            v.set_nru(crate::constants::MAX_NRU_VALUE)
        });
    }

    engine.schedule_pager_now();
    assert!(engine.run_item_pager_pass());
    assert!(engine.stats().snapshot().num_values_ejected > 0);
}

#[test]
fn test_expiry_pager_sweeps_expired_values() {
    let engine = small_engine(64 * 1024 * 1024);
    let vb = engine.set_vbucket_state(0, VBucketState::Active).unwrap();

    for i in 0..10 {
        let mut itm = Item::new(DocKey::plain(format!("stale{}", i)), "v")
            .exptime(time::epoch_secs() - 30);
        vb.set(&mut itm).unwrap();
    }
    for i in 0..5 {
        let mut itm = Item::new(DocKey::plain(format!("fresh{}", i)), "v");
        vb.set(&mut itm).unwrap();
    }

    assert!(engine.run_expiry_pager_pass());
    let snapshot = engine.stats().snapshot();
    assert_eq!(snapshot.expiry_pager_runs, 1);
    assert_eq!(snapshot.expired_pager, 10);
    assert_eq!(vb.num_expired_items(), 10);
    assert_eq!(vb.ht.num_items(), 5);
    assert_eq!(vb.ht.num_deleted_items(), 10);
}

#[test]
fn test_pager_reclaims_closed_checkpoints_first() {
    let engine = EmberEngine::builder()
        .num_vbuckets(1)
        .max_memory(64 * 1024 * 1024)
        .checkpoint_max_items(8)
        .build()
        .unwrap();
    let vb = engine.set_vbucket_state(0, VBucketState::Active).unwrap();
    for i in 0..32 {
        let mut itm = Item::new(DocKey::plain(format!("k{}", i)), "v");
        vb.set(&mut itm).unwrap();
    }
    vb.checkpoint_manager().create_new_checkpoint();

    let before = engine
        .stats()
        .checkpoint_memory
        .load(Ordering::Acquire);
    assert!(before > 0);

    engine.schedule_pager_now();
    assert!(engine.run_item_pager_pass());
    assert!(engine.stats().checkpoint_memory.load(Ordering::Acquire) < before);
    assert!(engine.stats().snapshot().items_removed_from_checkpoints > 0);
}
