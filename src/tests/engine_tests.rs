use crate::core::engine::EmberEngine;
use crate::core::item::{DocKey, Item};
use crate::core::vbucket::{GetOptions, VBucketState};
use crate::error::EmberError;

fn engine() -> std::sync::Arc<EmberEngine> {
    EmberEngine::builder().num_vbuckets(8).build().unwrap()
}

#[test]
fn test_builder_defaults() {
    let engine = engine();
    assert_eq!(engine.config().num_vbuckets, 8);
    assert!(engine.config().num_shards >= 1);
    let stats = engine.stats().snapshot();
    assert!(stats.mem_low_wat < stats.mem_high_wat);
    assert!(stats.mem_high_wat < stats.max_memory);
}

#[test]
fn test_vbucket_lifecycle() {
    let engine = engine();
    assert!(matches!(
        engine.get_vbucket(0),
        Err(EmberError::UnknownVBucket(0))
    ));

    engine.set_vbucket_state(0, VBucketState::Active).unwrap();
    engine.set_vbucket_state(1, VBucketState::Replica).unwrap();
    assert_eq!(engine.vbucket_ids(), vec![0, 1]);
    assert_eq!(engine.num_vbuckets_in_state(VBucketState::Active), 1);
    assert_eq!(engine.num_vbuckets_in_state(VBucketState::Replica), 1);

    // Setting the state again transitions the existing vbucket.
    engine.set_vbucket_state(1, VBucketState::Active).unwrap();
    assert_eq!(engine.num_vbuckets_in_state(VBucketState::Active), 2);

    engine.drop_vbucket(1).unwrap();
    assert!(matches!(
        engine.get_vbucket(1),
        Err(EmberError::UnknownVBucket(1))
    ));
    assert!(engine.drop_vbucket(1).is_err());
}

#[test]
fn test_vbid_out_of_range() {
    let engine = engine();
    assert!(matches!(
        engine.set_vbucket_state(100, VBucketState::Active),
        Err(EmberError::UnknownVBucket(100))
    ));
}

#[test]
fn test_shard_assignment() {
    let engine = EmberEngine::builder()
        .num_vbuckets(8)
        .num_shards(4)
        .build()
        .unwrap();
    for vbid in 0..8u16 {
        assert_eq!(engine.shard_id(vbid), vbid as usize % 4);
    }
}

#[test]
fn test_data_survives_through_engine_handle() {
    let engine = engine();
    let vb = engine.set_vbucket_state(3, VBucketState::Active).unwrap();
    let mut itm = Item::new(DocKey::plain("k"), "v");
    vb.set(&mut itm).unwrap();

    let again = engine.get_vbucket(3).unwrap();
    let fetched = again.get(&DocKey::plain("k"), GetOptions::default()).unwrap();
    assert_eq!(fetched.value.as_deref(), Some(&b"v"[..]));
}

// ============ control surface ============

#[test]
fn test_stat_group_memory() {
    let engine = engine();
    let vb = engine.set_vbucket_state(0, VBucketState::Active).unwrap();
    let mut itm = Item::new(DocKey::plain("k"), "v");
    vb.set(&mut itm).unwrap();

    let stats = engine.stat_group("memory").unwrap();
    let mem_used: usize = stats
        .iter()
        .find(|(k, _)| k == "mem_used")
        .map(|(_, v)| v.parse().unwrap())
        .unwrap();
    assert!(mem_used > 0);
    assert!(stats.iter().any(|(k, _)| k == "ep_mem_high_wat"));
}

#[test]
fn test_stat_group_vbucket_details() {
    let engine = engine();
    let vb = engine.set_vbucket_state(2, VBucketState::Active).unwrap();
    let mut itm = Item::new(DocKey::plain("k"), "v");
    vb.set(&mut itm).unwrap();

    let stats = engine.stat_group("vbucket-details 2").unwrap();
    assert!(stats.iter().any(|(k, v)| k == "vb_2" && v == "active"));
    assert!(stats
        .iter()
        .any(|(k, v)| k == "vb_2:num_items" && v == "1"));
    assert!(stats
        .iter()
        .any(|(k, v)| k == "vb_2:high_seqno" && v == "1"));
}

#[test]
fn test_stat_group_checkpoint_and_seqno() {
    let engine = engine();
    let vb = engine.set_vbucket_state(0, VBucketState::Active).unwrap();
    let mut itm = Item::new(DocKey::plain("k"), "v");
    vb.set(&mut itm).unwrap();

    let stats = engine.stat_group("checkpoint 0").unwrap();
    assert!(stats
        .iter()
        .any(|(k, v)| k == "vb_0:open_checkpoint_id" && v == "1"));

    let stats = engine.stat_group("vbucket-seqno 0").unwrap();
    assert!(stats
        .iter()
        .any(|(k, v)| k == "vb_0:high_seqno" && v == "1"));
    assert!(stats.iter().any(|(k, _)| k == "vb_0:uuid"));
}

#[test]
fn test_stat_group_durability_monitor() {
    let engine = engine();
    let vb = engine.set_vbucket_state(0, VBucketState::Active).unwrap();
    vb.set_replication_topology(vec!["active".into(), "replica".into()]);

    let stats = engine.stat_group("durability-monitor 0").unwrap();
    assert!(stats
        .iter()
        .any(|(k, v)| k == "vb_0:replication_chain_size" && v == "2"));
}

#[test]
fn test_stat_group_hash() {
    let engine = engine();
    let vb = engine.set_vbucket_state(0, VBucketState::Active).unwrap();
    let mut itm = Item::new(DocKey::plain("k"), "v");
    vb.set(&mut itm).unwrap();

    let basic = engine.stat_group("hash").unwrap();
    assert!(basic.iter().any(|(k, _)| k == "vb_0:num_items"));
    assert!(!basic.iter().any(|(k, _)| k == "vb_0:num_ejects"));

    let detail = engine.stat_group("hash detail").unwrap();
    assert!(detail.iter().any(|(k, _)| k == "vb_0:num_ejects"));
}

#[test]
fn test_stat_group_reset() {
    let engine = engine();
    let vb = engine.set_vbucket_state(0, VBucketState::Active).unwrap();
    let mut itm = Item::new(DocKey::plain("k"), "v");
    vb.set(&mut itm).unwrap();
    assert!(engine.stats().snapshot().total_sets > 0);

    let out = engine.stat_group("reset").unwrap();
    assert!(out.is_empty());
    assert_eq!(engine.stats().snapshot().total_sets, 0);
    assert_eq!(vb.ops_create(), 0);
}

#[test]
fn test_stat_group_unknown() {
    let engine = engine();
    assert!(matches!(
        engine.stat_group("no-such-group"),
        Err(EmberError::UnknownStatGroup(_))
    ));
    assert!(matches!(
        engine.stat_group("vbucket-details nonsense"),
        Err(EmberError::UnknownStatGroup(_))
    ));
}
