use std::sync::Arc;

use crate::core::hash_table::{
    EvictionPolicy, HashTable, TrackReference, VisitAction, WantsDeleted,
};
use crate::core::item::{DocKey, Item};
use crate::stats::Statistics;
use crate::utils::time;

fn table(policy: EvictionPolicy) -> (HashTable, Arc<Statistics>) {
    let stats = Arc::new(Statistics::new(usize::MAX));
    (HashTable::new(64, 7, policy, stats.clone()), stats)
}

fn insert(ht: &HashTable, key: &str, value: &str) {
    let itm = Item::new(DocKey::plain(key), value.to_string());
    let mut lock = ht.locked_bucket(&itm.key);
    ht.add_new(&mut lock, &itm);
}

#[test]
fn test_add_find_delete() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    let key = DocKey::plain("k");

    insert(&ht, "k", "v");
    assert_eq!(ht.num_items(), 1);

    let mut lock = ht.locked_bucket(&key);
    let v = ht
        .find(&mut lock, &key, WantsDeleted::Yes, TrackReference::No)
        .unwrap();
    assert_eq!(v.value().map(|b| b.as_ref()), Some(&b"v"[..]));
    drop(lock);

    let mut lock = ht.locked_bucket(&key);
    assert!(ht.delete(&mut lock, &key));
    assert!(!ht.delete(&mut lock, &key));
    drop(lock);
    assert_eq!(ht.num_items(), 0);
    assert_eq!(ht.mem_size(), 0);
}

#[test]
#[should_panic(expected = "key already present")]
fn test_duplicate_add_is_fatal() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    insert(&ht, "k", "v1");
    insert(&ht, "k", "v2");
}

#[test]
fn test_wants_deleted_filters_tombstones() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    let key = DocKey::plain("k");
    insert(&ht, "k", "v");

    let mut lock = ht.locked_bucket(&key);
    ht.mutate(&mut lock, &key, |v| {
        v.del(time::epoch_secs());
    });
    assert!(ht
        .find(&mut lock, &key, WantsDeleted::No, TrackReference::No)
        .is_none());
    assert!(ht
        .find(&mut lock, &key, WantsDeleted::Yes, TrackReference::No)
        .is_some());
    drop(lock);

    assert_eq!(ht.num_items(), 0);
    assert_eq!(ht.num_deleted_items(), 1);
}

#[test]
fn test_mutate_keeps_memory_accounting() {
    let (ht, stats) = table(EvictionPolicy::ValueOnly);
    let key = DocKey::plain("k");
    insert(&ht, "k", "small");
    let before = ht.mem_size();
    assert_eq!(stats.memory_usage.load(std::sync::atomic::Ordering::Acquire), before);

    let mut lock = ht.locked_bucket(&key);
    ht.mutate(&mut lock, &key, |v| {
        let mut itm = v.to_item(false);
        itm.value = Some(bytes::Bytes::from(vec![0u8; 4096]));
        v.set_value(&itm);
    });
    drop(lock);

    assert_eq!(ht.mem_size(), before + 4096 - "small".len());
    assert_eq!(
        stats.memory_usage.load(std::sync::atomic::Ordering::Acquire),
        ht.mem_size()
    );
}

#[test]
fn test_eject_value_only_keeps_metadata() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    let key = DocKey::plain("k");
    insert(&ht, "k", "value-bytes");

    // Dirty values are not eligible.
    let mut lock = ht.locked_bucket(&key);
    assert!(!ht.eject(&mut lock, &key));
    ht.mutate(&mut lock, &key, |v| v.mark_clean());
    assert!(ht.eject(&mut lock, &key));

    let v = ht
        .find(&mut lock, &key, WantsDeleted::Yes, TrackReference::No)
        .unwrap();
    assert!(!v.is_resident());
    assert!(v.value().is_none());
    drop(lock);

    assert_eq!(ht.num_items(), 1);
    assert_eq!(ht.num_non_resident(), 1);
    assert_eq!(ht.num_ejects(), 1);
}

#[test]
fn test_eject_full_eviction_removes_entry() {
    let (ht, _) = table(EvictionPolicy::FullEviction);
    let key = DocKey::plain("k");
    insert(&ht, "k", "value-bytes");

    let mut lock = ht.locked_bucket(&key);
    ht.mutate(&mut lock, &key, |v| v.mark_clean());
    assert!(ht.eject(&mut lock, &key));
    assert!(ht
        .find(&mut lock, &key, WantsDeleted::Yes, TrackReference::No)
        .is_none());
    drop(lock);

    assert_eq!(ht.num_items(), 0);
    assert_eq!(ht.num_ejects(), 1);
}

#[test]
fn test_visit_applies_eject() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    for i in 0..32 {
        insert(&ht, &format!("k{}", i), "some-value");
    }
    // Half the values are clean and thus evictable.
    for i in 0..16 {
        let key = DocKey::plain(format!("k{}", i));
        let mut lock = ht.locked_bucket(&key);
        ht.mutate(&mut lock, &key, |v| v.mark_clean());
    }

    let ejected = ht.visit(|v| {
        if v.is_dirty() {
            VisitAction::Keep
        } else {
            VisitAction::Eject
        }
    });
    assert_eq!(ejected, 16);
    assert_eq!(ht.num_non_resident(), 16);
    assert_eq!(ht.num_items(), 32);
}

#[test]
fn test_max_deleted_rev_seqno_is_monotone() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    ht.update_max_deleted_rev_seqno(10);
    assert_eq!(ht.max_deleted_rev_seqno(), 10);
    ht.update_max_deleted_rev_seqno(5);
    assert_eq!(ht.max_deleted_rev_seqno(), 10);
    ht.update_max_deleted_rev_seqno(11);
    assert_eq!(ht.max_deleted_rev_seqno(), 11);
}

#[test]
fn test_track_reference_warms_the_value() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    let key = DocKey::plain("k");
    insert(&ht, "k", "v");

    let mut lock = ht.locked_bucket(&key);
    let initial_nru = ht
        .find(&mut lock, &key, WantsDeleted::Yes, TrackReference::No)
        .unwrap()
        .nru();
    for _ in 0..8 {
        ht.find(&mut lock, &key, WantsDeleted::Yes, TrackReference::Yes);
    }
    let v = ht
        .find(&mut lock, &key, WantsDeleted::Yes, TrackReference::No)
        .unwrap();
    assert!(v.nru() < initial_nru);
}

#[test]
fn test_resident_ratio() {
    let (ht, _) = table(EvictionPolicy::ValueOnly);
    for i in 0..10 {
        insert(&ht, &format!("k{}", i), "value");
    }
    assert_eq!(ht.resident_ratio(), 1.0);

    for i in 0..5 {
        let key = DocKey::plain(format!("k{}", i));
        let mut lock = ht.locked_bucket(&key);
        ht.mutate(&mut lock, &key, |v| v.mark_clean());
        ht.eject(&mut lock, &key);
    }
    assert!((ht.resident_ratio() - 0.5).abs() < f64::EPSILON);
}
