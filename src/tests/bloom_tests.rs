use crate::core::bloom::{BloomFilter, FilterPair, FilterStatus};
use crate::core::item::{CollectionId, DocKey};

#[test]
fn test_added_keys_are_found() {
    let mut f = BloomFilter::new(1000, 0.01, FilterStatus::Enabled);
    for i in 0..500 {
        f.add_key(&DocKey::plain(format!("key-{}", i)));
    }
    for i in 0..500 {
        assert!(f.maybe_contains(&DocKey::plain(format!("key-{}", i))));
    }
    assert_eq!(f.key_count(), 500);
}

#[test]
fn test_false_positive_rate_is_bounded() {
    let mut f = BloomFilter::new(1000, 0.01, FilterStatus::Enabled);
    for i in 0..1000 {
        f.add_key(&DocKey::plain(format!("present-{}", i)));
    }
    let false_positives = (0..10_000)
        .filter(|i| f.maybe_contains(&DocKey::plain(format!("absent-{}", i))))
        .count();
    // Allow generous slack over the configured 1%.
    assert!(
        false_positives < 500,
        "false positive rate too high: {}/10000",
        false_positives
    );
}

#[test]
fn test_collection_qualifies_key() {
    let mut f = BloomFilter::new(100, 0.01, FilterStatus::Enabled);
    f.add_key(&DocKey::new(CollectionId(1), "key"));
    // The same bytes in another collection are a different key; it may
    // still collide, but with one entry it must not.
    assert!(!f.maybe_contains(&DocKey::new(CollectionId(2), "key")));
}

#[test]
fn test_pair_without_filter_lets_probes_through() {
    let pair = FilterPair::default();
    assert!(pair.maybe_key_exists(&DocKey::plain("anything")));
    assert_eq!(pair.status_string(), "DOESN'T EXIST");
}

#[test]
fn test_pair_swap_promotes_temp_filter() {
    let mut pair = FilterPair {
        filter: Some(BloomFilter::new(100, 0.01, FilterStatus::Compacting)),
        temp: Some(BloomFilter::new(100, 0.01, FilterStatus::Compacting)),
    };
    // During compaction keys go to both filters.
    pair.add_key(&DocKey::plain("survivor"));
    pair.swap();

    let f = pair.filter.as_ref().unwrap();
    assert_eq!(f.status(), FilterStatus::Enabled);
    assert!(f.maybe_contains(&DocKey::plain("survivor")));
    assert!(pair.temp.is_none());
    assert_eq!(pair.status_string(), "ENABLED");
}

#[test]
fn test_pair_swap_discards_disabled_temp() {
    let mut pair = FilterPair {
        filter: Some(BloomFilter::new(100, 0.01, FilterStatus::Enabled)),
        temp: Some(BloomFilter::new(100, 0.01, FilterStatus::Disabled)),
    };
    pair.swap();
    assert!(pair.filter.is_none());
    assert!(pair.temp.is_none());
}
