use std::sync::Arc;

use ctab::CTab;

#[test]
fn round_trip() {
  let table: CTab<u64, u64> = CTab::new();

  for index in 0..10 {
    assert!(table.insert(index, index).unwrap());
  }

  for index in 0..10 {
    assert_eq!(table.get(&index), Some(index));
  }

  assert_eq!(table.len(), 10);
  assert!(!table.is_empty());
}

#[test]
fn insert_keeps_existing_value() {
  let table: CTab<u64, u64> = CTab::new();

  assert!(table.insert(5, 5).unwrap());
  assert!(!table.insert(5, 100).unwrap());
  assert_eq!(table.get(&5), Some(5));
  assert_eq!(table.len(), 1);
}

#[test]
fn insert_or_assign_overwrites() {
  let table: CTab<u64, u64> = CTab::new();

  table.insert(5, 5).unwrap();

  assert!(!table.insert_or_assign(5, 100).unwrap());
  assert_eq!(table.get(&5), Some(100));
  assert_eq!(table.len(), 1);
}

#[test]
fn update_requires_presence() {
  let table: CTab<u64, u64> = CTab::new();

  assert!(!table.update(&42, 7));
  assert_eq!(table.get(&42), None);

  table.insert(42, 0).unwrap();

  assert!(table.update(&42, 7));
  assert_eq!(table.get(&42), Some(7));
}

#[test]
fn insert_or_visit_accumulates() {
  let table: CTab<&str, u64> = CTab::new();

  for word in ["the", "quick", "the", "brown", "the"] {
    table.insert_or_visit(word, 1, |count| *count += 1).unwrap();
  }

  assert_eq!(table.get("the"), Some(3));
  assert_eq!(table.get("quick"), Some(1));
  assert_eq!(table.get("brown"), Some(1));
  assert_eq!(table.len(), 3);
}

#[test]
fn visit_mutates_in_place() {
  let table: CTab<u64, String> = CTab::new();

  table.insert(1, "a".to_string()).unwrap();

  assert!(table.visit(&1, |value| value.push('b')));
  assert!(!table.visit(&2, |_| panic!("must not run for absent keys")));
  assert_eq!(table.get(&1), Some("ab".to_string()));
}

#[test]
fn remove_and_contains() {
  let table: CTab<u64, u64> = CTab::new();

  table.insert(9, 90).unwrap();

  assert!(table.contains(&9));
  assert!(table.remove(&9));
  assert!(!table.contains(&9));
  assert!(!table.remove(&9));
  assert_eq!(table.len(), 0);
}

#[test]
fn remove_if_consults_the_value() {
  let table: CTab<u64, u64> = CTab::new();

  table.insert(1, 10).unwrap();

  // Found but spared.
  assert!(table.remove_if(&1, |value| *value > 100));
  assert_eq!(table.get(&1), Some(10));

  // Found and removed.
  assert!(table.remove_if(&1, |value| *value == 10));
  assert_eq!(table.get(&1), None);

  // Not found at all.
  assert!(!table.remove_if(&1, |_| true));
}

#[test]
fn heterogeneous_key_lookup() {
  let table: CTab<String, u64> = CTab::new();

  table.insert("borrowed".to_string(), 1).unwrap();

  assert_eq!(table.get("borrowed"), Some(1));
  assert!(table.contains("borrowed"));
  assert!(table.visit("borrowed", |value| *value += 1));
  assert!(table.remove("borrowed"));
}

#[test]
fn clear_then_reuse() {
  let table: CTab<u64, u64> = CTab::new();

  for index in 0..50 {
    table.insert(index, index).unwrap();
  }

  table.clear();

  assert_eq!(table.len(), 0);
  assert!(table.is_empty());
  assert_eq!(table.get(&7), None);

  table.insert(7, 70).unwrap();
  assert_eq!(table.get(&7), Some(70));
  assert_eq!(table.len(), 1);
}

#[test]
fn len_matches_single_threaded_history() {
  let table: CTab<u64, u64> = CTab::new();

  for index in 0..100 {
    table.insert(index, index).unwrap();
  }

  for index in 0..30 {
    table.remove(&index);
  }

  table.insert(5, 5).unwrap();

  assert_eq!(table.len(), 71);
  assert_eq!(table.lock().iter().count(), 71);
}

#[test]
fn from_iterator_keeps_first_value() {
  let table: CTab<u64, u64> = [(1, 10), (2, 20), (1, 99)].into_iter().collect();

  assert_eq!(table.len(), 2);
  assert_eq!(table.get(&1), Some(10));
  assert_eq!(table.get(&2), Some(20));
}

#[test]
fn into_iter_drains_everything() {
  let table: CTab<u64, u64> = CTab::new();

  for index in 0..25 {
    table.insert(index, index * 2).unwrap();
  }

  let mut entries: Vec<(u64, u64)> = table.into_iter().collect();
  entries.sort_unstable();

  assert_eq!(entries.len(), 25);

  for (index, entry) in entries.iter().enumerate() {
    assert_eq!(*entry, (index as u64, index as u64 * 2));
  }
}

#[test]
fn dropping_destroys_entries() {
  let witness: Arc<()> = Arc::new(());

  {
    let table: CTab<u64, Arc<()>> = CTab::new();

    for index in 0..40 {
      table.insert(index, Arc::clone(&witness)).unwrap();
    }

    table.remove(&0);
    assert_eq!(Arc::strong_count(&witness), 40);
  }

  assert_eq!(Arc::strong_count(&witness), 1);
}

#[test]
fn partial_drain_drops_the_rest() {
  let witness: Arc<()> = Arc::new(());

  {
    let table: CTab<u64, Arc<()>> = CTab::new();

    for index in 0..10 {
      table.insert(index, Arc::clone(&witness)).unwrap();
    }

    let mut drain = table.into_iter();
    let _first: Option<(u64, Arc<()>)> = drain.next();
    let _second: Option<(u64, Arc<()>)> = drain.next();

    // The iterator still owns eight entries plus the two yielded ones.
    assert_eq!(Arc::strong_count(&witness), 11);
  }

  assert_eq!(Arc::strong_count(&witness), 1);
}

#[test]
fn debug_formats_entries() {
  let table: CTab<u64, u64> = CTab::new();

  table.insert(1, 10).unwrap();

  let rendered: String = format!("{table:?}");
  assert!(rendered.contains("1: 10"));
}

#[test]
fn default_is_empty() {
  let table: CTab<u64, u64> = CTab::default();

  assert!(table.is_empty());
  assert!(table.capacity() >= 16);
}

#[test]
fn custom_hasher_round_trip() {
  let table: CTab<u64, u64, foldhash::fast::RandomState> =
    CTab::with_capacity_and_hasher(32, foldhash::fast::RandomState::default());

  for index in 0..200 {
    assert!(table.insert(index, !index).unwrap());
  }

  for index in 0..200 {
    assert_eq!(table.get(&index), Some(!index));
  }
}

#[test]
fn wider_buckets_work() {
  let table: CTab<u64, u64, std::collections::hash_map::RandomState, 8> =
    CTab::with_capacity_and_hasher(16, Default::default());

  for index in 0..500 {
    table.insert(index, index).unwrap();
  }

  assert_eq!(table.len(), 500);
  assert_eq!(table.get(&499), Some(499));
}
