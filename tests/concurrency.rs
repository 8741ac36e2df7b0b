use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use ctab::CTab;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

const THREADS: usize = 8;

// Scenario: every thread races to insert the same key with its own value.
// Expected: exactly one insert reports success, and every subsequent read
// observes the winner's value.
#[test]
fn duplicate_insert_under_contention() {
  for round in 0..20 {
    let table: Arc<CTab<u64, usize>> = Arc::new(CTab::new());
    let barrier: Arc<Barrier> = Arc::new(Barrier::new(THREADS));
    let winners: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

    let threads: Vec<JoinHandle<bool>> = (0..THREADS)
      .map(|thread_id| {
        let table: Arc<CTab<u64, usize>> = Arc::clone(&table);
        let barrier: Arc<Barrier> = Arc::clone(&barrier);
        let winners: Arc<AtomicUsize> = Arc::clone(&winners);

        thread::spawn(move || {
          barrier.wait();

          let created: bool = table.insert(round, thread_id).unwrap();

          if created {
            winners.fetch_add(1, Ordering::Relaxed);
          }

          created
        })
      })
      .collect();

    let outcomes: Vec<bool> = threads
      .into_iter()
      .map(|thread| thread.join().unwrap())
      .collect();

    assert_eq!(winners.load(Ordering::Relaxed), 1);
    assert_eq!(outcomes.iter().filter(|&&created| created).count(), 1);

    let winner: usize = outcomes.iter().position(|&created| created).unwrap();
    assert_eq!(table.get(&round), Some(winner));
    assert_eq!(table.len(), 1);
  }
}

// Scenario: a locked view is held while another thread inserts a disjoint
// key.
// Expected: the insert blocks until the view drops, and the view observes
// exactly the pre-lock contents.
#[test]
fn locked_view_excludes_writers() {
  let table: Arc<CTab<u64, u64>> = Arc::new(CTab::new());

  for key in 0..100 {
    table.insert(key, key).unwrap();
  }

  let view = table.lock();
  let finished: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));

  let writer: JoinHandle<()> = {
    let table: Arc<CTab<u64, u64>> = Arc::clone(&table);
    let finished: Arc<AtomicBool> = Arc::clone(&finished);

    thread::spawn(move || {
      table.insert(1_000, 1).unwrap();
      finished.store(true, Ordering::Release);
    })
  };

  thread::sleep(Duration::from_millis(100));

  assert!(!finished.load(Ordering::Acquire));
  assert_eq!(view.iter().count(), 100);
  assert_eq!(view.len(), 100);

  drop(view);
  writer.join().unwrap();

  assert!(finished.load(Ordering::Acquire));
  assert_eq!(table.get(&1_000), Some(1));
  assert_eq!(table.len(), 101);
}

// Scenario: eight threads insert disjoint ranges while the table grows
// from its minimum size.
// Expected: no entry is lost or duplicated across the resizes.
#[test]
fn concurrent_inserts_across_growth() {
  const PER_THREAD: u64 = 5_000;

  let table: Arc<CTab<u64, u64>> = Arc::new(CTab::with_capacity(16));
  let barrier: Arc<Barrier> = Arc::new(Barrier::new(THREADS));

  let threads: Vec<JoinHandle<()>> = (0..THREADS as u64)
    .map(|thread_id| {
      let table: Arc<CTab<u64, u64>> = Arc::clone(&table);
      let barrier: Arc<Barrier> = Arc::clone(&barrier);

      thread::spawn(move || {
        barrier.wait();

        for index in 0..PER_THREAD {
          let key: u64 = thread_id * PER_THREAD + index;
          assert!(table.insert(key, !key).unwrap());
        }
      })
    })
    .collect();

  for thread in threads {
    thread.join().unwrap();
  }

  assert_eq!(table.len(), THREADS * PER_THREAD as usize);

  for key in 0..(THREADS as u64 * PER_THREAD) {
    assert_eq!(table.get(&key), Some(!key));
  }
}

// Scenario: writers increment shared counters while the key set is small
// enough that every bucket stays contended.
// Expected: no increment is lost.
#[test]
fn contended_counters_add_up() {
  const KEYS: u64 = 97;
  const ROUNDS: u64 = 10_000;

  let table: Arc<CTab<u64, u64>> = Arc::new(CTab::new());
  let barrier: Arc<Barrier> = Arc::new(Barrier::new(THREADS));

  let threads: Vec<JoinHandle<()>> = (0..THREADS as u64)
    .map(|thread_id| {
      let table: Arc<CTab<u64, u64>> = Arc::clone(&table);
      let barrier: Arc<Barrier> = Arc::clone(&barrier);

      thread::spawn(move || {
        barrier.wait();

        for round in 0..ROUNDS {
          let key: u64 = (thread_id + round) % KEYS;
          table.insert_or_visit(key, 1, |count| *count += 1).unwrap();
        }
      })
    })
    .collect();

  for thread in threads {
    thread.join().unwrap();
  }

  let view = table.lock();
  let total: u64 = view.iter().map(|(_, count)| count).sum();

  assert_eq!(total, THREADS as u64 * ROUNDS);
  assert_eq!(view.len(), KEYS as usize);
}

// Scenario: readers run against keys being concurrently inserted with
// deterministic values.
// Expected: a read sees either nothing or the correct value, never a torn
// or foreign one.
#[test]
fn readers_see_consistent_values() {
  const KEYS: u64 = 20_000;

  let table: Arc<CTab<u64, u64>> = Arc::new(CTab::with_capacity(16));
  let done: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));

  let readers: Vec<JoinHandle<()>> = (0..4)
    .map(|seed| {
      let table: Arc<CTab<u64, u64>> = Arc::clone(&table);
      let done: Arc<AtomicBool> = Arc::clone(&done);

      thread::spawn(move || {
        let mut rng: StdRng = StdRng::seed_from_u64(seed);

        while !done.load(Ordering::Acquire) {
          let key: u64 = rng.random_range(0..KEYS);

          if let Some(value) = table.get(&key) {
            assert_eq!(value, key.wrapping_mul(31));
          }
        }
      })
    })
    .collect();

  for key in 0..KEYS {
    table.insert(key, key.wrapping_mul(31)).unwrap();
  }

  done.store(true, Ordering::Release);

  for reader in readers {
    reader.join().unwrap();
  }

  assert_eq!(table.len(), KEYS as usize);
}

// Scenario: threads churn disjoint key ranges with interleaved inserts,
// updates, and removes (nodemap-style stress).
// Expected: each range ends in the state its own thread left it.
#[test]
fn churn_preserves_per_thread_state() {
  const PER_THREAD: u64 = 2_000;

  let table: Arc<CTab<u64, u64>> = Arc::new(CTab::with_capacity(64));
  let barrier: Arc<Barrier> = Arc::new(Barrier::new(THREADS));

  let threads: Vec<JoinHandle<()>> = (0..THREADS as u64)
    .map(|thread_id| {
      let table: Arc<CTab<u64, u64>> = Arc::clone(&table);
      let barrier: Arc<Barrier> = Arc::clone(&barrier);

      thread::spawn(move || {
        let base: u64 = thread_id * PER_THREAD;
        barrier.wait();

        for index in 0..PER_THREAD {
          let key: u64 = base + index;

          assert!(table.insert(key, 0).unwrap());
          assert!(table.update(&key, index));

          if index.is_multiple_of(3) {
            assert!(table.remove(&key));
          }
        }
      })
    })
    .collect();

  for thread in threads {
    thread.join().unwrap();
  }

  for thread_id in 0..THREADS as u64 {
    let base: u64 = thread_id * PER_THREAD;

    for index in 0..PER_THREAD {
      let expected: Option<u64> = if index.is_multiple_of(3) {
        None
      } else {
        Some(index)
      };

      assert_eq!(table.get(&(base + index)), expected);
    }
  }
}

// Scenario: a clear races with writers.
// Expected: the table ends with exactly the entries written after the
// clear's lock release, and every entry is intact.
#[test]
fn clear_under_concurrent_writes_is_coherent() {
  let table: Arc<CTab<u64, u64>> = Arc::new(CTab::new());
  let barrier: Arc<Barrier> = Arc::new(Barrier::new(2));

  let writer: JoinHandle<()> = {
    let table: Arc<CTab<u64, u64>> = Arc::clone(&table);
    let barrier: Arc<Barrier> = Arc::clone(&barrier);

    thread::spawn(move || {
      barrier.wait();

      for key in 0..10_000 {
        table.insert(key, key).unwrap();
      }
    })
  };

  barrier.wait();
  thread::sleep(Duration::from_millis(1));
  table.clear();
  writer.join().unwrap();

  // Whatever survived must be self-consistent.
  let view = table.lock();

  for (key, value) in view.iter() {
    assert_eq!(key, value);
  }

  assert_eq!(view.len(), view.iter().count());
}
