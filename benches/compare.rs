use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::DashMap;
use divan::Bencher;
use divan::bench;
use divan::bench_group;
use divan::black_box;
use divan::black_box_drop;
use foldhash::fast::RandomState;

type CTab = ctab::CTab<u64, u64, RandomState>;

const OPS: &[usize] = &[
  1 << 6,
  1 << 8,
  1 << 10,
  1 << 12,
  1 << 14,
  1 << 16,
];

const THREADS: &[usize] = &[0, 1, 4, 8];

// -----------------------------------------------------------------------------
// Unify APIs for Simplicity
// -----------------------------------------------------------------------------

trait Map: Sized + Send + Sync + 'static {
  fn new() -> Self;

  fn set(&self, key: u64, value: u64) -> bool;

  fn del(&self, key: u64) -> bool;

  fn get(&self, key: u64) -> Option<u64>;
}

impl Map for CTab {
  fn new() -> Self {
    ctab::CTab::with_hasher(RandomState::default())
  }

  fn set(&self, key: u64, value: u64) -> bool {
    self.insert(key, value).unwrap()
  }

  fn del(&self, key: u64) -> bool {
    self.remove(&key)
  }

  fn get(&self, key: u64) -> Option<u64> {
    ctab::CTab::get(self, &key)
  }
}

impl Map for DashMap<u64, u64, RandomState> {
  fn new() -> Self {
    DashMap::with_hasher(RandomState::default())
  }

  fn set(&self, key: u64, value: u64) -> bool {
    self.insert(key, value).is_none()
  }

  fn del(&self, key: u64) -> bool {
    self.remove(&key).is_some()
  }

  fn get(&self, key: u64) -> Option<u64> {
    self.get(&key).map(|value| *value)
  }
}

impl Map for Mutex<HashMap<u64, u64, RandomState>> {
  fn new() -> Self {
    Mutex::new(HashMap::with_hasher(RandomState::default()))
  }

  fn set(&self, key: u64, value: u64) -> bool {
    self.lock().unwrap().insert(key, value).is_none()
  }

  fn del(&self, key: u64) -> bool {
    self.lock().unwrap().remove(&key).is_some()
  }

  fn get(&self, key: u64) -> Option<u64> {
    self.lock().unwrap().get(&key).copied()
  }
}

// -----------------------------------------------------------------------------
// Actual Benchmarks
// -----------------------------------------------------------------------------

#[bench_group(name = "ReadSeq", skip_ext_time, threads = THREADS)]
mod read_seq {
  use super::bench;
  use super::*;

  fn bench<M>(bencher: Bencher<'_, '_>, ops: usize)
  where
    M: Map,
  {
    let this: M = M::new();

    for key in 0..ops as u64 {
      this.set(key, key);
    }

    bencher.counter(ops).bench(move || {
      for key in 0..ops as u64 {
        let item: Option<u64> = black_box(this.get(black_box(key)));
        _ = black_box(item.unwrap());
      }
    });
  }

  #[bench(args = OPS)]
  fn bench_ctab(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<CTab>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_dashmap(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<DashMap<u64, u64, RandomState>>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_mutex(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<Mutex<HashMap<u64, u64, RandomState>>>(bencher, ops);
  }
}

#[bench_group(name = "ReadHot", skip_ext_time, threads = THREADS)]
mod read_hot {
  use super::bench;
  use super::*;

  fn bench<M>(bencher: Bencher<'_, '_>, ops: usize)
  where
    M: Map,
  {
    let this: M = M::new();
    this.set(0, 42);

    bencher.counter(ops).bench(move || {
      for _ in 0..ops {
        let item: Option<u64> = black_box(this.get(black_box(0)));
        _ = black_box(item.unwrap());
      }
    });
  }

  #[bench(args = OPS)]
  fn bench_ctab(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<CTab>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_dashmap(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<DashMap<u64, u64, RandomState>>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_mutex(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<Mutex<HashMap<u64, u64, RandomState>>>(bencher, ops);
  }
}

#[bench_group(name = "InsertSeq", skip_ext_time)]
mod insert_seq {
  use super::bench;
  use super::*;

  fn bench<M>(bencher: Bencher<'_, '_>, ops: usize)
  where
    M: Map,
  {
    bencher
      .counter(ops)
      .with_inputs(M::new)
      .bench_local_refs(move |this: &mut M| {
        for key in 0..ops as u64 {
          let created: bool = black_box(this.set(black_box(key), key));
          _ = black_box(created);
        }
      });
  }

  #[bench(args = OPS)]
  fn bench_ctab(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<CTab>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_dashmap(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<DashMap<u64, u64, RandomState>>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_mutex(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<Mutex<HashMap<u64, u64, RandomState>>>(bencher, ops);
  }
}

#[bench_group(name = "Churn", skip_ext_time)]
mod churn {
  use super::bench;
  use super::*;

  fn bench<M>(bencher: Bencher<'_, '_>, ops: usize)
  where
    M: Map,
  {
    bencher
      .counter(ops)
      .with_inputs(M::new)
      .bench_local_refs(move |this: &mut M| {
        for key in 0..ops as u64 {
          let created: bool = black_box(this.set(black_box(key), key));
          let removed: bool = black_box(this.del(black_box(key)));
          _ = black_box(created && removed);
        }
      });
  }

  #[bench(args = OPS)]
  fn bench_ctab(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<CTab>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_dashmap(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<DashMap<u64, u64, RandomState>>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_mutex(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<Mutex<HashMap<u64, u64, RandomState>>>(bencher, ops);
  }
}

#[bench_group(name = "Drop", skip_ext_time)]
mod drop {
  use super::bench;
  use super::*;

  fn bench<M>(bencher: Bencher<'_, '_>, ops: usize)
  where
    M: Map,
  {
    bencher
      .counter(ops)
      .with_inputs(move || {
        let this: M = M::new();

        for key in 0..ops as u64 {
          this.set(key, key);
        }

        this
      })
      .bench_local_values(black_box_drop);
  }

  #[bench(args = OPS)]
  fn bench_ctab(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<CTab>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_dashmap(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<DashMap<u64, u64, RandomState>>(bencher, ops);
  }

  #[bench(args = OPS)]
  fn bench_mutex(bencher: Bencher<'_, '_>, ops: usize) {
    bench::<Mutex<HashMap<u64, u64, RandomState>>>(bencher, ops);
  }
}

// -----------------------------------------------------------------------------
// Main
// -----------------------------------------------------------------------------

fn main() {
  divan::main();
}
