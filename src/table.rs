use core::borrow::Borrow;
use core::cell::UnsafeCell;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::marker::PhantomData;
use core::ops::Range;
use std::thread;

use crate::bucket::Bucket;
use crate::bucket::BucketArray;
use crate::error::Error;
use crate::index::HashValue;
use crate::index::alternate_index;
use crate::index::hashsize;
use crate::index::primary_index;
use crate::index::reserve_calc;
use crate::locks::Generations;
use crate::locks::LockArray;
use crate::params::DEFAULT_MINIMUM_LOAD_FACTOR;
use crate::params::MAX_BFS_PATH_LEN;
use crate::params::MAX_STRIPES;
use crate::params::NO_MAXIMUM_HASHPOWER;
use crate::params::PARALLEL_MIGRATION_THRESHOLD;
use crate::search::Path;
use crate::search::PathNode;
use crate::search::PathQueue;
use crate::search::PathSlot;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::AtomicUsize;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Release;

// -----------------------------------------------------------------------------
// Lock Mode
// -----------------------------------------------------------------------------

/// Whether engine operations actually take stripe locks.
///
/// The whole-table view runs the same insert, lookup, and resize code as the
/// concurrent surface, but it already owns every stripe (or an exclusive
/// borrow), so its calls use [`Unlocked`] and every lock site compiles to
/// nothing.
pub(crate) trait LockMode: private::Sealed {
  const ENABLED: bool;
}

/// Stripe locks are taken and released normally.
pub(crate) struct Locked;

/// Lock sites are no-ops; the caller guarantees exclusivity.
pub(crate) struct Unlocked;

impl LockMode for Locked {
  const ENABLED: bool = true;
}

impl LockMode for Unlocked {
  const ENABLED: bool = false;
}

mod private {
  pub(crate) trait Sealed {}

  impl Sealed for super::Locked {}
  impl Sealed for super::Unlocked {}
}

// -----------------------------------------------------------------------------
// Engine Signals
// -----------------------------------------------------------------------------

/// The hashpower moved under us while acquiring locks; recompute and retry.
pub(crate) struct HashpowerChanged;

/// Where an insert-position search ended up.
pub(crate) enum InsertPos {
  /// An unoccupied slot ready to receive the new entry.
  Open { bucket: usize, slot: usize },
  /// The key is already present at this position.
  Duplicate { bucket: usize, slot: usize },
}

/// Result of probing one bucket for an insert.
enum InsertProbe {
  Duplicate(usize),
  Empty(usize),
  Full,
}

/// Result of the displacement phase.
enum RunCuckoo<'t, M>
where
  M: LockMode,
{
  /// A slot in one of the two original buckets is now free, and both
  /// original stripes are locked again.
  Freed {
    guard: TwoBuckets<'t, M>,
    bucket: usize,
    slot: usize,
  },
  /// No displacement path exists at this hashpower.
  Full,
  /// The table doubled while we were searching; start over.
  UnderExpansion,
}

/// Result of one full insert attempt under the two-bucket guard.
enum CuckooInsert<'t, M>
where
  M: LockMode,
{
  Done {
    position: InsertPos,
    guard: TwoBuckets<'t, M>,
  },
  Full,
  UnderExpansion,
}

/// Whether a validated resize should still run.
enum Validity {
  Proceed,
  Superseded,
}

// -----------------------------------------------------------------------------
// Lock Guards
// -----------------------------------------------------------------------------

/// Holds the stripe covering one bucket; releases on drop.
pub(crate) struct OneBucket<'t, M>
where
  M: LockMode,
{
  locks: Option<&'t LockArray>,
  bucket: usize,
  marker: PhantomData<M>,
}

impl<'t, M> OneBucket<'t, M>
where
  M: LockMode,
{
  #[inline]
  fn inert(bucket: usize) -> Self {
    Self {
      locks: None,
      bucket,
      marker: PhantomData,
    }
  }
}

impl<M> Drop for OneBucket<'_, M>
where
  M: LockMode,
{
  #[inline]
  fn drop(&mut self) {
    if let Some(locks) = self.locks.take() {
      locks.stripe(locks.stripe_of(self.bucket)).unlock();
    }
  }
}

/// Holds the stripes covering a key's two candidate buckets.
///
/// The guard remembers bucket indices, not stripe indices; unlocking
/// re-derives the stripes, collapsing to a single unlock when both buckets
/// share one.
pub(crate) struct TwoBuckets<'t, M>
where
  M: LockMode,
{
  locks: Option<&'t LockArray>,
  first: usize,
  second: usize,
  marker: PhantomData<M>,
}

impl<'t, M> TwoBuckets<'t, M>
where
  M: LockMode,
{
  #[inline]
  fn inert(first: usize, second: usize) -> Self {
    Self {
      locks: None,
      first,
      second,
      marker: PhantomData,
    }
  }

  #[inline]
  pub(crate) fn first(&self) -> usize {
    self.first
  }

  #[inline]
  pub(crate) fn second(&self) -> usize {
    self.second
  }

  /// Releases both stripes now instead of at drop.
  #[inline]
  fn unlock(&mut self) {
    if let Some(locks) = self.locks.take() {
      let first: usize = locks.stripe_of(self.first);
      let second: usize = locks.stripe_of(self.second);

      locks.stripe(first).unlock();

      if second != first {
        locks.stripe(second).unlock();
      }
    }
  }
}

impl<M> Drop for TwoBuckets<'_, M>
where
  M: LockMode,
{
  #[inline]
  fn drop(&mut self) {
    self.unlock();
  }
}

/// Holds every stripe of one or more whole generations; releases on drop.
///
/// Covers all generations published at drop time from `first_generation`
/// on, so stripes created (locked) by a growth step under this guard are
/// released together with the rest.
pub(crate) struct AllBuckets<'t, M>
where
  M: LockMode,
{
  generations: Option<&'t Generations>,
  first_generation: usize,
  marker: PhantomData<M>,
}

impl<'t, M> AllBuckets<'t, M>
where
  M: LockMode,
{
  #[inline]
  fn inert() -> Self {
    Self {
      generations: None,
      first_generation: 0,
      marker: PhantomData,
    }
  }
}

impl<M> Drop for AllBuckets<'_, M>
where
  M: LockMode,
{
  fn drop(&mut self) {
    if let Some(generations) = self.generations.take() {
      for index in self.first_generation..generations.len() {
        let locks: &LockArray = generations.get(index);

        for stripe in 0..locks.stripes() {
          locks.stripe(stripe).unlock();
        }
      }
    }
  }
}

// -----------------------------------------------------------------------------
// Table State
// -----------------------------------------------------------------------------

/// The table engine.
///
/// Bucket storage lives in an [`UnsafeCell`] and is replaced only while
/// every stripe of the current lock generation is held (or the holder has
/// exclusive access); slot contents are touched only under the covering
/// stripes. The hashpower every operation snapshots is the atomic here, not
/// the copy inside the array: reading it never dereferences the cell, so
/// it is always safe, and the acquire/release pairing with the store at the
/// end of a resize is what makes the snapshot-validate-retry protocol work.
pub(crate) struct Table<K, V, S, const B: usize> {
  hashpower: AtomicUsize,
  buckets: UnsafeCell<BucketArray<K, V, B>>,
  generations: Generations,
  hasher: S,
  minimum_load_factor: AtomicU64,
  maximum_hashpower: AtomicUsize,
}

impl<K, V, S, const B: usize> Table<K, V, S, B> {
  const SLOTS_POSITIVE: () = assert!(B > 0, "a bucket must have at least one slot");

  pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
    let () = Self::SLOTS_POSITIVE;

    let hashpower: usize = reserve_calc(capacity, B);
    let stripes: usize = hashsize(hashpower).min(MAX_STRIPES);

    Self {
      hashpower: AtomicUsize::new(hashpower),
      buckets: UnsafeCell::new(BucketArray::new(hashpower)),
      generations: Generations::new(LockArray::with_stripes(stripes)),
      hasher,
      minimum_load_factor: AtomicU64::new(DEFAULT_MINIMUM_LOAD_FACTOR.to_bits()),
      maximum_hashpower: AtomicUsize::new(NO_MAXIMUM_HASHPOWER),
    }
  }

  #[inline]
  pub(crate) fn hashpower(&self) -> usize {
    self.hashpower.load(Acquire)
  }

  #[inline]
  pub(crate) fn bucket_count(&self) -> usize {
    hashsize(self.hashpower())
  }

  #[inline]
  pub(crate) fn capacity(&self) -> usize {
    self.bucket_count() * B
  }

  /// Sums the current generation's stripe counters.
  ///
  /// Exact while every stripe is held (a resize or the locked view);
  /// otherwise an approximation that may miss in-flight operations.
  pub(crate) fn len(&self) -> usize {
    self.generations.current().total_elements()
  }

  #[inline]
  pub(crate) fn is_empty(&self) -> bool {
    self.len() == 0
  }

  #[inline]
  pub(crate) fn load_factor(&self) -> f64 {
    self.len() as f64 / self.capacity() as f64
  }

  #[inline]
  pub(crate) fn hasher(&self) -> &S {
    &self.hasher
  }

  #[inline]
  pub(crate) fn minimum_load_factor(&self) -> f64 {
    f64::from_bits(self.minimum_load_factor.load(Acquire))
  }

  pub(crate) fn set_minimum_load_factor(&self, factor: f64) {
    assert!(
      (0.0..=1.0).contains(&factor),
      "minimum load factor must lie in [0, 1]",
    );

    self.minimum_load_factor.store(factor.to_bits(), Release);
  }

  #[inline]
  pub(crate) fn maximum_hashpower(&self) -> Option<usize> {
    match self.maximum_hashpower.load(Acquire) {
      NO_MAXIMUM_HASHPOWER => None,
      maximum => Some(maximum),
    }
  }

  pub(crate) fn set_maximum_hashpower(&self, limit: Option<usize>) {
    let limit: usize = limit.unwrap_or(NO_MAXIMUM_HASHPOWER);

    assert!(
      self.hashpower() <= limit,
      "maximum hashpower is below the current hashpower",
    );

    self.maximum_hashpower.store(limit, Release);
  }

  /// Returns the bucket storage.
  ///
  /// # Safety
  ///
  /// The array must not be replaced for the reference's lifetime: the
  /// caller holds a stripe validated against the current hashpower, holds
  /// every stripe, or has exclusive access. Slot contents additionally
  /// require the covering stripes per [`BucketArray`]'s contracts.
  #[inline]
  pub(crate) unsafe fn buckets(&self) -> &BucketArray<K, V, B> {
    // SAFETY: Replacement only happens under all stripes of the current
    // generation, which excludes every caller satisfying the contract.
    unsafe { &*self.buckets.get() }
  }

  // ---------------------------------------------------------------------------
  // Locking Protocol
  // ---------------------------------------------------------------------------

  /// Locks the stripe covering `bucket`, failing if the hashpower moved
  /// after `hashpower` was snapshotted.
  fn lock_one<M>(
    &self,
    hashpower: usize,
    bucket: usize,
  ) -> Result<OneBucket<'_, M>, HashpowerChanged>
  where
    M: LockMode,
  {
    if !M::ENABLED {
      return Ok(OneBucket::inert(bucket));
    }

    let locks: &LockArray = self.generations.current();
    let stripe: usize = locks.stripe_of(bucket);

    locks.stripe(stripe).lock();

    if self.hashpower() != hashpower {
      locks.stripe(stripe).unlock();
      return Err(HashpowerChanged);
    }

    Ok(OneBucket {
      locks: Some(locks),
      bucket,
      marker: PhantomData,
    })
  }

  /// Locks the stripes covering two buckets in ascending stripe order,
  /// failing if the hashpower moved after it was snapshotted.
  fn lock_two<M>(
    &self,
    hashpower: usize,
    first: usize,
    second: usize,
  ) -> Result<TwoBuckets<'_, M>, HashpowerChanged>
  where
    M: LockMode,
  {
    if !M::ENABLED {
      return Ok(TwoBuckets::inert(first, second));
    }

    let locks: &LockArray = self.generations.current();
    let mut low: usize = locks.stripe_of(first);
    let mut high: usize = locks.stripe_of(second);

    if high < low {
      core::mem::swap(&mut low, &mut high);
    }

    locks.stripe(low).lock();

    if self.hashpower() != hashpower {
      locks.stripe(low).unlock();
      return Err(HashpowerChanged);
    }

    if high != low {
      locks.stripe(high).lock();
    }

    Ok(TwoBuckets {
      locks: Some(locks),
      first,
      second,
      marker: PhantomData,
    })
  }

  /// Locks the stripes covering three buckets in ascending stripe order.
  ///
  /// Returns the two-bucket guard for `(first, second)` plus an extra guard
  /// for `third` when its stripe is distinct from the other two.
  fn lock_three<M>(
    &self,
    hashpower: usize,
    first: usize,
    second: usize,
    third: usize,
  ) -> Result<(TwoBuckets<'_, M>, Option<OneBucket<'_, M>>), HashpowerChanged>
  where
    M: LockMode,
  {
    if !M::ENABLED {
      return Ok((TwoBuckets::inert(first, second), None));
    }

    let locks: &LockArray = self.generations.current();
    let mut order: [usize; 3] = [
      locks.stripe_of(first),
      locks.stripe_of(second),
      locks.stripe_of(third),
    ];

    order.sort_unstable();

    locks.stripe(order[0]).lock();

    if self.hashpower() != hashpower {
      locks.stripe(order[0]).unlock();
      return Err(HashpowerChanged);
    }

    if order[1] != order[0] {
      locks.stripe(order[1]).lock();
    }

    if order[2] != order[1] {
      locks.stripe(order[2]).lock();
    }

    let shared: bool = locks.stripe_of(third) == locks.stripe_of(first)
      || locks.stripe_of(third) == locks.stripe_of(second);

    let extra: Option<OneBucket<'_, M>> = if shared {
      None
    } else {
      Some(OneBucket {
        locks: Some(locks),
        bucket: third,
        marker: PhantomData,
      })
    };

    Ok((
      TwoBuckets {
        locks: Some(locks),
        first,
        second,
        marker: PhantomData,
      },
      extra,
    ))
  }

  /// Snapshots the hashpower, computes the key's two candidate buckets, and
  /// locks them, retrying until the hashpower holds still under the locks.
  fn snapshot_and_lock_two<M>(&self, hashed: HashValue) -> TwoBuckets<'_, M>
  where
    M: LockMode,
  {
    loop {
      let hashpower: usize = self.hashpower();
      let first: usize = primary_index(hashpower, hashed.hash);
      let second: usize = alternate_index(hashpower, hashed.partial, first);

      match self.lock_two::<M>(hashpower, first, second) {
        Ok(guard) => return guard,
        Err(HashpowerChanged) => continue,
      }
    }
  }

  /// Locks every stripe of every generation (or only the newest, for the
  /// doubling path), oldest to newest, ascending within each generation.
  ///
  /// Generations appended while we wait are locked too: an appender must
  /// have held every stripe of the previously-newest generation, so once
  /// the loop holds those, the list can no longer grow.
  pub(crate) fn lock_all<M>(&self, newest_only: bool) -> AllBuckets<'_, M>
  where
    M: LockMode,
  {
    if !M::ENABLED {
      return AllBuckets::inert();
    }

    let first_generation: usize = if newest_only {
      self.generations.len() - 1
    } else {
      0
    };

    let mut start: usize = first_generation;

    loop {
      let published: usize = self.generations.len();

      for index in start..published {
        let locks: &LockArray = self.generations.get(index);

        for stripe in 0..locks.stripes() {
          locks.stripe(stripe).lock();
        }
      }

      if self.generations.len() == published {
        break;
      }

      start = published;
    }

    AllBuckets {
      generations: Some(&self.generations),
      first_generation,
      marker: PhantomData,
    }
  }

  // ---------------------------------------------------------------------------
  // Counter-maintaining Mutations
  // ---------------------------------------------------------------------------

  /// Constructs an entry and bumps the covering stripe's counter.
  ///
  /// # Safety
  ///
  /// Same contract as [`BucketArray::set`].
  unsafe fn add_to_bucket(
    &self,
    buckets: &BucketArray<K, V, B>,
    bucket: usize,
    slot: usize,
    partial: u8,
    key: K,
    value: V,
  ) {
    // SAFETY: Forwarded caller contract.
    unsafe {
      buckets.set(bucket, slot, partial, key, value);
    }

    let locks: &LockArray = self.generations.current();
    locks.stripe(locks.stripe_of(bucket)).add_elements(1);
  }

  /// Destroys an entry and drops the covering stripe's counter.
  ///
  /// # Safety
  ///
  /// Same contract as [`BucketArray::erase`].
  unsafe fn del_from_bucket(&self, buckets: &BucketArray<K, V, B>, bucket: usize, slot: usize) {
    // SAFETY: Forwarded caller contract.
    unsafe {
      buckets.erase(bucket, slot);
    }

    let locks: &LockArray = self.generations.current();
    locks.stripe(locks.stripe_of(bucket)).sub_elements(1);
  }

  /// Relocates an entry between buckets, adjusting both stripes' counters.
  ///
  /// # Safety
  ///
  /// Same contract as [`BucketArray::move_slot`].
  unsafe fn move_element(
    &self,
    dst_bucket: usize,
    dst_slot: usize,
    src_bucket: usize,
    src_slot: usize,
  ) {
    // SAFETY: Forwarded caller contract; the array cannot be replaced while
    // the caller holds the covering stripes.
    unsafe {
      self
        .buckets()
        .move_slot(dst_bucket, dst_slot, src_bucket, src_slot);
    }

    let locks: &LockArray = self.generations.current();
    locks.stripe(locks.stripe_of(src_bucket)).sub_elements(1);
    locks.stripe(locks.stripe_of(dst_bucket)).add_elements(1);
  }

  /// Zeroes every stripe counter of the current generation.
  ///
  /// Only call with every stripe held or exclusive access.
  pub(crate) fn reset_counters(&self) {
    let locks: &LockArray = self.generations.current();

    for stripe in 0..locks.stripes() {
      locks.stripe(stripe).set_elements(0);
    }
  }

  /// Recomputes every stripe counter from the occupied flags.
  ///
  /// # Safety
  ///
  /// Every stripe must be held, or access otherwise exclusive.
  unsafe fn recount_elements(&self) {
    self.reset_counters();

    let locks: &LockArray = self.generations.current();

    // SAFETY: Exclusive access per the caller contract.
    unsafe {
      let buckets: &BucketArray<K, V, B> = self.buckets();

      for index in 0..buckets.bucket_count() {
        for slot in 0..B {
          if buckets.bucket(index).occupied(slot) {
            locks.stripe(locks.stripe_of(index)).add_elements(1);
          }
        }
      }
    }
  }

  /// Destroys every entry and zeroes the counters.
  pub(crate) fn clear<M>(&self)
  where
    M: LockMode,
  {
    let guard: AllBuckets<'_, M> = self.lock_all(false);

    // SAFETY: Every stripe is held (or access is exclusive).
    unsafe {
      self.buckets().clear();
    }

    self.reset_counters();
    drop(guard);
  }
}

// -----------------------------------------------------------------------------
// Point Operations
// -----------------------------------------------------------------------------

impl<K, V, S, const B: usize> Table<K, V, S, B>
where
  K: Hash + Eq,
  S: BuildHasher,
{
  #[inline]
  pub(crate) fn hashed_key<Q>(&self, key: &Q) -> HashValue
  where
    Q: Hash + ?Sized,
  {
    HashValue::new(self.hasher.hash_one(key) as usize)
  }

  /// Runs `f` against the key's value under the two-bucket guard.
  pub(crate) fn with_value<M, Q, F, R>(&self, key: &Q, f: F) -> Option<R>
  where
    M: LockMode,
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    F: FnOnce(&mut V) -> R,
  {
    let hashed: HashValue = self.hashed_key(key);
    let guard: TwoBuckets<'_, M> = self.snapshot_and_lock_two(hashed);

    // SAFETY: The guard holds both candidate stripes (or access is
    // exclusive), so the array is stable and the slot borrow is unique.
    unsafe {
      let buckets: &BucketArray<K, V, B> = self.buckets();

      match self.find_pos(buckets, guard.first(), guard.second(), hashed.partial, key) {
        Some((bucket, slot)) => Some(f(buckets.bucket(bucket).value_mut(slot))),
        None => None,
      }
    }
  }

  /// Removes the key's entry if `f` approves; returns whether it was found.
  pub(crate) fn remove_if<M, Q, F>(&self, key: &Q, f: F) -> bool
  where
    M: LockMode,
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    F: FnOnce(&mut V) -> bool,
  {
    let hashed: HashValue = self.hashed_key(key);
    let guard: TwoBuckets<'_, M> = self.snapshot_and_lock_two(hashed);

    // SAFETY: As in `with_value`.
    unsafe {
      let buckets: &BucketArray<K, V, B> = self.buckets();

      match self.find_pos(buckets, guard.first(), guard.second(), hashed.partial, key) {
        Some((bucket, slot)) => {
          if f(buckets.bucket(bucket).value_mut(slot)) {
            self.del_from_bucket(buckets, bucket, slot);
          }

          true
        }
        None => false,
      }
    }
  }

  /// Inserts `(key, value)`; on a duplicate, hands the existing value and
  /// the rejected new value to `on_duplicate` under the bucket lock.
  ///
  /// Returns `Ok(true)` when a new entry was created.
  pub(crate) fn insert_with<M, F>(
    &self,
    key: K,
    value: V,
    retain_new_stripes: bool,
    on_duplicate: F,
  ) -> Result<bool, Error>
  where
    M: LockMode,
    K: Send,
    V: Send,
    S: Sync,
    F: FnOnce(&mut V, V),
  {
    let hashed: HashValue = self.hashed_key(&key);
    let guard: TwoBuckets<'_, M> = self.snapshot_and_lock_two(hashed);
    let (position, guard) = self.insert_loop(hashed, guard, &key, retain_new_stripes)?;

    // SAFETY: `guard` holds both candidate stripes (or access is
    // exclusive); open slots were verified unoccupied under it.
    unsafe {
      let buckets: &BucketArray<K, V, B> = self.buckets();

      let created: bool = match position {
        InsertPos::Open { bucket, slot } => {
          self.add_to_bucket(buckets, bucket, slot, hashed.partial, key, value);
          true
        }
        InsertPos::Duplicate { bucket, slot } => {
          on_duplicate(buckets.bucket(bucket).value_mut(slot), value);
          false
        }
      };

      drop(guard);
      Ok(created)
    }
  }

  /// Retries [`cuckoo_insert`](Self::cuckoo_insert) until it lands,
  /// doubling the table whenever a displacement search reports it full.
  fn insert_loop<'t, M>(
    &'t self,
    hashed: HashValue,
    mut guard: TwoBuckets<'t, M>,
    key: &K,
    retain_new_stripes: bool,
  ) -> Result<(InsertPos, TwoBuckets<'t, M>), Error>
  where
    M: LockMode,
    K: Send,
    V: Send,
    S: Sync,
  {
    loop {
      let hashpower: usize = self.hashpower();

      guard = match self.cuckoo_insert(hashed, guard, key) {
        CuckooInsert::Done { position, guard } => return Ok((position, guard)),
        CuckooInsert::Full => {
          self.fast_double::<M>(hashpower, true, retain_new_stripes)?;
          self.snapshot_and_lock_two(hashed)
        }
        CuckooInsert::UnderExpansion => self.snapshot_and_lock_two(hashed),
      };
    }
  }

  /// One insert attempt: probe both buckets for a duplicate or an open
  /// slot, then fall back to displacement.
  fn cuckoo_insert<'t, M>(
    &'t self,
    hashed: HashValue,
    guard: TwoBuckets<'t, M>,
    key: &K,
  ) -> CuckooInsert<'t, M>
  where
    M: LockMode,
  {
    // SAFETY: The guard holds both candidate stripes.
    unsafe {
      let buckets: &BucketArray<K, V, B> = self.buckets();

      let first: InsertProbe =
        Self::probe_insert(buckets.bucket(guard.first()), hashed.partial, key);

      if let InsertProbe::Duplicate(slot) = first {
        return CuckooInsert::Done {
          position: InsertPos::Duplicate {
            bucket: guard.first(),
            slot,
          },
          guard,
        };
      }

      let second: InsertProbe =
        Self::probe_insert(buckets.bucket(guard.second()), hashed.partial, key);

      if let InsertProbe::Duplicate(slot) = second {
        return CuckooInsert::Done {
          position: InsertPos::Duplicate {
            bucket: guard.second(),
            slot,
          },
          guard,
        };
      }

      if let InsertProbe::Empty(slot) = first {
        return CuckooInsert::Done {
          position: InsertPos::Open {
            bucket: guard.first(),
            slot,
          },
          guard,
        };
      }

      if let InsertProbe::Empty(slot) = second {
        return CuckooInsert::Done {
          position: InsertPos::Open {
            bucket: guard.second(),
            slot,
          },
          guard,
        };
      }
    }

    // Both buckets are full; displace something.
    match self.run_cuckoo(guard) {
      RunCuckoo::Freed {
        guard,
        bucket,
        slot,
      } => {
        // The buckets were unlocked during the search, so another thread
        // may have inserted this key in the meantime; re-probe before
        // using the freed slot.
        //
        // SAFETY: `guard` holds both candidate stripes again.
        unsafe {
          let buckets: &BucketArray<K, V, B> = self.buckets();

          if let Some((bucket, slot)) =
            self.find_pos(buckets, guard.first(), guard.second(), hashed.partial, key)
          {
            return CuckooInsert::Done {
              position: InsertPos::Duplicate { bucket, slot },
              guard,
            };
          }

          debug_assert!(!buckets.bucket(bucket).occupied(slot));
        }

        CuckooInsert::Done {
          position: InsertPos::Open { bucket, slot },
          guard,
        }
      }
      RunCuckoo::Full => CuckooInsert::Full,
      RunCuckoo::UnderExpansion => CuckooInsert::UnderExpansion,
    }
  }

  /// The displacement phase: search for a path, move entries along it, and
  /// re-lock the two original buckets around the freed slot.
  ///
  /// The guard is released up front so the search and the move can lock
  /// buckets in their own order without deadlocking; the move's final step
  /// re-acquires both original stripes and leaves them held on success.
  fn run_cuckoo<'t, M>(&'t self, mut guard: TwoBuckets<'t, M>) -> RunCuckoo<'t, M>
  where
    M: LockMode,
  {
    let hashpower: usize = self.hashpower();
    let first: usize = guard.first();
    let second: usize = guard.second();

    guard.unlock();
    drop(guard);

    loop {
      let mut path: Path = [PathNode::default(); MAX_BFS_PATH_LEN];

      let depth: usize = match self.path_search::<M>(hashpower, &mut path, first, second) {
        Err(HashpowerChanged) => return RunCuckoo::UnderExpansion,
        Ok(None) => return RunCuckoo::Full,
        Ok(Some(depth)) => depth,
      };

      match self.path_move::<M>(hashpower, &path, depth, first, second) {
        Err(HashpowerChanged) => return RunCuckoo::UnderExpansion,
        Ok(Some(guard)) => {
          return RunCuckoo::Freed {
            bucket: path[0].bucket,
            slot: path[0].slot,
            guard,
          };
        }
        // Scooped by a concurrent operation; search again.
        Ok(None) => continue,
      }
    }
  }

  /// Breadth-first search for a displacement path ending in an empty slot.
  ///
  /// Each dequeued step locks its bucket just long enough to scan the `B`
  /// slots; no lock is held across queue operations, so the discovered path
  /// may be stale by the time it is walked and the move re-validates.
  fn slot_search<M>(
    &self,
    hashpower: usize,
    first: usize,
    second: usize,
  ) -> Result<Option<PathSlot>, HashpowerChanged>
  where
    M: LockMode,
  {
    let mut queue: PathQueue<B> = PathQueue::new();

    // The initial pathcodes record which starting bucket a path began from.
    queue.enqueue(PathSlot::new(first, 0, 0));
    queue.enqueue(PathSlot::new(second, 1, 0));

    while !queue.full() && !queue.empty() {
      let mut step: PathSlot = queue.dequeue();
      let guard: OneBucket<'_, M> = self.lock_one(hashpower, step.bucket)?;

      // SAFETY: The guard holds the stripe covering `step.bucket`.
      unsafe {
        let bucket: &Bucket<K, V, B> = self.buckets().bucket(step.bucket);

        // Pick a pseudo-random slot to start from.
        let starting: usize = step.pathcode % B;

        for offset in 0..B {
          if queue.full() {
            break;
          }

          let slot: usize = (starting + offset) % B;

          if !bucket.occupied(slot) {
            step.pathcode = step.pathcode * B + slot;
            return Ok(Some(step));
          }

          if (step.depth as usize) < MAX_BFS_PATH_LEN - 1 {
            queue.enqueue(PathSlot::new(
              alternate_index(hashpower, bucket.partial(slot), step.bucket),
              step.pathcode * B + slot,
              step.depth + 1,
            ));
          }
        }
      }

      drop(guard);
    }

    Ok(None)
  }

  /// Expands a successful search into concrete path steps, recording the
  /// hash of each entry to be displaced for later re-validation.
  fn path_search<M>(
    &self,
    hashpower: usize,
    path: &mut Path,
    first: usize,
    second: usize,
  ) -> Result<Option<usize>, HashpowerChanged>
  where
    M: LockMode,
  {
    let found: PathSlot = match self.slot_search::<M>(hashpower, first, second)? {
      Some(found) => found,
      None => return Ok(None),
    };

    // Peel the slot digits off the pathcode, end to start.
    let depth: usize = found.depth as usize;
    let mut pathcode: usize = found.pathcode;

    for index in (0..=depth).rev() {
      path[index].slot = pathcode % B;
      pathcode /= B;
    }

    // What remains is the starting-bucket marker.
    path[0].bucket = if pathcode == 0 {
      first
    } else {
      debug_assert!(pathcode == 1);
      second
    };

    {
      let guard: OneBucket<'_, M> = self.lock_one(hashpower, path[0].bucket)?;

      // SAFETY: The guard holds the covering stripe.
      unsafe {
        let bucket: &Bucket<K, V, B> = self.buckets().bucket(path[0].bucket);

        if !bucket.occupied(path[0].slot) {
          // The slot emptied since the search; the path is trivially done.
          return Ok(Some(0));
        }

        let hashed: HashValue = self.hashed_key(bucket.key(path[0].slot));
        path[0].hash = hashed.hash;
        path[0].partial = hashed.partial;
      }

      drop(guard);
    }

    for index in 1..=depth {
      let previous: PathNode = path[index - 1];

      path[index].bucket = alternate_index(hashpower, previous.partial, previous.bucket);

      let guard: OneBucket<'_, M> = self.lock_one(hashpower, path[index].bucket)?;

      // SAFETY: The guard holds the covering stripe.
      unsafe {
        let bucket: &Bucket<K, V, B> = self.buckets().bucket(path[index].bucket);

        if !bucket.occupied(path[index].slot) {
          return Ok(Some(index));
        }

        let hashed: HashValue = self.hashed_key(bucket.key(path[index].slot));
        path[index].hash = hashed.hash;
        path[index].partial = hashed.partial;
      }

      drop(guard);
    }

    Ok(Some(depth))
  }

  /// Walks the path backwards, shifting each entry into the next slot.
  ///
  /// Every hop re-validates under fresh locks: the source must still hold
  /// an entry with the recorded hash and the destination must still be
  /// empty, since concurrent operations may have rearranged anything while
  /// no locks were held. On success the two original buckets are locked and
  /// `path[0]`'s slot is empty; on a validation miss everything is released
  /// and the caller searches again.
  fn path_move<M>(
    &self,
    hashpower: usize,
    path: &Path,
    depth: usize,
    first: usize,
    second: usize,
  ) -> Result<Option<TwoBuckets<'_, M>>, HashpowerChanged>
  where
    M: LockMode,
  {
    if depth == 0 {
      // The "path" is just an empty slot already in one of the two insert
      // buckets; re-lock them and confirm it stayed empty.
      let bucket: usize = path[0].bucket;
      debug_assert!(bucket == first || bucket == second);

      let guard: TwoBuckets<'_, M> = self.lock_two(hashpower, first, second)?;

      // SAFETY: The guard holds both stripes.
      let still_empty: bool = unsafe { !self.buckets().bucket(bucket).occupied(path[0].slot) };

      if still_empty {
        return Ok(Some(guard));
      }

      return Ok(None);
    }

    let mut depth: usize = depth;

    while depth > 0 {
      let from: PathNode = path[depth - 1];
      let to: PathNode = path[depth];

      // The final hop must leave both original insert buckets locked, so
      // it acquires all three up front.
      let (guard, extra): (TwoBuckets<'_, M>, Option<OneBucket<'_, M>>) = if depth == 1 {
        self.lock_three(hashpower, first, second, to.bucket)?
      } else {
        (self.lock_two(hashpower, from.bucket, to.bucket)?, None)
      };

      // SAFETY: The guards hold the stripes covering both path buckets.
      let valid: bool = unsafe {
        let buckets: &BucketArray<K, V, B> = self.buckets();
        let from_bucket: &Bucket<K, V, B> = buckets.bucket(from.bucket);
        let to_bucket: &Bucket<K, V, B> = buckets.bucket(to.bucket);

        // Matching the hash is enough: two keys with equal hashes share
        // both candidate buckets, so the path stays coherent either way.
        from_bucket.occupied(from.slot)
          && !to_bucket.occupied(to.slot)
          && self.hashed_key(from_bucket.key(from.slot)).hash == from.hash
      };

      if !valid {
        return Ok(None);
      }

      // SAFETY: As above; the move's preconditions were just validated.
      unsafe {
        self.move_element(to.bucket, to.slot, from.bucket, from.slot);
      }

      drop(extra);

      if depth == 1 {
        return Ok(Some(guard));
      }

      drop(guard);
      depth -= 1;
    }

    unreachable!("the displacement walk always returns from its final hop");
  }

  // ---------------------------------------------------------------------------
  // Probing
  // ---------------------------------------------------------------------------

  /// Searches the key's two candidate buckets, probing once when they
  /// coincide.
  ///
  /// # Safety
  ///
  /// The stripes covering both buckets must be held.
  pub(crate) unsafe fn find_pos<Q>(
    &self,
    buckets: &BucketArray<K, V, B>,
    first: usize,
    second: usize,
    partial: u8,
    key: &Q,
  ) -> Option<(usize, usize)>
  where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
  {
    // SAFETY: Forwarded caller contract.
    unsafe {
      if let Some(slot) = Self::find_slot(buckets.bucket(first), partial, key) {
        return Some((first, slot));
      }

      if first != second
        && let Some(slot) = Self::find_slot(buckets.bucket(second), partial, key)
      {
        return Some((second, slot));
      }
    }

    None
  }

  /// Scans one bucket for the key, filtering on the partial tag before
  /// paying for a full comparison. Equal keys always carry equal tags, so
  /// the filter never misses; distinct keys may share a tag and are
  /// rejected by the comparison.
  ///
  /// # Safety
  ///
  /// The covering stripe must be held.
  unsafe fn find_slot<Q>(bucket: &Bucket<K, V, B>, partial: u8, key: &Q) -> Option<usize>
  where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
  {
    for slot in 0..B {
      // SAFETY: Forwarded caller contract.
      unsafe {
        if !bucket.occupied(slot) || bucket.partial(slot) != partial {
          continue;
        }

        if bucket.key(slot).borrow() == key {
          return Some(slot);
        }
      }
    }

    None
  }

  /// Scans one bucket for an insert position: a duplicate wins over an
  /// empty slot, and the first empty slot is remembered.
  ///
  /// # Safety
  ///
  /// The covering stripe must be held.
  unsafe fn probe_insert(bucket: &Bucket<K, V, B>, partial: u8, key: &K) -> InsertProbe {
    let mut empty: Option<usize> = None;

    for slot in 0..B {
      // SAFETY: Forwarded caller contract.
      unsafe {
        if bucket.occupied(slot) {
          if bucket.partial(slot) != partial {
            continue;
          }

          if bucket.key(slot) == key {
            return InsertProbe::Duplicate(slot);
          }
        } else if empty.is_none() {
          empty = Some(slot);
        }
      }
    }

    match empty {
      Some(slot) => InsertProbe::Empty(slot),
      None => InsertProbe::Full,
    }
  }

  // ---------------------------------------------------------------------------
  // Resize Engines
  // ---------------------------------------------------------------------------

  /// Validates a prospective resize against the configured limits.
  fn check_resize(&self, original: usize, target: usize, automatic: bool) -> Result<Validity, Error> {
    if let Some(maximum) = self.maximum_hashpower()
      && target > maximum
    {
      return Err(Error::MaximumHashpowerExceeded { hashpower: target });
    }

    if automatic {
      let load_factor: f64 = self.load_factor();

      if load_factor < self.minimum_load_factor() {
        return Err(Error::LoadFactorTooLow { load_factor });
      }
    }

    if self.hashpower() != original {
      // Another thread grew the table before we took the locks.
      return Ok(Validity::Superseded);
    }

    Ok(Validity::Proceed)
  }

  /// Doubles the table in place.
  ///
  /// Doubling adds exactly one bit to every bucket index, so each entry
  /// either keeps its bucket or moves to `bucket + 2^old_hashpower` in the
  /// new array, with no displacement search needed. Migration fans out
  /// over worker threads for large tables.
  pub(crate) fn fast_double<M>(
    &self,
    original: usize,
    automatic: bool,
    retain_new_stripes: bool,
  ) -> Result<(), Error>
  where
    M: LockMode,
    K: Send,
    V: Send,
    S: Sync,
  {
    let target: usize = original + 1;
    let guard: AllBuckets<'_, M> = self.lock_all(true);

    match self.check_resize(original, target, automatic)? {
      Validity::Superseded => return Ok(()),
      Validity::Proceed => {}
    }

    let fresh: BucketArray<K, V, B> = BucketArray::new(target);

    // SAFETY: Every stripe of the current generation is held (or access is
    // exclusive), so migration has the whole array to itself.
    unsafe {
      let old: &BucketArray<K, V, B> = self.buckets();
      migrate_buckets(old, &fresh, &self.hasher);
    }

    self.grow_locks_if_needed(hashsize(target), M::ENABLED || retain_new_stripes);

    // SAFETY: As above; migration drained the old array, and no reference
    // into it outlives the unsafe block above.
    unsafe {
      *self.buckets.get() = fresh;
    }

    self.hashpower.store(target, Release);

    drop(guard);
    Ok(())
  }

  /// Rebuilds the table at (at least) the requested hashpower by draining
  /// every entry into a fresh array through the normal placement path.
  ///
  /// Unlike the doubling path this may shrink; if the requested hashpower
  /// cannot hold the current entries, or placement runs out of room, the
  /// target grows until everything fits. Returns `Ok(false)` when a
  /// concurrent resize got there first.
  pub(crate) fn expand_simple<M>(
    &self,
    requested: usize,
    automatic: bool,
    retain_new_stripes: bool,
  ) -> Result<bool, Error>
  where
    M: LockMode,
  {
    let guard: AllBuckets<'_, M> = self.lock_all(false);
    let original: usize = self.hashpower();

    match self.check_resize(original, requested, automatic)? {
      Validity::Superseded => return Ok(false),
      Validity::Proceed => {}
    }

    let occupied: usize = self.len();
    let mut target: usize = requested.max(reserve_calc(occupied, B));

    if let Some(maximum) = self.maximum_hashpower()
      && target > maximum
    {
      return Err(Error::MaximumHashpowerExceeded { hashpower: target });
    }

    // SAFETY: Every stripe of every generation is held (or access is
    // exclusive) for the rest of the function.
    unsafe {
      let old: &BucketArray<K, V, B> = self.buckets();
      let mut fresh: BucketArray<K, V, B> = BucketArray::new(target);

      for index in 0..old.bucket_count() {
        for slot in 0..B {
          if !old.bucket(index).occupied(slot) {
            continue;
          }

          let (mut key, mut value): (K, V) = old.take(index, slot);
          let hashed: HashValue = self.hashed_key(&key);

          loop {
            match place_entry(&fresh, hashed, key, value) {
              Ok(()) => break,
              Err(entry) => {
                // Even the rebuild target is too small (possible when
                // shrinking, or just unlucky); double it and retry.
                target += 1;

                if let Some(maximum) = self.maximum_hashpower()
                  && target > maximum
                {
                  // Entries already drained into `fresh` are lost with it;
                  // bring the counters back in line with what remains.
                  self.recount_elements();
                  return Err(Error::MaximumHashpowerExceeded { hashpower: target });
                }

                let bigger: BucketArray<K, V, B> = BucketArray::new(target);
                migrate_range(&fresh, &bigger, &self.hasher, 0..fresh.bucket_count());
                fresh = bigger;

                key = entry.0;
                value = entry.1;
              }
            }
          }
        }
      }

      self.grow_locks_if_needed(hashsize(target), M::ENABLED || retain_new_stripes);

      // No reference into the drained old array survives this point.
      *self.buckets.get() = fresh;
    }

    // SAFETY: Exclusive access; counters are rebuilt from the new array.
    unsafe {
      self.recount_elements();
    }

    self.hashpower.store(target, Release);

    drop(guard);
    Ok(true)
  }

  /// Publishes a bigger lock generation when the bucket count outgrows the
  /// current stripe count.
  ///
  /// The new stripes start locked whenever the caller holds (and will
  /// release) an all-stripes guard, so no operation can slip in through the
  /// new generation before the resize finishes. Counters carry over
  /// index-for-index; only their sum is meaningful across the change.
  fn grow_locks_if_needed(&self, new_bucket_count: usize, lock_new_stripes: bool) {
    let current: &LockArray = self.generations.current();
    let target: usize = new_bucket_count.min(MAX_STRIPES);

    if current.stripes() >= target {
      return;
    }

    let fresh: LockArray = LockArray::with_stripes(target);

    if lock_new_stripes {
      for stripe in 0..target {
        let acquired: bool = fresh.stripe(stripe).try_lock();
        debug_assert!(acquired, "freshly allocated stripes cannot be contended");
      }
    }

    for stripe in 0..current.stripes() {
      fresh.stripe(stripe).set_elements(current.stripe(stripe).elements());
    }

    self.generations.push(fresh);
  }
}

// -----------------------------------------------------------------------------
// Migration
// -----------------------------------------------------------------------------

/// The two arrays a doubling migration moves entries between.
///
/// Workers share this by reference; each touches a disjoint range of old
/// buckets and the disjoint pair of new buckets that range maps to.
struct MigrationShared<'a, K, V, const B: usize> {
  old: &'a BucketArray<K, V, B>,
  new: &'a BucketArray<K, V, B>,
}

// SAFETY: Workers only move entries (requiring `K: Send`, `V: Send`) and
// operate on disjoint slots, so sharing the wrapper across threads is safe.
unsafe impl<K, V, const B: usize> Sync for MigrationShared<'_, K, V, B>
where
  K: Send,
  V: Send,
{
}

/// Moves every entry of `old` into `new`, which must have exactly one more
/// hashpower bit, splitting the bucket range over worker threads when the
/// table is big enough to be worth it.
///
/// # Safety
///
/// The caller must have exclusive access to both arrays.
unsafe fn migrate_buckets<K, V, S, const B: usize>(
  old: &BucketArray<K, V, B>,
  new: &BucketArray<K, V, B>,
  hasher: &S,
) where
  K: Hash + Send,
  V: Send,
  S: BuildHasher + Sync,
{
  let total: usize = old.bucket_count();

  let workers: usize = if cfg!(loom) || total <= PARALLEL_MIGRATION_THRESHOLD {
    1
  } else {
    thread::available_parallelism().map_or(1, |count| count.get())
  };

  if workers <= 1 {
    // SAFETY: Forwarded caller contract.
    unsafe {
      migrate_range(old, new, hasher, 0..total);
    }

    return;
  }

  let shared: MigrationShared<'_, K, V, B> = MigrationShared { old, new };
  let chunk: usize = total.div_ceil(workers);

  thread::scope(|scope| {
    for worker in 0..workers {
      let start: usize = worker * chunk;
      let end: usize = ((worker + 1) * chunk).min(total);

      if start >= end {
        break;
      }

      let shared: &MigrationShared<'_, K, V, B> = &shared;

      scope.spawn(move || {
        // SAFETY: Ranges partition the old buckets, and the new positions
        // derived from disjoint old buckets are disjoint, so no two
        // workers touch the same slot.
        unsafe {
          migrate_range(shared.old, shared.new, hasher, start..end);
        }
      });
    }
  });
}

/// Moves the entries of `old[range]` into `new` under the stay-or-shift
/// rule: with one hashpower bit added, an entry either keeps its bucket
/// index or lands exactly `2^old_hashpower` above it.
///
/// # Safety
///
/// The caller must have exclusive access to `old[range]` and to the new
/// buckets it maps to (`range` and `range + 2^old_hashpower`).
unsafe fn migrate_range<K, V, S, const B: usize>(
  old: &BucketArray<K, V, B>,
  new: &BucketArray<K, V, B>,
  hasher: &S,
  range: Range<usize>,
) where
  K: Hash,
  S: BuildHasher,
{
  let old_hashpower: usize = old.hashpower();
  let new_hashpower: usize = new.hashpower();

  debug_assert!(new_hashpower == old_hashpower + 1);

  for old_index in range {
    let shifted_index: usize = old_index + hashsize(old_hashpower);
    let mut shifted_slot: usize = 0;

    for slot in 0..B {
      // SAFETY: Exclusive access per the caller contract.
      unsafe {
        let bucket: &Bucket<K, V, B> = old.bucket(old_index);

        if !bucket.occupied(slot) {
          continue;
        }

        // The partial is re-derived rather than copied; it is a pure
        // function of the hash, so this is the same value.
        let hashed: HashValue = HashValue::new(hasher.hash_one(bucket.key(slot)) as usize);

        let old_first: usize = primary_index(old_hashpower, hashed.hash);
        let old_second: usize = alternate_index(old_hashpower, hashed.partial, old_first);
        let new_first: usize = primary_index(new_hashpower, hashed.hash);
        let new_second: usize = alternate_index(new_hashpower, hashed.partial, new_first);

        let moves_up: bool = (old_index == old_first && new_first == shifted_index)
          || (old_index == old_second && new_second == shifted_index);

        let (dst_index, dst_slot): (usize, usize) = if moves_up {
          let destination: (usize, usize) = (shifted_index, shifted_slot);
          shifted_slot += 1;
          destination
        } else {
          debug_assert!(
            (old_index == old_first && new_first == old_index)
              || (old_index == old_second && new_second == old_index),
          );

          (old_index, slot)
        };

        let (key, value): (K, V) = old.take(old_index, slot);
        new.set(dst_index, dst_slot, hashed.partial, key, value);
      }
    }
  }
}

// -----------------------------------------------------------------------------
// Rebuild Placement
// -----------------------------------------------------------------------------

/// Places one entry into a private array, displacing residents if needed.
///
/// This is the rebuild's single-threaded placement path: no locks, no
/// re-validation, and displacement hops derive the alternate bucket from
/// the stored partial tags alone. Hands the entry back if no path exists.
///
/// # Safety
///
/// The caller must have exclusive access to `array`.
unsafe fn place_entry<K, V, const B: usize>(
  array: &BucketArray<K, V, B>,
  hashed: HashValue,
  key: K,
  value: V,
) -> Result<(), (K, V)> {
  let hashpower: usize = array.hashpower();
  let first: usize = primary_index(hashpower, hashed.hash);
  let second: usize = alternate_index(hashpower, hashed.partial, first);

  // SAFETY: Exclusive access per the caller contract.
  unsafe {
    for index in [first, second] {
      for slot in 0..B {
        if !array.bucket(index).occupied(slot) {
          array.set(index, slot, hashed.partial, key, value);
          return Ok(());
        }
      }
    }

    match rebuild_search(array, first, second) {
      Some((path, depth)) => {
        for index in (1..=depth).rev() {
          array.move_slot(
            path[index].bucket,
            path[index].slot,
            path[index - 1].bucket,
            path[index - 1].slot,
          );
        }

        array.set(path[0].bucket, path[0].slot, hashed.partial, key, value);
        Ok(())
      }
      None => Err((key, value)),
    }
  }
}

/// Breadth-first displacement search over a private array.
///
/// # Safety
///
/// The caller must have exclusive access to `array`.
unsafe fn rebuild_search<K, V, const B: usize>(
  array: &BucketArray<K, V, B>,
  first: usize,
  second: usize,
) -> Option<(Path, usize)> {
  let hashpower: usize = array.hashpower();
  let mut queue: PathQueue<B> = PathQueue::new();

  queue.enqueue(PathSlot::new(first, 0, 0));
  queue.enqueue(PathSlot::new(second, 1, 0));

  while !queue.full() && !queue.empty() {
    let mut step: PathSlot = queue.dequeue();

    // SAFETY: Exclusive access per the caller contract.
    unsafe {
      let bucket: &Bucket<K, V, B> = array.bucket(step.bucket);
      let starting: usize = step.pathcode % B;

      for offset in 0..B {
        if queue.full() {
          break;
        }

        let slot: usize = (starting + offset) % B;

        if !bucket.occupied(slot) {
          step.pathcode = step.pathcode * B + slot;
          return Some(decode_rebuild_path(array, step, first, second));
        }

        if (step.depth as usize) < MAX_BFS_PATH_LEN - 1 {
          queue.enqueue(PathSlot::new(
            alternate_index(hashpower, bucket.partial(slot), step.bucket),
            step.pathcode * B + slot,
            step.depth + 1,
          ));
        }
      }
    }
  }

  None
}

/// Decodes a successful rebuild search into concrete steps, deriving each
/// hop's bucket from the stored partial of the entry about to be displaced.
///
/// # Safety
///
/// The caller must have exclusive access to `array`, and every slot on the
/// path except the last must be occupied (guaranteed: nothing mutates the
/// array between search and decode).
unsafe fn decode_rebuild_path<K, V, const B: usize>(
  array: &BucketArray<K, V, B>,
  found: PathSlot,
  first: usize,
  second: usize,
) -> (Path, usize) {
  let hashpower: usize = array.hashpower();
  let depth: usize = found.depth as usize;
  let mut path: Path = [PathNode::default(); MAX_BFS_PATH_LEN];
  let mut pathcode: usize = found.pathcode;

  for index in (0..=depth).rev() {
    path[index].slot = pathcode % B;
    pathcode /= B;
  }

  path[0].bucket = if pathcode == 0 { first } else { second };

  for index in 1..=depth {
    let previous: PathNode = path[index - 1];

    // SAFETY: Exclusive access; the slot is occupied per the contract.
    let partial: u8 = unsafe { array.bucket(previous.bucket).partial(previous.slot) };

    path[index].bucket = alternate_index(hashpower, partial, previous.bucket);
  }

  (path, depth)
}

// -----------------------------------------------------------------------------
// Send / Sync
// -----------------------------------------------------------------------------

// SAFETY:
// - The table owns its entries; transferring it moves them, so `K: Send`
//   and `V: Send` suffice alongside the hasher being sendable.
unsafe impl<K, V, S, const B: usize> Send for Table<K, V, S, B>
where
  K: Send,
  V: Send,
  S: Send,
{
}

// SAFETY:
// - Slot state is only touched under stripe locks (or exclusive access),
//   and the array pointer only changes under every stripe.
// - Shared handles can insert and remove from any thread, moving keys and
//   values across threads (`Send`) and reading them from several (`Sync`).
// - The hasher is shared by every operation (`S: Sync`).
unsafe impl<K, V, S, const B: usize> Sync for Table<K, V, S, B>
where
  K: Send + Sync,
  V: Send + Sync,
  S: Sync,
{
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
