//! The striped lock layer.
//!
//! Buckets are guarded by an array of spinlock *stripes*, one stripe
//! covering all buckets congruent to its index modulo the stripe count.
//! Each stripe also carries the element counter for its buckets, mutated
//! only while the stripe is held; summing the counters without locks gives
//! the table's approximate size.
//!
//! Stripe counts are powers of two capped at [`MAX_STRIPES`]. When the
//! table outgrows its stripe array a whole new [`LockArray`] *generation*
//! is appended to the [`Generations`] list; earlier generations stay
//! allocated until the table drops, so a thread still spinning on an old
//! stripe wakes against valid memory, re-validates the hashpower, and
//! retries against the current generation.
//!
//! [`MAX_STRIPES`]: crate::params::MAX_STRIPES

use core::array;
use core::ops::Deref;
use core::ptr::null_mut;

use crate::params::MAX_GENERATIONS;
use crate::params::MAX_STRIPES;
use crate::params::STRIPE_OFFSET_BITS;
use crate::params::STRIPE_SEGMENT_COUNT;
use crate::params::STRIPE_SEGMENT_SIZE;
use crate::sync::atomic::AtomicBool;
use crate::sync::atomic::AtomicPtr;
use crate::sync::atomic::AtomicUsize;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Relaxed;
use crate::sync::atomic::Ordering::Release;
use crate::sync::spin_hint;

// -----------------------------------------------------------------------------
// Cache-line Padding
// -----------------------------------------------------------------------------

/// Pads and aligns a value to the length of a cache line, so that adjacent
/// stripes never share one.
///
/// 128 bytes on architectures that prefetch line pairs, 64 elsewhere.
#[cfg_attr(
  any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64"),
  repr(align(128))
)]
#[cfg_attr(
  not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64")),
  repr(align(64))
)]
pub(crate) struct CachePadded<T> {
  value: T,
}

impl<T> CachePadded<T> {
  #[inline]
  pub(crate) fn new(value: T) -> Self {
    Self { value }
  }
}

impl<T> Deref for CachePadded<T> {
  type Target = T;

  #[inline]
  fn deref(&self) -> &T {
    &self.value
  }
}

// -----------------------------------------------------------------------------
// Backoff
// -----------------------------------------------------------------------------

/// Capped exponential pause between acquisition attempts.
pub(crate) struct Backoff {
  step: u32,
}

impl Backoff {
  #[inline]
  pub(crate) fn new() -> Self {
    Self { step: 0 }
  }

  #[inline]
  pub(crate) fn spin(&mut self) {
    for _ in 0..(1 << self.step.min(6)) {
      spin_hint();
    }

    if self.step <= 6 {
      self.step += 1;
    }
  }
}

// -----------------------------------------------------------------------------
// Stripe
// -----------------------------------------------------------------------------

/// One spinlock plus the element counter for the buckets it covers.
///
/// The counter is not independently synchronized: writers hold the stripe,
/// and unlocked readers accept a stale sum.
pub(crate) struct Stripe {
  state: AtomicBool,
  elements: AtomicUsize,
}

impl Stripe {
  #[inline]
  fn new() -> Self {
    Self {
      state: AtomicBool::new(false),
      elements: AtomicUsize::new(0),
    }
  }

  /// Acquires the stripe, spinning until it is free.
  #[inline]
  pub(crate) fn lock(&self) {
    let mut backoff: Backoff = Backoff::new();

    while self.state.swap(true, Acquire) {
      // Test-and-test-and-set: wait on a plain load before retrying the
      // exclusive swap.
      while self.state.load(Relaxed) {
        backoff.spin();
      }
    }
  }

  /// Attempts to acquire the stripe without spinning.
  #[inline]
  pub(crate) fn try_lock(&self) -> bool {
    !self.state.swap(true, Acquire)
  }

  /// Releases the stripe.
  #[inline]
  pub(crate) fn unlock(&self) {
    self.state.store(false, Release);
  }

  /// Reads the element counter; stale unless the stripe is held.
  #[inline]
  pub(crate) fn elements(&self) -> usize {
    self.elements.load(Relaxed)
  }

  /// Adjusts the element counter. Only call while the stripe is held.
  #[inline]
  pub(crate) fn add_elements(&self, count: usize) {
    self.elements.fetch_add(count, Relaxed);
  }

  /// Adjusts the element counter. Only call while the stripe is held.
  ///
  /// May wrap: after a generation change redistributes buckets over more
  /// stripes, an individual counter can go below zero while another holds
  /// the surplus. Only the wrapped sum is meaningful.
  #[inline]
  pub(crate) fn sub_elements(&self, count: usize) {
    self.elements.fetch_sub(count, Relaxed);
  }

  /// Overwrites the element counter. Only call while the stripe is held.
  #[inline]
  pub(crate) fn set_elements(&self, count: usize) {
    self.elements.store(count, Relaxed);
  }
}

// -----------------------------------------------------------------------------
// Lock Array
// -----------------------------------------------------------------------------

type Segment = Box<[CachePadded<Stripe>]>;

/// A fixed-size array of stripes, broken into segments allocated on demand.
///
/// A stripe index decomposes into a segment index (high bits) and an offset
/// within the segment (low bits). Growth only happens through
/// [`resize`](Self::resize) before the array is published as a generation;
/// once published, the array is immutable.
pub(crate) struct LockArray {
  segments: [Option<Segment>; STRIPE_SEGMENT_COUNT],
  stripes: usize,
}

impl LockArray {
  /// Creates an array with `target` stripes, every lock free and every
  /// counter zero.
  pub(crate) fn with_stripes(target: usize) -> Self {
    let mut this: Self = Self {
      segments: array::from_fn(|_| None),
      stripes: 0,
    };

    this.resize(target);
    this
  }

  /// Grows the array to cover at least `target` stripes, clamped to
  /// [`MAX_STRIPES`]. Never shrinks.
  pub(crate) fn resize(&mut self, target: usize) {
    let target: usize = target.min(MAX_STRIPES);

    assert!(
      target.is_power_of_two(),
      "stripe counts must be powers of two",
    );

    if target <= self.stripes {
      return;
    }

    let last_segment: usize = (target - 1) >> STRIPE_OFFSET_BITS;

    for segment in self.segments.iter_mut().take(last_segment + 1) {
      if segment.is_none() {
        *segment = Some(Self::new_segment());
      }
    }

    self.stripes = target;
  }

  #[inline]
  pub(crate) const fn stripes(&self) -> usize {
    self.stripes
  }

  /// Maps a bucket index to the stripe covering it.
  #[inline]
  pub(crate) const fn stripe_of(&self, bucket: usize) -> usize {
    bucket & (self.stripes - 1)
  }

  /// Returns the stripe at `index`.
  #[inline]
  pub(crate) fn stripe(&self, index: usize) -> &Stripe {
    debug_assert!(index < self.stripes);

    match self.segments[index >> STRIPE_OFFSET_BITS] {
      Some(ref segment) => &segment[index & (STRIPE_SEGMENT_SIZE - 1)],
      None => unreachable!("stripe index beyond the allocated segments"),
    }
  }

  /// Sums every stripe's element counter with relaxed loads.
  ///
  /// Exact while all stripes are held; otherwise an approximation. The
  /// wrapping addition cancels the transient per-stripe underflows
  /// described on [`Stripe::sub_elements`].
  pub(crate) fn total_elements(&self) -> usize {
    let mut total: usize = 0;

    for index in 0..self.stripes {
      total = total.wrapping_add(self.stripe(index).elements());
    }

    total
  }

  fn new_segment() -> Segment {
    (0..STRIPE_SEGMENT_SIZE)
      .map(|_| CachePadded::new(Stripe::new()))
      .collect()
  }
}

// -----------------------------------------------------------------------------
// Generations
// -----------------------------------------------------------------------------

/// The append-only list of lock arrays.
///
/// Slot `count - 1` is the *current* generation, consulted by every new
/// operation. Appending requires holding every stripe of the current
/// generation, which is what makes the unsynchronized reads here sound:
/// a reader that observed `count` generations can never see slot
/// `count - 1` change, and pointers are only released by [`Drop`], when no
/// other thread can hold a reference to the table.
pub(crate) struct Generations {
  list: [AtomicPtr<LockArray>; MAX_GENERATIONS],
  count: AtomicUsize,
}

impl Generations {
  pub(crate) fn new(initial: LockArray) -> Self {
    let this: Self = Self {
      list: array::from_fn(|_| AtomicPtr::new(null_mut())),
      count: AtomicUsize::new(0),
    };

    this.push(initial);
    this
  }

  /// The number of generations published so far; at least one.
  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.count.load(Acquire)
  }

  /// The generation consulted by new operations.
  #[inline]
  pub(crate) fn current(&self) -> &LockArray {
    self.get(self.len() - 1)
  }

  /// Returns the generation at `index`, which must be below [`len`](Self::len).
  #[inline]
  pub(crate) fn get(&self, index: usize) -> &LockArray {
    let ptr: *mut LockArray = self.list[index].load(Acquire);

    debug_assert!(!ptr.is_null());

    // SAFETY: Published pointers stay valid until the list is dropped, and
    // `index` is below the published count per the caller contract.
    unsafe { &*ptr }
  }

  /// Publishes a new current generation.
  ///
  /// Callers must hold every stripe of the current generation (or have
  /// exclusive access to the table), so no two publications race.
  pub(crate) fn push(&self, generation: LockArray) {
    let index: usize = self.count.load(Acquire);

    assert!(index < MAX_GENERATIONS, "lock generation overflow");

    self.list[index].store(Box::into_raw(Box::new(generation)), Release);
    self.count.store(index + 1, Release);
  }
}

impl Drop for Generations {
  fn drop(&mut self) {
    for index in 0..self.len() {
      let ptr: *mut LockArray = self.list[index].load(Relaxed);

      // SAFETY: Each published pointer came from `Box::into_raw` and is
      // dropped exactly once here.
      drop(unsafe { Box::from_raw(ptr) });
    }
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(not(loom))]
#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::Barrier;
  use std::thread;
  use std::thread::JoinHandle;

  use super::Generations;
  use super::LockArray;
  use super::Stripe;
  use crate::params::MAX_STRIPES;
  use crate::params::STRIPE_SEGMENT_SIZE;

  #[test]
  fn stripe_lock_unlock() {
    let array: LockArray = LockArray::with_stripes(4);
    let stripe: &Stripe = array.stripe(2);

    stripe.lock();
    assert!(!stripe.try_lock());
    stripe.unlock();
    assert!(stripe.try_lock());
    stripe.unlock();
  }

  #[test]
  fn counters_accumulate() {
    let array: LockArray = LockArray::with_stripes(8);

    array.stripe(1).add_elements(3);
    array.stripe(5).add_elements(2);
    array.stripe(5).sub_elements(1);

    assert_eq!(array.stripe(1).elements(), 3);
    assert_eq!(array.stripe(5).elements(), 1);
    assert_eq!(array.total_elements(), 4);

    array.stripe(1).set_elements(0);
    assert_eq!(array.total_elements(), 1);
  }

  #[test]
  fn stripe_of_masks() {
    let array: LockArray = LockArray::with_stripes(16);

    assert_eq!(array.stripe_of(5), 5);
    assert_eq!(array.stripe_of(16), 0);
    assert_eq!(array.stripe_of(21), 5);
  }

  #[test]
  fn resize_never_shrinks() {
    let mut array: LockArray = LockArray::with_stripes(4);

    array.resize(64);
    assert_eq!(array.stripes(), 64);

    array.resize(4);
    assert_eq!(array.stripes(), 64);
  }

  #[test]
  fn resize_clamps_to_max() {
    let mut array: LockArray = LockArray::with_stripes(1);

    array.resize(MAX_STRIPES * 2);
    assert_eq!(array.stripes(), MAX_STRIPES);
  }

  #[test]
  fn stripes_span_segments() {
    let target: usize = STRIPE_SEGMENT_SIZE * 4;
    let array: LockArray = LockArray::with_stripes(target);

    for index in [0, STRIPE_SEGMENT_SIZE - 1, STRIPE_SEGMENT_SIZE, target - 1] {
      array.stripe(index).add_elements(1);
    }

    assert_eq!(array.total_elements(), 4);
  }

  #[test]
  fn generations_append_only() {
    let generations: Generations = Generations::new(LockArray::with_stripes(2));

    assert_eq!(generations.len(), 1);
    assert_eq!(generations.current().stripes(), 2);

    generations.push(LockArray::with_stripes(8));

    assert_eq!(generations.len(), 2);
    assert_eq!(generations.current().stripes(), 8);
    assert_eq!(generations.get(0).stripes(), 2);
  }

  // Scenario: Two threads increment a shared counter under the same stripe.
  // Expected: No increment is lost.
  #[test]
  fn stripe_provides_mutual_exclusion() {
    const ROUNDS: usize = 10_000;
    const THREADS: usize = 4;

    let array: Arc<LockArray> = Arc::new(LockArray::with_stripes(1));
    let barrier: Arc<Barrier> = Arc::new(Barrier::new(THREADS));

    let threads: Vec<JoinHandle<()>> = (0..THREADS)
      .map(|_| {
        let array: Arc<LockArray> = Arc::clone(&array);
        let barrier: Arc<Barrier> = Arc::clone(&barrier);

        thread::spawn(move || {
          barrier.wait();

          for _ in 0..ROUNDS {
            let stripe: &Stripe = array.stripe(0);
            stripe.lock();
            stripe.add_elements(1);
            stripe.unlock();
          }
        })
      })
      .collect();

    for thread in threads {
      thread.join().unwrap();
    }

    assert_eq!(array.stripe(0).elements(), ROUNDS * THREADS);
  }
}
