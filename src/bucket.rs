//! Bucket storage for the table.
//!
//! A [`BucketArray`] is a single heap allocation of `2^hashpower` buckets,
//! each holding a small fixed number of slots. A slot stores its entry
//! inline together with an 8-bit partial tag and an occupied flag; the entry
//! bytes are only meaningful while the flag is set.
//!
//! The array never synchronizes on its own. Every accessor that touches
//! slot state is `unsafe` with the same contract: the caller must hold the
//! stripe lock covering the bucket (or otherwise have exclusive access),
//! shared for reads and exclusive of writers for writes. The engine in
//! [`table`](crate::table) upholds this through its lock guards.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::mem::needs_drop;
use core::ptr;
use core::ptr::NonNull;

use crate::alloc::Layout;
use crate::alloc::alloc_zeroed;
use crate::alloc::dealloc;
use crate::alloc::handle_alloc_error;
use crate::index::hashsize;

// -----------------------------------------------------------------------------
// Bucket
// -----------------------------------------------------------------------------

/// A fixed group of `B` slots sharing one cache neighborhood.
///
/// An all-zero byte pattern is a valid empty bucket; the array exploits this
/// by allocating zeroed memory instead of constructing each bucket.
pub(crate) struct Bucket<K, V, const B: usize> {
  slots: [UnsafeCell<MaybeUninit<(K, V)>>; B],
  partials: [UnsafeCell<u8>; B],
  occupied: [UnsafeCell<bool>; B],
}

impl<K, V, const B: usize> Bucket<K, V, B> {
  /// Returns whether the slot holds an entry.
  ///
  /// # Safety
  ///
  /// The covering stripe must be held, or access otherwise exclusive of
  /// writers.
  #[inline]
  pub(crate) unsafe fn occupied(&self, slot: usize) -> bool {
    // SAFETY: No concurrent writer per the caller contract.
    unsafe { *self.occupied[slot].get() }
  }

  /// Returns the slot's partial tag.
  ///
  /// # Safety
  ///
  /// Same contract as [`occupied`](Self::occupied); the slot must be
  /// occupied for the value to mean anything.
  #[inline]
  pub(crate) unsafe fn partial(&self, slot: usize) -> u8 {
    // SAFETY: No concurrent writer per the caller contract.
    unsafe { *self.partials[slot].get() }
  }

  /// Returns the slot's key.
  ///
  /// # Safety
  ///
  /// The covering stripe must be held (shared) and the slot occupied.
  #[inline]
  pub(crate) unsafe fn key(&self, slot: usize) -> &K {
    // SAFETY: The slot is occupied, so the entry is initialized; the caller
    // contract excludes concurrent writers for the borrow's duration.
    unsafe { &(*self.entry_ptr(slot)).0 }
  }

  /// Returns the slot's value.
  ///
  /// # Safety
  ///
  /// Same contract as [`key`](Self::key).
  #[inline]
  pub(crate) unsafe fn value(&self, slot: usize) -> &V {
    // SAFETY: As in `key`.
    unsafe { &(*self.entry_ptr(slot)).1 }
  }

  /// Returns the slot's value mutably.
  ///
  /// # Safety
  ///
  /// The covering stripe must be held and no other reference to this slot
  /// may exist for the borrow's duration.
  #[inline]
  #[expect(clippy::mut_from_ref, reason = "guarded by the stripe lock")]
  pub(crate) unsafe fn value_mut(&self, slot: usize) -> &mut V {
    // SAFETY: The slot is occupied and the caller guarantees uniqueness.
    unsafe { &mut (*self.entry_ptr(slot)).1 }
  }

  /// Returns the slot's key and value.
  ///
  /// # Safety
  ///
  /// Same contract as [`key`](Self::key).
  #[inline]
  pub(crate) unsafe fn entry(&self, slot: usize) -> (&K, &V) {
    // SAFETY: As in `key`.
    let pair: &(K, V) = unsafe { &*self.entry_ptr(slot) };

    (&pair.0, &pair.1)
  }

  /// Returns the slot's key and a mutable value.
  ///
  /// # Safety
  ///
  /// Same contract as [`value_mut`](Self::value_mut).
  #[inline]
  #[expect(clippy::mut_from_ref, reason = "guarded by the stripe lock")]
  pub(crate) unsafe fn entry_mut(&self, slot: usize) -> (&K, &mut V) {
    // SAFETY: The slot is occupied and the caller guarantees uniqueness.
    let pair: &mut (K, V) = unsafe { &mut *self.entry_ptr(slot) };

    (&pair.0, &mut pair.1)
  }

  #[inline]
  fn entry_ptr(&self, slot: usize) -> *mut (K, V) {
    self.slots[slot].get().cast::<(K, V)>()
  }

  #[inline]
  unsafe fn set_occupied(&self, slot: usize, value: bool) {
    // SAFETY: Caller guarantees exclusive access to the flag.
    unsafe {
      *self.occupied[slot].get() = value;
    }
  }

  #[inline]
  unsafe fn set_partial(&self, slot: usize, value: u8) {
    // SAFETY: Caller guarantees exclusive access to the tag.
    unsafe {
      *self.partials[slot].get() = value;
    }
  }
}

// -----------------------------------------------------------------------------
// Bucket Array
// -----------------------------------------------------------------------------

/// A heap array of `2^hashpower` buckets.
///
/// The array records its own hashpower as a plain field; the table-level
/// hashpower that operations snapshot lives in an atomic owned by the
/// engine, and the two agree whenever the array is reachable.
pub(crate) struct BucketArray<K, V, const B: usize> {
  hashpower: usize,
  buckets: NonNull<Bucket<K, V, B>>,
  marker: PhantomData<(K, V)>,
}

impl<K, V, const B: usize> BucketArray<K, V, B> {
  /// Allocates an array of `2^hashpower` empty buckets.
  ///
  /// The allocation is zeroed, which is exactly the all-slots-unoccupied
  /// state, so no per-bucket construction pass is needed.
  pub(crate) fn new(hashpower: usize) -> Self {
    let layout: Layout = Self::layout(hashpower);

    // SAFETY: `layout` has non-zero size: a bucket always carries at least
    // its occupied flags.
    let raw: *mut u8 = unsafe { alloc_zeroed(layout) };

    Self {
      hashpower,
      buckets: match NonNull::new(raw.cast()) {
        Some(ptr) => ptr,
        None => handle_alloc_error(layout),
      },
      marker: PhantomData,
    }
  }

  #[inline]
  pub(crate) const fn hashpower(&self) -> usize {
    self.hashpower
  }

  #[inline]
  pub(crate) const fn bucket_count(&self) -> usize {
    hashsize(self.hashpower)
  }

  /// Returns a reference to the bucket at `index`, bounds-checked in debug
  /// builds only.
  #[inline]
  pub(crate) fn bucket(&self, index: usize) -> &Bucket<K, V, B> {
    debug_assert!(
      index < self.bucket_count(),
      "BucketArray::bucket requires that the index is in bounds",
    );

    // SAFETY: The allocation holds `bucket_count` buckets and `index` is in
    // bounds per the debug assertion (callers derive indices from masked
    // hashes, which cannot exceed the count).
    unsafe { self.buckets.add(index).as_ref() }
  }

  /// Constructs an entry in an unoccupied slot and marks it occupied.
  ///
  /// The flag is set last; a slot whose construction did not complete
  /// stays unoccupied.
  ///
  /// # Safety
  ///
  /// The covering stripe must be held exclusively and the slot unoccupied.
  pub(crate) unsafe fn set(
    &self,
    index: usize,
    slot: usize,
    partial: u8,
    key: K,
    value: V,
  ) {
    let bucket: &Bucket<K, V, B> = self.bucket(index);

    // SAFETY: Exclusive access per the caller contract.
    unsafe {
      debug_assert!(!bucket.occupied(slot));
      bucket.set_partial(slot, partial);
      bucket.entry_ptr(slot).write((key, value));
      bucket.set_occupied(slot, true);
    }
  }

  /// Destroys the entry in an occupied slot and marks it unoccupied.
  ///
  /// # Safety
  ///
  /// The covering stripe must be held exclusively and the slot occupied.
  pub(crate) unsafe fn erase(&self, index: usize, slot: usize) {
    let bucket: &Bucket<K, V, B> = self.bucket(index);

    // SAFETY: Exclusive access per the caller contract; the slot is
    // occupied, so the entry is initialized and dropped exactly once
    // because the flag is cleared first.
    unsafe {
      debug_assert!(bucket.occupied(slot));
      bucket.set_occupied(slot, false);
      ptr::drop_in_place(bucket.entry_ptr(slot));
    }
  }

  /// Moves the entry out of an occupied slot, marking it unoccupied.
  ///
  /// # Safety
  ///
  /// Same contract as [`erase`](Self::erase).
  pub(crate) unsafe fn take(&self, index: usize, slot: usize) -> (K, V) {
    let bucket: &Bucket<K, V, B> = self.bucket(index);

    // SAFETY: Exclusive access per the caller contract; clearing the flag
    // before the read transfers ownership of the entry to the caller.
    unsafe {
      debug_assert!(bucket.occupied(slot));
      bucket.set_occupied(slot, false);
      bucket.entry_ptr(slot).read()
    }
  }

  /// Relocates an entry between two slots of this array, preserving its
  /// partial tag.
  ///
  /// # Safety
  ///
  /// The stripes covering both buckets must be held exclusively, the source
  /// slot occupied, and the destination slot unoccupied. The two positions
  /// must differ.
  pub(crate) unsafe fn move_slot(
    &self,
    dst_index: usize,
    dst_slot: usize,
    src_index: usize,
    src_slot: usize,
  ) {
    debug_assert!((dst_index, dst_slot) != (src_index, src_slot));

    // SAFETY: Forwarded caller contract; `take` leaves the source
    // unoccupied before `set` fills the destination.
    unsafe {
      let partial: u8 = self.bucket(src_index).partial(src_slot);
      let (key, value): (K, V) = self.take(src_index, src_slot);

      self.set(dst_index, dst_slot, partial, key, value);
    }
  }

  /// Destroys every occupied slot; the bucket array itself remains.
  ///
  /// # Safety
  ///
  /// Every stripe must be held, or access otherwise exclusive.
  pub(crate) unsafe fn clear(&self) {
    for index in 0..self.bucket_count() {
      let bucket: &Bucket<K, V, B> = self.bucket(index);

      for slot in 0..B {
        // SAFETY: Forwarded caller contract.
        unsafe {
          if bucket.occupied(slot) {
            self.erase(index, slot);
          }
        }
      }
    }
  }

  #[inline]
  fn layout(hashpower: usize) -> Layout {
    match Layout::array::<Bucket<K, V, B>>(hashsize(hashpower)) {
      Ok(layout) => layout,
      Err(_) => panic!("bucket array capacity overflow"),
    }
  }
}

impl<K, V, const B: usize> Drop for BucketArray<K, V, B> {
  fn drop(&mut self) {
    if needs_drop::<(K, V)>() {
      // SAFETY: `Drop` provides exclusive access via `&mut self`.
      unsafe {
        self.clear();
      }
    }

    // SAFETY: The pointer was allocated with this same layout in `new`.
    unsafe {
      dealloc(self.buckets.cast().as_ptr(), Self::layout(self.hashpower));
    }
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
