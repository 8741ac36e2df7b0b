//! Displacement-path bookkeeping for the breadth-first search.
//!
//! A candidate path is encoded compactly while searching: one bucket index
//! plus a *pathcode*, a base-`B` number whose digits are the slot chosen at
//! each level, plus the current depth. Only after a search succeeds is the
//! code decoded into concrete (bucket, slot) steps for the move phase.

use crate::params::BFS_QUEUE_CAPACITY;
use crate::params::MAX_BFS_PATH_LEN;
use crate::params::const_pow;

// -----------------------------------------------------------------------------
// Path Slot
// -----------------------------------------------------------------------------

/// One frontier entry of the breadth-first search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PathSlot {
  /// The bucket of the last step on the path.
  pub(crate) bucket: usize,
  /// Base-`B` encoding of the slot chosen at each level. The initial codes
  /// 0 and 1 record which of the two starting buckets the path began from.
  pub(crate) pathcode: usize,
  /// Zero-indexed depth of this step, below the maximum path length.
  pub(crate) depth: i8,
}

impl PathSlot {
  #[inline]
  pub(crate) fn new(bucket: usize, pathcode: usize, depth: i8) -> Self {
    debug_assert!((depth as usize) < MAX_BFS_PATH_LEN);

    Self {
      bucket,
      pathcode,
      depth,
    }
  }
}

// -----------------------------------------------------------------------------
// Path Queue
// -----------------------------------------------------------------------------

/// The fixed ring queue driving the breadth-first search.
///
/// Capacity is deliberately finite: a search that floods the queue without
/// reaching an empty slot is treated as "table too full for this
/// hashpower" and the insert falls back to a resize.
pub(crate) struct PathQueue<const B: usize> {
  slots: [PathSlot; BFS_QUEUE_CAPACITY],
  first: usize,
  last: usize,
}

impl<const B: usize> PathQueue<B> {
  /// A pathcode must be able to distinguish `B^MAX_BFS_PATH_LEN` paths.
  const PATHCODE_FITS: () = assert!(
    const_pow(B as u128, MAX_BFS_PATH_LEN as u32) < usize::MAX as u128,
    "invalid params: pathcode cannot encode a full displacement path",
  );

  #[inline]
  pub(crate) fn new() -> Self {
    let () = Self::PATHCODE_FITS;

    Self {
      slots: [PathSlot::default(); BFS_QUEUE_CAPACITY],
      first: 0,
      last: 0,
    }
  }

  #[inline]
  pub(crate) fn enqueue(&mut self, slot: PathSlot) {
    debug_assert!(!self.full());
    self.slots[self.last] = slot;
    self.last = Self::increment(self.last);
  }

  #[inline]
  pub(crate) fn dequeue(&mut self) -> PathSlot {
    debug_assert!(!self.empty());
    let slot: PathSlot = self.slots[self.first];
    self.first = Self::increment(self.first);
    slot
  }

  #[inline]
  pub(crate) fn empty(&self) -> bool {
    self.first == self.last
  }

  #[inline]
  pub(crate) fn full(&self) -> bool {
    Self::increment(self.last) == self.first
  }

  #[inline]
  const fn increment(index: usize) -> usize {
    (index + 1) & (BFS_QUEUE_CAPACITY - 1)
  }
}

// -----------------------------------------------------------------------------
// Path Node
// -----------------------------------------------------------------------------

/// One decoded step of a discovered path.
///
/// The displacement sequence is defined by alternate-bucket hops, so only
/// the hash of the entry being displaced needs to be remembered for
/// re-validation, never the key itself.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PathNode {
  pub(crate) bucket: usize,
  pub(crate) slot: usize,
  pub(crate) hash: usize,
  pub(crate) partial: u8,
}

/// A decoded path, longest-supported length.
pub(crate) type Path = [PathNode; MAX_BFS_PATH_LEN];

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
