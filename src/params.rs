//! Compile-time tuning parameters.
//!
//! Everything here is fixed at compile time. The slots-per-bucket count is
//! the only parameter surfaced as a const generic on [`CTab`]; the rest are
//! crate-wide constants whose relationships are checked below.
//!
//! [`CTab`]: crate::CTab

// -----------------------------------------------------------------------------
// Bucket Geometry
// -----------------------------------------------------------------------------

/// The default number of slots per bucket.
///
/// Wider buckets improve cache behavior and shorten displacement paths at
/// the cost of more key comparisons per probe. Four slots is the sweet spot
/// for (key, value) pairs of machine-word size.
pub const DEFAULT_SLOTS_PER_BUCKET: usize = 4;

/// The default initial capacity, in entries, of a freshly created table.
pub const DEFAULT_CAPACITY: usize = 16;

// -----------------------------------------------------------------------------
// Displacement Search
// -----------------------------------------------------------------------------

/// The maximum number of slot displacements a single insert may perform.
///
/// Inserts that cannot free a slot within this many hops force a doubling
/// of the table instead.
pub const MAX_BFS_PATH_LEN: usize = 5;

/// Capacity of the fixed ring queue used by the breadth-first displacement
/// search. When the queue fills without reaching an empty slot, the search
/// reports failure and the insert falls back to a resize.
pub(crate) const BFS_QUEUE_CAPACITY: usize = 256;

const _: () = assert!(
  BFS_QUEUE_CAPACITY.is_power_of_two(),
  "invalid params: `BFS_QUEUE_CAPACITY` must be a power of two",
);

const _: () = assert!(
  MAX_BFS_PATH_LEN <= i8::MAX as usize,
  "invalid params: a path depth must fit in the queue's depth field",
);

// -----------------------------------------------------------------------------
// Lock Striping
// -----------------------------------------------------------------------------

/// Bits of a stripe index addressing the offset within one lock segment.
pub(crate) const STRIPE_OFFSET_BITS: u32 = 8;

/// Bits of a stripe index addressing the lock segment itself.
pub(crate) const STRIPE_SEGMENT_BITS: u32 = 8;

/// Number of stripes in one lazily allocated lock segment.
pub(crate) const STRIPE_SEGMENT_SIZE: usize = 1 << STRIPE_OFFSET_BITS;

/// Number of segment pointers held by one lock array.
pub(crate) const STRIPE_SEGMENT_COUNT: usize = 1 << STRIPE_SEGMENT_BITS;

/// The maximum number of stripes in a single lock generation.
///
/// Tables with more buckets than this share each stripe between several
/// buckets (`bucket mod stripes`).
pub const MAX_STRIPES: usize = 1 << (STRIPE_OFFSET_BITS + STRIPE_SEGMENT_BITS);

/// Upper bound on the number of lock generations a table can accumulate.
///
/// A generation is only appended when the stripe count grows, and the stripe
/// count at least doubles each time up to [`MAX_STRIPES`], so the true bound
/// is `log2(MAX_STRIPES) + 1`; the slack is free.
pub(crate) const MAX_GENERATIONS: usize = 64;

const _: () = assert!(
  (STRIPE_OFFSET_BITS + STRIPE_SEGMENT_BITS) as usize <= usize::BITS as usize,
  "invalid params: segment and offset bits exceed the width of a stripe index",
);

const _: () = assert!(
  MAX_STRIPES == STRIPE_SEGMENT_SIZE * STRIPE_SEGMENT_COUNT,
  "invalid params: `MAX_STRIPES` must cover exactly the segmented index space",
);

const _: () = assert!(
  MAX_GENERATIONS > MAX_STRIPES.trailing_zeros() as usize,
  "invalid params: the generation list must outlast every possible growth step",
);

// -----------------------------------------------------------------------------
// Resize Behavior
// -----------------------------------------------------------------------------

/// The default minimum load factor checked when an automatic expansion
/// fires. Expanding below this threshold suggests a pathological hash
/// function and is surfaced as an error instead of performed silently.
pub const DEFAULT_MINIMUM_LOAD_FACTOR: f64 = 0.05;

/// Sentinel meaning "no configured maximum hashpower".
pub(crate) const NO_MAXIMUM_HASHPOWER: usize = usize::MAX;

/// Bucket-count threshold below which a doubling migrates on the calling
/// thread instead of fanning out worker threads.
pub(crate) const PARALLEL_MIGRATION_THRESHOLD: usize = 1024;

/// Integer power, used by the pathcode capacity check.
pub(crate) const fn const_pow(base: u128, exp: u32) -> u128 {
  let mut result: u128 = 1;
  let mut remaining: u32 = exp;

  while remaining > 0 {
    result *= base;
    remaining -= 1;
  }

  result
}
