//! Errors surfaced by operations that can grow the table.

use thiserror::Error;

/// Errors produced by table growth.
///
/// Internal conditions (a concurrent resize finishing first, a displacement
/// search running out of room, a hashpower change observed under lock) are
/// recovered by retrying and never reach the caller; only the two
/// configuration limits below are surfaced.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum Error {
  /// An automatic expansion fired while the table's load factor was below
  /// the configured minimum.
  ///
  /// This almost always means the hash function is not distributing keys:
  /// the table is nearly empty yet displacement searches keep failing.
  /// See [`CTab::set_minimum_load_factor`].
  ///
  /// [`CTab::set_minimum_load_factor`]: crate::CTab::set_minimum_load_factor
  #[error("automatic expansion triggered below the minimum load factor ({load_factor})")]
  LoadFactorTooLow {
    /// The load factor observed when the expansion was rejected.
    load_factor: f64,
  },

  /// A resize would have grown the table beyond the configured maximum
  /// hashpower. See [`CTab::set_maximum_hashpower`].
  ///
  /// [`CTab::set_maximum_hashpower`]: crate::CTab::set_maximum_hashpower
  #[error("expansion to hashpower {hashpower} exceeds the configured maximum")]
  MaximumHashpowerExceeded {
    /// The hashpower the rejected resize would have reached.
    hashpower: usize,
  },
}
