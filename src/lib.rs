//! A concurrent hash map built on bucketed cuckoo hashing.
//!
//! `ctab` provides [`CTab`], a shared mapping from keys to values designed
//! for workloads where many threads hammer one table at once. Point
//! operations lock only the two small buckets a key can occupy, the table
//! doubles on-line while other threads keep making progress, and an
//! exclusive [`View`] turns the whole table into a coherent snapshot when
//! one is needed.
//!
//! # Overview
//!
//! Every key has exactly two candidate buckets derived from its hash, each
//! holding a handful of entries, so a lookup inspects at most a few cache
//! lines under two fine-grained spinlocks. Inserts that find both
//! candidates full displace resident entries along a short path discovered
//! by breadth-first search; when no path exists, the table doubles in
//! place. This keeps operations cheap at load factors conventional open
//! addressing cannot sustain.
//!
//! # Usage
//!
//! ```
//! use ctab::CTab;
//!
//! let table: CTab<String, u64> = CTab::new();
//!
//! table.insert("alpha".to_string(), 1).unwrap();
//! table.insert("beta".to_string(), 2).unwrap();
//!
//! // Values are read by snapshot or modified in place under the lock.
//! assert_eq!(table.get("alpha"), Some(1));
//! table.visit("beta", |value| *value *= 10);
//! assert_eq!(table.get("beta"), Some(20));
//!
//! assert!(table.remove("alpha"));
//! assert_eq!(table.len(), 1);
//! ```
//!
//! # Concurrency
//!
//! All operations take `&self` and are safe to call from any number of
//! threads. Point operations are linearizable per key; sizes
//! ([`CTab::len`], [`CTab::load_factor`]) are approximate under concurrent
//! mutation. Progress is blocking, not lock-free: an operation may spin
//! briefly on a bucket's stripe lock, and a thread holding a locked
//! [`View`] stalls every other operation until the view drops.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::thread;
//!
//! use ctab::CTab;
//!
//! let counts: Arc<CTab<u64, u64>> = Arc::new(CTab::new());
//!
//! let workers: Vec<_> = (0..8)
//!   .map(|_| {
//!     let counts = Arc::clone(&counts);
//!     thread::spawn(move || {
//!       for event in 0..10_000_u64 {
//!         counts.insert_or_visit(event % 97, 1, |count| *count += 1).unwrap();
//!       }
//!     })
//!   })
//!   .collect();
//!
//! for worker in workers {
//!   worker.join().unwrap();
//! }
//!
//! let view = counts.lock();
//! assert_eq!(view.iter().map(|(_, count)| count).sum::<u64>(), 80_000);
//! ```
//!
//! # Configuration
//!
//! The hash builder is a type parameter (defaulting to the standard
//! [`RandomState`]) and must be deterministic for the table's lifetime.
//! Slots per bucket is a defaulted const generic. Growth can be bounded
//! with [`CTab::set_maximum_hashpower`], and automatic growth on a nearly
//! empty table (the signature of a broken hash function) is surfaced as
//! [`Error::LoadFactorTooLow`] rather than performed. Compile-time
//! constants live in [`config`].
//!
//! # Whole-table view
//!
//! [`CTab::lock`] acquires every stripe lock and returns a [`View`]:
//! iteration over every entry, exact sizes, `clear`, `rehash`/`reserve`
//! (which may shrink), and `merge_from`. [`CTab::view_mut`] returns the
//! same view through a mutable borrow without touching a single lock.
//!
//! See [`implementation`] for how the engine works internally.
//!
//! [`RandomState`]: std::collections::hash_map::RandomState

mod bucket;
mod error;
mod index;
mod locks;
mod params;
mod public;
mod search;
mod table;
mod utils;
mod view;

pub(crate) use crate::utils::alloc;
pub(crate) use crate::utils::sync;

pub mod implementation {
  #![doc = include_str!("../IMPLEMENTATION.md")]
}

pub mod config {
  //! Compile-time constants governing table geometry and growth.

  pub use crate::params::DEFAULT_CAPACITY;
  pub use crate::params::DEFAULT_MINIMUM_LOAD_FACTOR;
  pub use crate::params::DEFAULT_SLOTS_PER_BUCKET;
  pub use crate::params::MAX_BFS_PATH_LEN;
  pub use crate::params::MAX_STRIPES;
}

pub use self::error::Error;
pub use self::public::CTab;
pub use self::public::IntoIter;
pub use self::view::Iter;
pub use self::view::IterMut;
pub use self::view::View;
