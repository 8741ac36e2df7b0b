use core::borrow::Borrow;
use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;

use crate::bucket::BucketArray;
use crate::error::Error;
use crate::index::HashValue;
use crate::index::alternate_index;
use crate::index::primary_index;
use crate::index::reserve_calc;
use crate::public::CTab;
use crate::table::AllBuckets;
use crate::table::Locked;
use crate::table::Table;
use crate::table::Unlocked;

// -----------------------------------------------------------------------------
// Whole-table View
// -----------------------------------------------------------------------------

/// A coherent, exclusive view of the whole table.
///
/// A view is obtained either by [`CTab::lock`], which acquires every stripe
/// of every lock generation, or by [`CTab::view_mut`], which takes a
/// mutable borrow instead of locking. Both expose the same surface: direct
/// point operations that skip per-bucket locking, bulk operations
/// ([`clear`], [`rehash`], [`reserve`], [`merge_from`]), and iteration over
/// every occupied slot in bucket-then-slot order.
///
/// While a locked view is alive, every operation on the underlying table
/// blocks until the view drops. In particular, calling a table operation
/// from the thread holding the view deadlocks.
///
/// Iterators borrow the view, so the borrow checker guarantees they never
/// observe a [`rehash`]: anything that replaces the bucket array takes
/// `&mut self`. Value mutation through [`get_mut`] or [`iter_mut`] leaves
/// iterators valid.
///
/// [`clear`]: Self::clear
/// [`rehash`]: Self::rehash
/// [`reserve`]: Self::reserve
/// [`merge_from`]: Self::merge_from
/// [`get_mut`]: Self::get_mut
/// [`iter_mut`]: Self::iter_mut
pub struct View<'t, K, V, S, const B: usize> {
  table: &'t Table<K, V, S, B>,
  guard: Option<AllBuckets<'t, Locked>>,
}

impl<'t, K, V, S, const B: usize> View<'t, K, V, S, B> {
  /// Acquires every stripe of every generation and wraps the table.
  pub(crate) fn lock(table: &'t Table<K, V, S, B>) -> Self {
    let guard: AllBuckets<'t, Locked> = table.lock_all(false);

    Self {
      table,
      guard: Some(guard),
    }
  }

  /// Wraps the table without locking; the caller provides exclusivity
  /// through a mutable borrow.
  pub(crate) fn exclusive(table: &'t Table<K, V, S, B>) -> Self {
    Self {
      table,
      guard: None,
    }
  }

  /// Returns the number of entries.
  ///
  /// Exact: the view excludes every concurrent mutation.
  #[inline]
  pub fn len(&self) -> usize {
    self.table.len()
  }

  /// Returns `true` if the table holds no entries.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  /// Returns the number of entries the table can hold at its current size.
  #[inline]
  pub fn capacity(&self) -> usize {
    self.table.capacity()
  }

  /// Returns the binary logarithm of the bucket count.
  #[inline]
  pub fn hashpower(&self) -> usize {
    self.table.hashpower()
  }

  /// Returns the ratio of entries to capacity.
  #[inline]
  pub fn load_factor(&self) -> f64 {
    self.table.load_factor()
  }

  /// Returns a reference to the table's hasher.
  #[inline]
  pub fn hasher(&self) -> &S {
    self.table.hasher()
  }

  /// Visits every occupied slot in bucket-then-slot order.
  pub fn iter(&self) -> Iter<'_, K, V, B> {
    // SAFETY: The view guarantees exclusivity for its lifetime, and the
    // iterator's borrow of `self` keeps array-replacing operations away.
    let buckets: &BucketArray<K, V, B> = unsafe { self.table.buckets() };

    Iter {
      buckets,
      front: 0,
      back: buckets.bucket_count() * B,
    }
  }

  /// Visits every occupied slot with mutable values.
  pub fn iter_mut(&mut self) -> IterMut<'_, K, V, B> {
    // SAFETY: As in `iter`, with the mutable borrow excluding every other
    // access through the view.
    let buckets: &BucketArray<K, V, B> = unsafe { self.table.buckets() };

    IterMut {
      buckets,
      front: 0,
      back: buckets.bucket_count() * B,
    }
  }
}

impl<K, V, S, const B: usize> View<'_, K, V, S, B>
where
  K: Hash + Eq,
  S: BuildHasher,
{
  /// Returns a reference to the value stored for `key`.
  pub fn get<Q>(&self, key: &Q) -> Option<&V>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.find(key).map(|(bucket, slot)| {
      // SAFETY: The view guarantees exclusivity; the slot was just found
      // occupied.
      unsafe { self.buckets().bucket(bucket).value(slot) }
    })
  }

  /// Returns a mutable reference to the value stored for `key`.
  pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    match self.find(key) {
      // SAFETY: As in `get`; the mutable borrow of the view makes the
      // returned borrow unique.
      Some((bucket, slot)) => Some(unsafe { self.buckets().bucket(bucket).value_mut(slot) }),
      None => None,
    }
  }

  /// Returns `true` if the table holds an entry for `key`.
  pub fn contains<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.find(key).is_some()
  }

  /// Inserts `(key, value)`; a duplicate key leaves the existing value in
  /// place. Returns `true` when a new entry was created.
  ///
  /// # Errors
  ///
  /// Growth may be refused; see [`CTab::insert`].
  pub fn insert(&mut self, key: K, value: V) -> Result<bool, Error>
  where
    K: Send,
    V: Send,
    S: Sync,
  {
    let retain: bool = self.guard.is_some();

    self
      .table
      .insert_with::<Unlocked, _>(key, value, retain, |_, rejected| drop(rejected))
  }

  /// Inserts `(key, value)`, overwriting the value on a duplicate key.
  /// Returns `true` when a new entry was created.
  ///
  /// # Errors
  ///
  /// Growth may be refused; see [`CTab::insert`].
  pub fn insert_or_assign(&mut self, key: K, value: V) -> Result<bool, Error>
  where
    K: Send,
    V: Send,
    S: Sync,
  {
    let retain: bool = self.guard.is_some();

    self
      .table
      .insert_with::<Unlocked, _>(key, value, retain, |existing, value| *existing = value)
  }

  /// Overwrites the value for `key` if present; returns whether it was.
  pub fn update<Q>(&mut self, key: &Q, value: V) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self
      .table
      .with_value::<Unlocked, _, _, _>(key, |existing| *existing = value)
      .is_some()
  }

  /// Removes the entry for `key`; returns whether it was present.
  pub fn remove<Q>(&mut self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.table.remove_if::<Unlocked, _, _>(key, |_| true)
  }

  /// Looks up `key` and removes the entry if `f` returns `true` for its
  /// value. Returns whether the key was found at all.
  pub fn remove_if<Q, F>(&mut self, key: &Q, f: F) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    F: FnOnce(&mut V) -> bool,
  {
    self.table.remove_if::<Unlocked, _, _>(key, f)
  }

  /// Destroys every entry; capacity is unchanged.
  pub fn clear(&mut self) {
    self.table.clear::<Unlocked>();
  }

  /// Rebuilds the table at (at least) the given hashpower, re-placing
  /// every entry. Unlike automatic growth this may shrink the table; a
  /// target too small for the current entries is raised until they fit.
  ///
  /// Returns `false` if a concurrent resize got there first (impossible
  /// through a view; kept for parity with the table-level protocol).
  ///
  /// # Errors
  ///
  /// Fails with [`Error::MaximumHashpowerExceeded`] if the effective
  /// target breaches the configured limit.
  pub fn rehash(&mut self, hashpower: usize) -> Result<bool, Error> {
    let retain: bool = self.guard.is_some();

    self.table.expand_simple::<Unlocked>(hashpower, false, retain)
  }

  /// Rebuilds the table to the smallest size holding at least `capacity`
  /// entries.
  ///
  /// # Errors
  ///
  /// As for [`rehash`](Self::rehash).
  pub fn reserve(&mut self, capacity: usize) -> Result<bool, Error> {
    self.rehash(reserve_calc(capacity, B))
  }

  /// Moves every entry of `source` into this table. Keys already present
  /// keep their existing values; their incoming entries are dropped.
  ///
  /// # Errors
  ///
  /// Growth may be refused partway; entries drained before the failure
  /// stay inserted, the rest are dropped with `source`.
  pub fn merge_from<S2>(&mut self, source: CTab<K, V, S2, B>) -> Result<(), Error>
  where
    K: Send,
    V: Send,
    S: Sync,
    S2: BuildHasher,
  {
    for (key, value) in source {
      self.insert(key, value)?;
    }

    Ok(())
  }

  fn find<Q>(&self, key: &Q) -> Option<(usize, usize)>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let hashed: HashValue = self.table.hashed_key(key);
    let buckets: &BucketArray<K, V, B> = self.buckets();
    let hashpower: usize = buckets.hashpower();
    let first: usize = primary_index(hashpower, hashed.hash);
    let second: usize = alternate_index(hashpower, hashed.partial, first);

    // SAFETY: The view guarantees exclusivity.
    unsafe { self.table.find_pos(buckets, first, second, hashed.partial, key) }
  }

  #[inline]
  fn buckets(&self) -> &BucketArray<K, V, B> {
    // SAFETY: The view holds every stripe or an exclusive borrow, so the
    // array cannot be replaced behind this reference.
    unsafe { self.table.buckets() }
  }
}

impl<K, V, S, const B: usize> Extend<(K, V)> for View<'_, K, V, S, B>
where
  K: Hash + Eq + Send,
  V: Send,
  S: BuildHasher + Sync,
{
  /// Inserts every pair, keeping existing values on duplicate keys.
  ///
  /// # Panics
  ///
  /// Panics if growth is refused (see [`CTab::insert`]); use
  /// [`insert`](View::insert) directly to handle those errors.
  fn extend<I>(&mut self, iter: I)
  where
    I: IntoIterator<Item = (K, V)>,
  {
    for (key, value) in iter {
      if let Err(error) = self.insert(key, value) {
        panic!("table growth failed while extending: {error}");
      }
    }
  }
}

impl<K, V, S, const B: usize> Debug for View<'_, K, V, S, B>
where
  K: Debug,
  V: Debug,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_map().entries(self.iter()).finish()
  }
}

impl<'v, K, V, S, const B: usize> IntoIterator for &'v View<'_, K, V, S, B> {
  type Item = (&'v K, &'v V);
  type IntoIter = Iter<'v, K, V, B>;

  fn into_iter(self) -> Iter<'v, K, V, B> {
    self.iter()
  }
}

impl<'v, K, V, S, const B: usize> IntoIterator for &'v mut View<'_, K, V, S, B> {
  type Item = (&'v K, &'v mut V);
  type IntoIter = IterMut<'v, K, V, B>;

  fn into_iter(self) -> IterMut<'v, K, V, B> {
    self.iter_mut()
  }
}

// -----------------------------------------------------------------------------
// Iterators
// -----------------------------------------------------------------------------

/// Iterator over a view's entries in bucket-then-slot order.
pub struct Iter<'v, K, V, const B: usize> {
  buckets: &'v BucketArray<K, V, B>,
  front: usize,
  back: usize,
}

impl<'v, K, V, const B: usize> Iterator for Iter<'v, K, V, B> {
  type Item = (&'v K, &'v V);

  fn next(&mut self) -> Option<Self::Item> {
    while self.front < self.back {
      let position: usize = self.front;
      self.front += 1;

      // SAFETY: The borrow chain back to the view guarantees exclusivity.
      unsafe {
        let bucket = self.buckets.bucket(position / B);

        if bucket.occupied(position % B) {
          return Some(bucket.entry(position % B));
        }
      }
    }

    None
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.back - self.front))
  }
}

impl<K, V, const B: usize> DoubleEndedIterator for Iter<'_, K, V, B> {
  fn next_back(&mut self) -> Option<Self::Item> {
    while self.back > self.front {
      self.back -= 1;

      // SAFETY: As in `next`.
      unsafe {
        let bucket = self.buckets.bucket(self.back / B);

        if bucket.occupied(self.back % B) {
          return Some(bucket.entry(self.back % B));
        }
      }
    }

    None
  }
}

impl<K, V, const B: usize> FusedIterator for Iter<'_, K, V, B> {}

impl<K, V, const B: usize> Clone for Iter<'_, K, V, B> {
  fn clone(&self) -> Self {
    Self {
      buckets: self.buckets,
      front: self.front,
      back: self.back,
    }
  }
}

impl<K, V, const B: usize> Debug for Iter<'_, K, V, B> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("Iter(..)")
  }
}

/// Iterator over a view's entries with mutable values.
pub struct IterMut<'v, K, V, const B: usize> {
  buckets: &'v BucketArray<K, V, B>,
  front: usize,
  back: usize,
}

impl<'v, K, V, const B: usize> Iterator for IterMut<'v, K, V, B> {
  type Item = (&'v K, &'v mut V);

  fn next(&mut self) -> Option<Self::Item> {
    while self.front < self.back {
      let position: usize = self.front;
      self.front += 1;

      // SAFETY: Exclusivity comes from the `&mut View` borrow, and the
      // cursor yields each slot at most once, so the mutable borrows
      // never alias.
      unsafe {
        let bucket = self.buckets.bucket(position / B);

        if bucket.occupied(position % B) {
          return Some(bucket.entry_mut(position % B));
        }
      }
    }

    None
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.back - self.front))
  }
}

impl<K, V, const B: usize> DoubleEndedIterator for IterMut<'_, K, V, B> {
  fn next_back(&mut self) -> Option<Self::Item> {
    while self.back > self.front {
      self.back -= 1;

      // SAFETY: As in `next`; front and back never cross.
      unsafe {
        let bucket = self.buckets.bucket(self.back / B);

        if bucket.occupied(self.back % B) {
          return Some(bucket.entry_mut(self.back % B));
        }
      }
    }

    None
  }
}

impl<K, V, const B: usize> FusedIterator for IterMut<'_, K, V, B> {}

impl<K, V, const B: usize> Debug for IterMut<'_, K, V, B> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("IterMut(..)")
  }
}
