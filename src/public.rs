use core::borrow::Borrow;
use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::hash::BuildHasher;
use core::hash::Hash;
use std::collections::hash_map::RandomState;

use crate::error::Error;
use crate::index::reserve_calc;
use crate::params::DEFAULT_CAPACITY;
use crate::params::DEFAULT_SLOTS_PER_BUCKET;
use crate::table::Locked;
use crate::table::Table;
use crate::view::View;

/// A concurrent hash map based on bucketed cuckoo hashing.
///
/// `CTab` maps keys to values under heavy multi-threaded mutation: every
/// point operation locks only the two small buckets a key can live in, and
/// the table doubles in place while other threads keep working. An
/// exclusive [`View`] over the whole table is available when a coherent
/// snapshot, iteration, or bulk operation is needed.
///
/// See the [crate-level documentation][crate] for an overview of the
/// engine.
///
/// # Type Parameters
///
/// - `K`: key type; hashed with `S` and compared with `Eq`.
/// - `V`: value type.
/// - `S`: the hash builder, [`RandomState`] by default. It must be
///   deterministic for the lifetime of one table.
/// - `B`: slots per bucket (4 by default). Wider buckets trade probe cost
///   for fewer displacements.
///
/// # Examples
///
/// ```
/// use ctab::CTab;
///
/// let table: CTab<u64, String> = CTab::new();
///
/// table.insert(1, "one".to_string()).unwrap();
/// table.insert(2, "two".to_string()).unwrap();
///
/// assert_eq!(table.get(&1), Some("one".to_string()));
/// assert_eq!(table.len(), 2);
///
/// table.visit(&2, |value| value.push('!'));
/// assert_eq!(table.get(&2), Some("two!".to_string()));
/// ```
///
/// Shared across threads:
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use ctab::CTab;
///
/// let table: Arc<CTab<u64, u64>> = Arc::new(CTab::new());
///
/// let handles: Vec<_> = (0..4)
///   .map(|thread_id| {
///     let table = Arc::clone(&table);
///     thread::spawn(move || {
///       for index in 0..100 {
///         table.insert(thread_id * 100 + index, index).unwrap();
///       }
///     })
///   })
///   .collect();
///
/// for handle in handles {
///   handle.join().unwrap();
/// }
///
/// assert_eq!(table.len(), 400);
/// ```
pub struct CTab<K, V, S = RandomState, const B: usize = { DEFAULT_SLOTS_PER_BUCKET }> {
  inner: Table<K, V, S, B>,
}

impl<K, V, const B: usize> CTab<K, V, RandomState, B> {
  /// Creates an empty table with the default capacity.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  /// assert!(table.is_empty());
  /// ```
  #[inline]
  pub fn new() -> Self {
    Self::with_capacity(DEFAULT_CAPACITY)
  }

  /// Creates an empty table sized for at least `capacity` entries.
  ///
  /// The bucket count is the smallest power of two whose slots cover
  /// `capacity`.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::with_capacity(100);
  /// assert!(table.capacity() >= 100);
  /// ```
  #[inline]
  pub fn with_capacity(capacity: usize) -> Self {
    Self::with_capacity_and_hasher(capacity, RandomState::new())
  }
}

impl<K, V, S, const B: usize> CTab<K, V, S, B> {
  /// Creates an empty table using the given hash builder.
  #[inline]
  pub fn with_hasher(hasher: S) -> Self {
    Self::with_capacity_and_hasher(DEFAULT_CAPACITY, hasher)
  }

  /// Creates an empty table sized for `capacity` entries, using the given
  /// hash builder.
  ///
  /// The hasher must be deterministic while the table lives: every lookup
  /// of a key must produce the hash it was inserted under.
  #[inline]
  pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
    Self {
      inner: Table::with_capacity_and_hasher(capacity, hasher),
    }
  }

  /// Returns a reference to the table's hash builder.
  #[inline]
  pub fn hasher(&self) -> &S {
    self.inner.hasher()
  }

  /// Returns the number of entries.
  ///
  /// Under concurrent mutation this is an approximation: the per-stripe
  /// counters are summed without stopping writers. It is exact through a
  /// [`View`].
  #[inline]
  pub fn len(&self) -> usize {
    self.inner.len()
  }

  /// Returns `true` if the table holds no entries (approximate, like
  /// [`len`](Self::len)).
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.inner.is_empty()
  }

  /// Returns the number of entries the table can hold at its current
  /// size. Growth is automatic; this is not a limit.
  #[inline]
  pub fn capacity(&self) -> usize {
    self.inner.capacity()
  }

  /// Returns the binary logarithm of the bucket count.
  #[inline]
  pub fn hashpower(&self) -> usize {
    self.inner.hashpower()
  }

  /// Returns the number of buckets.
  #[inline]
  pub fn bucket_count(&self) -> usize {
    self.inner.bucket_count()
  }

  /// Returns the ratio of entries to capacity (approximate under
  /// concurrent mutation).
  #[inline]
  pub fn load_factor(&self) -> f64 {
    self.inner.load_factor()
  }

  /// Returns the minimum load factor checked by automatic growth.
  #[inline]
  pub fn minimum_load_factor(&self) -> f64 {
    self.inner.minimum_load_factor()
  }

  /// Sets the minimum load factor checked by automatic growth.
  ///
  /// An automatic expansion that fires while `load_factor()` is below this
  /// threshold fails with [`Error::LoadFactorTooLow`] instead of growing,
  /// which turns a pathological hash function into a diagnosable error
  /// rather than runaway memory use. Zero (the check is off) up to `1.0`.
  ///
  /// # Panics
  ///
  /// Panics if `factor` is outside `[0.0, 1.0]`.
  #[inline]
  pub fn set_minimum_load_factor(&self, factor: f64) {
    self.inner.set_minimum_load_factor(factor);
  }

  /// Returns the configured maximum hashpower, if any.
  #[inline]
  pub fn maximum_hashpower(&self) -> Option<usize> {
    self.inner.maximum_hashpower()
  }

  /// Caps how large the table may grow. A resize whose target hashpower
  /// exceeds the limit fails with [`Error::MaximumHashpowerExceeded`].
  /// `None` removes the cap.
  ///
  /// # Panics
  ///
  /// Panics if the table is already larger than `limit`.
  #[inline]
  pub fn set_maximum_hashpower(&self, limit: Option<usize>) {
    self.inner.set_maximum_hashpower(limit);
  }

  /// Acquires an exclusive [`View`] of the whole table by taking every
  /// stripe lock.
  ///
  /// Concurrent operations block until the view drops; the view itself
  /// sees a coherent table and supports iteration and bulk operations.
  /// Calling any other table method from the thread holding the view
  /// deadlocks.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// for index in 0..10 {
  ///   table.insert(index, index * index).unwrap();
  /// }
  ///
  /// let view = table.lock();
  /// assert_eq!(view.len(), 10);
  /// assert_eq!(view.iter().count(), 10);
  /// assert_eq!(view.get(&3), Some(&9));
  /// ```
  #[inline]
  pub fn lock(&self) -> View<'_, K, V, S, B> {
    View::lock(&self.inner)
  }

  /// Returns an unsynchronized [`View`] backed by a mutable borrow.
  ///
  /// No locks are taken: the borrow checker guarantees this is the only
  /// access to the table, which makes it the cheap choice for set-up and
  /// tear-down phases that own the table anyway.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let mut table: CTab<u64, u64> = CTab::new();
  ///
  /// let mut view = table.view_mut();
  /// view.insert(5, 50).unwrap();
  /// *view.get_mut(&5).unwrap() += 1;
  /// drop(view);
  ///
  /// assert_eq!(table.get(&5), Some(51));
  /// ```
  #[inline]
  pub fn view_mut(&mut self) -> View<'_, K, V, S, B> {
    View::exclusive(&self.inner)
  }
}

impl<K, V, S, const B: usize> CTab<K, V, S, B>
where
  K: Hash + Eq,
  S: BuildHasher,
{
  /// Returns a clone of the value stored for `key`.
  ///
  /// The clone is a snapshot taken under the bucket lock; the stored value
  /// may change the moment the lock is released. Use
  /// [`visit`](Self::visit) to read or modify in place.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// table.insert(1, 10).unwrap();
  /// assert_eq!(table.get(&1), Some(10));
  /// assert_eq!(table.get(&2), None);
  /// ```
  #[inline]
  pub fn get<Q>(&self, key: &Q) -> Option<V>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    V: Clone,
  {
    self.inner.with_value::<Locked, _, _, _>(key, |value| value.clone())
  }

  /// Returns `true` if the table holds an entry for `key`.
  #[inline]
  pub fn contains<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.inner.with_value::<Locked, _, _, _>(key, |_| ()).is_some()
  }

  /// Invokes `f` with a mutable reference to the value stored for `key`,
  /// under the bucket lock. Returns whether the key was found.
  ///
  /// `f` runs while the key's buckets are locked: keep it short, and do
  /// not touch this table from inside it.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<&str, u64> = CTab::new();
  ///
  /// table.insert("hits", 0).unwrap();
  /// assert!(table.visit("hits", |count| *count += 1));
  /// assert!(!table.visit("misses", |count| *count += 1));
  /// assert_eq!(table.get("hits"), Some(1));
  /// ```
  #[inline]
  pub fn visit<Q, F>(&self, key: &Q, f: F) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    F: FnOnce(&mut V),
  {
    self.inner.with_value::<Locked, _, _, _>(key, f).is_some()
  }

  /// Inserts `(key, value)`. A duplicate key leaves the existing value in
  /// place and drops the new one. Returns `true` when a new entry was
  /// created.
  ///
  /// # Errors
  ///
  /// Inserting may grow the table, which can fail with
  /// [`Error::MaximumHashpowerExceeded`] under a configured size cap, or
  /// [`Error::LoadFactorTooLow`] when growth fires on a nearly empty table
  /// (a sign of pathological hashing). With default settings growth never
  /// fails.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// assert!(table.insert(1, 10).unwrap());
  /// assert!(!table.insert(1, 20).unwrap());
  /// assert_eq!(table.get(&1), Some(10));
  /// ```
  #[inline]
  pub fn insert(&self, key: K, value: V) -> Result<bool, Error>
  where
    K: Send,
    V: Send,
    S: Sync,
  {
    self
      .inner
      .insert_with::<Locked, _>(key, value, true, |_, rejected| drop(rejected))
  }

  /// Inserts `(key, value)`, overwriting the existing value on a
  /// duplicate key. Returns `true` when a new entry was created.
  ///
  /// # Errors
  ///
  /// As for [`insert`](Self::insert).
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// assert!(table.insert_or_assign(5, 5).unwrap());
  /// assert!(!table.insert_or_assign(5, 100).unwrap());
  /// assert_eq!(table.get(&5), Some(100));
  /// ```
  #[inline]
  pub fn insert_or_assign(&self, key: K, value: V) -> Result<bool, Error>
  where
    K: Send,
    V: Send,
    S: Sync,
  {
    self
      .inner
      .insert_with::<Locked, _>(key, value, true, |existing, value| *existing = value)
  }

  /// Inserts `(key, value)` if the key is absent; otherwise invokes `f`
  /// with the existing value under the bucket lock and drops `value`.
  /// Returns `true` when a new entry was created.
  ///
  /// This is the one-round-trip way to build counters and accumulators.
  ///
  /// # Errors
  ///
  /// As for [`insert`](Self::insert).
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<&str, u64> = CTab::new();
  ///
  /// for word in ["a", "b", "a", "a"] {
  ///   table.insert_or_visit(word, 1, |count| *count += 1).unwrap();
  /// }
  ///
  /// assert_eq!(table.get("a"), Some(3));
  /// assert_eq!(table.get("b"), Some(1));
  /// ```
  #[inline]
  pub fn insert_or_visit<F>(&self, key: K, value: V, f: F) -> Result<bool, Error>
  where
    K: Send,
    V: Send,
    S: Sync,
    F: FnOnce(&mut V),
  {
    self
      .inner
      .insert_with::<Locked, _>(key, value, true, |existing, rejected| {
        drop(rejected);
        f(existing);
      })
  }

  /// Overwrites the value for `key` only if the key is present. Returns
  /// whether it was.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// assert!(!table.update(&42, 7));
  /// table.insert(42, 0).unwrap();
  /// assert!(table.update(&42, 7));
  /// assert_eq!(table.get(&42), Some(7));
  /// ```
  #[inline]
  pub fn update<Q>(&self, key: &Q, value: V) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self
      .inner
      .with_value::<Locked, _, _, _>(key, |existing| *existing = value)
      .is_some()
  }

  /// Removes the entry for `key`. Returns whether it was present.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// table.insert(1, 10).unwrap();
  /// assert!(table.remove(&1));
  /// assert!(!table.remove(&1));
  /// ```
  #[inline]
  pub fn remove<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.inner.remove_if::<Locked, _, _>(key, |_| true)
  }

  /// Looks up `key` and removes its entry only if `f`, invoked with the
  /// value under the bucket lock, returns `true`. Returns whether the key
  /// was found at all.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// table.insert(1, 3).unwrap();
  ///
  /// // Decrement, removing at zero.
  /// while table.remove_if(&1, |count| {
  ///   *count -= 1;
  ///   *count == 0
  /// }) {}
  ///
  /// assert_eq!(table.get(&1), None);
  /// ```
  #[inline]
  pub fn remove_if<Q, F>(&self, key: &Q, f: F) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    F: FnOnce(&mut V) -> bool,
  {
    self.inner.remove_if::<Locked, _, _>(key, f)
  }

  /// Destroys every entry. Capacity is unchanged.
  ///
  /// Takes every stripe lock for the duration, like [`lock`](Self::lock).
  #[inline]
  pub fn clear(&self) {
    self.inner.clear::<Locked>();
  }

  /// Rebuilds the table to the smallest size holding at least `capacity`
  /// entries, taking every stripe lock for the duration. May shrink.
  ///
  /// Returns `false` if a concurrent resize got there first.
  ///
  /// # Errors
  ///
  /// Fails with [`Error::MaximumHashpowerExceeded`] if the effective
  /// target breaches the configured limit.
  pub fn reserve(&self, capacity: usize) -> Result<bool, Error> {
    self.rehash(reserve_calc(capacity, B))
  }

  /// Rebuilds the table at (at least) the given hashpower, taking every
  /// stripe lock for the duration. Unlike automatic growth this may shrink
  /// the table; a target too small for the current entries is raised until
  /// they fit.
  ///
  /// Returns `false` if a concurrent resize got there first.
  ///
  /// # Errors
  ///
  /// As for [`reserve`](Self::reserve).
  pub fn rehash(&self, hashpower: usize) -> Result<bool, Error> {
    self.inner.expand_simple::<Locked>(hashpower, false, true)
  }
}

impl<K, V, S, const B: usize> Default for CTab<K, V, S, B>
where
  S: Default,
{
  #[inline]
  fn default() -> Self {
    Self::with_capacity_and_hasher(DEFAULT_CAPACITY, S::default())
  }
}

impl<K, V, S, const B: usize> Debug for CTab<K, V, S, B>
where
  K: Debug,
  V: Debug,
{
  /// Locks the whole table for the duration of formatting.
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    Debug::fmt(&self.lock(), f)
  }
}

impl<K, V, S, const B: usize> FromIterator<(K, V)> for CTab<K, V, S, B>
where
  K: Hash + Eq + Send,
  V: Send,
  S: BuildHasher + Default + Sync,
{
  /// Collects pairs, keeping the first value seen for each key.
  ///
  /// # Panics
  ///
  /// Panics if growth is refused; see [`CTab::insert`].
  fn from_iter<I>(iter: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
  {
    let iter = iter.into_iter();
    let (lower, _): (usize, Option<usize>) = iter.size_hint();

    let mut table: Self =
      Self::with_capacity_and_hasher(lower.max(DEFAULT_CAPACITY), S::default());

    table.view_mut().extend(iter);
    table
  }
}

// -----------------------------------------------------------------------------
// Draining Iterator
// -----------------------------------------------------------------------------

impl<K, V, S, const B: usize> IntoIterator for CTab<K, V, S, B> {
  type Item = (K, V);
  type IntoIter = IntoIter<K, V, S, B>;

  /// Consumes the table, yielding every entry in bucket-then-slot order.
  ///
  /// # Examples
  ///
  /// ```
  /// use ctab::CTab;
  ///
  /// let table: CTab<u64, u64> = CTab::new();
  ///
  /// table.insert(1, 10).unwrap();
  /// table.insert(2, 20).unwrap();
  ///
  /// let mut entries: Vec<(u64, u64)> = table.into_iter().collect();
  /// entries.sort_unstable();
  ///
  /// assert_eq!(entries, vec![(1, 10), (2, 20)]);
  /// ```
  fn into_iter(self) -> IntoIter<K, V, S, B> {
    IntoIter {
      table: self,
      position: 0,
    }
  }
}

/// Draining iterator over an owned [`CTab`].
///
/// Entries not yielded are destroyed when the iterator drops.
pub struct IntoIter<K, V, S, const B: usize> {
  table: CTab<K, V, S, B>,
  position: usize,
}

impl<K, V, S, const B: usize> Iterator for IntoIter<K, V, S, B> {
  type Item = (K, V);

  fn next(&mut self) -> Option<(K, V)> {
    // SAFETY: The iterator owns the table, so access is exclusive; each
    // occupied slot is taken at most once as the cursor only advances.
    unsafe {
      let buckets = self.table.inner.buckets();
      let total: usize = buckets.bucket_count() * B;

      while self.position < total {
        let position: usize = self.position;
        self.position += 1;

        if buckets.bucket(position / B).occupied(position % B) {
          return Some(buckets.take(position / B, position % B));
        }
      }

      None
    }
  }
}

impl<K, V, S, const B: usize> Debug for IntoIter<K, V, S, B> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("IntoIter(..)")
  }
}
