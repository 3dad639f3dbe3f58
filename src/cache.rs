//! Bounded LRU+TTL cache backing fetch results.
//!
//! Combines two independent eviction policies: capacity-bounded LRU (who gets evicted
//! when the cache is full) and per-entry TTL (when a surviving entry stops being valid).
//! TTL is evaluated lazily on read rather than via a background sweep, mirroring the way
//! `hack-ink-jwks-cache`'s `CachePayload::is_expired` is checked at the point of use
//! instead of on a timer.

use std::{num::NonZeroUsize, time::Duration};

use lru::LruCache;
use tokio::time::Instant;

/// A cached value together with the monotonic instant it was written.
#[derive(Clone, Debug)]
struct Entry<T> {
	data: T,
	ts: Instant,
}

/// Bounded mapping from string key to a value of type `T`, evicting least-recently-used
/// entries at capacity and expiring entries whose TTL has elapsed.
///
/// `has` promotes LRU order exactly like `get` does, since it is implemented in terms of
/// it — this asymmetry is intentional and preserved rather than "fixed".
#[derive(Debug)]
pub struct Cache<T> {
	inner: LruCache<String, Entry<T>>,
	ttl: Duration,
}
impl<T> Cache<T> {
	/// Construct a cache with the given capacity (must be at least 1) and TTL.
	///
	/// A TTL of [`Duration::ZERO`] means entries expire the instant the clock advances
	/// past their write time.
	pub fn new(capacity: usize, ttl: Duration) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());

		Self { inner: LruCache::new(capacity), ttl }
	}

	/// Look up a key, returning `None` if absent or expired.
	///
	/// TTL is inclusive on the upper bound: an entry written `ttl` ago is still valid,
	/// one written `ttl + 1ms` ago is not. A hit promotes the entry to most-recently-used;
	/// an expired entry is removed as a side effect of this call.
	pub fn get(&mut self, key: &str) -> Option<T>
	where
		T: Clone,
	{
		let expired = match self.inner.peek(key) {
			Some(entry) => self.is_expired(entry),
			None => return None,
		};

		if expired {
			self.inner.pop(key);

			None
		} else {
			self.inner.get(key).map(|entry| entry.data.clone())
		}
	}

	/// Insert or overwrite a key. Resets the entry's TTL clock and promotes it to
	/// most-recently-used; evicts the least-recently-used entry first if inserting a new
	/// key at capacity.
	pub fn set(&mut self, key: impl Into<String>, value: T) {
		self.inner.put(key.into(), Entry { data: value, ts: Instant::now() });
	}

	/// Remove an entry if present; a no-op otherwise.
	pub fn invalidate(&mut self, key: &str) {
		self.inner.pop(key);
	}

	/// Remove every entry.
	pub fn clear(&mut self) {
		self.inner.clear();
	}

	/// Whether `get(key)` would currently return `Some`. Promotes LRU order as a side
	/// effect, same as `get`.
	pub fn has(&mut self, key: &str) -> bool
	where
		T: Clone,
	{
		self.get(key).is_some()
	}

	/// Current entry count; may include expired entries that have not yet been touched.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Whether the cache currently holds no entries.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	fn is_expired(&self, entry: &Entry<T>) -> bool {
		Instant::now().saturating_duration_since(entry.ts) > self.ttl
	}
}
