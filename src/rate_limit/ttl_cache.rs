//! Time-to-live cache with a hard size bound.
//!
//! Entries expire a fixed duration after they were inserted or last refreshed.
//! Time is passed in explicitly as clock milliseconds, so the cache follows the
//! owning limiter's [`Clock`](crate::clock::Clock) rather than wall time.
//!
//! Expired entries are only physically removed by [`TtlCache::cleanup`] or when
//! an insert finds the cache full, which keeps lookups cheap.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use adaptive_rate_limit::rate_limit::TtlCache;
//!
//! let mut cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60), 1_000);
//!
//! cache.insert("client-a".to_string(), 3, 0);
//! assert_eq!(cache.get(&"client-a".to_string(), 59_999), Some(&3));
//! assert_eq!(cache.get(&"client-a".to_string(), 60_000), None);
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// A size-bounded cache whose entries expire after a configurable TTL.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    cache: HashMap<K, (V, u64)>,
    ttl_ms: u64,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a new cache holding at most `max_entries` entries.
    ///
    /// A `max_entries` of zero is treated as one.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: HashMap::new(),
            ttl_ms: ttl.as_millis() as u64,
            max_entries: max_entries.max(1),
        }
    }

    fn is_live(&self, stamped_at: u64, now: u64) -> bool {
        now.saturating_sub(stamped_at) < self.ttl_ms
    }

    /// Insert a value stamped at `now`.
    ///
    /// If the key is new and the cache is full, expired entries are swept first and,
    /// if that frees nothing, the entry with the oldest stamp is evicted and returned.
    pub fn insert(&mut self, key: K, value: V, now: u64) -> Option<(K, V)> {
        let evicted = if self.cache.contains_key(&key) {
            None
        } else {
            self.make_room(now)
        };
        self.cache.insert(key, (value, now));
        evicted
    }

    /// Get a live entry, restamped at `now`, or insert one built by `make`.
    ///
    /// An expired entry under the same key is replaced.
    pub fn get_or_insert_with<F>(&mut self, key: K, now: u64, make: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        if !self.refresh(&key, now) {
            self.cache.remove(&key);
            self.make_room(now);
        }
        let (value, _) = self.cache.entry(key).or_insert_with(|| (make(), now));
        value
    }

    fn make_room(&mut self, now: u64) -> Option<(K, V)> {
        if self.cache.len() < self.max_entries {
            return None;
        }
        self.cleanup(now);
        if self.cache.len() < self.max_entries {
            return None;
        }
        self.evict_oldest()
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let oldest = self
            .cache
            .iter()
            .min_by_key(|(_, (_, stamped_at))| *stamped_at)
            .map(|(key, _)| key.clone())?;
        self.cache.remove(&oldest).map(|(value, _)| (oldest, value))
    }

    /// Get a reference to a value if it exists and hasn't expired.
    pub fn get(&self, key: &K, now: u64) -> Option<&V> {
        self.cache
            .get(key)
            .filter(|(_, stamped_at)| self.is_live(*stamped_at, now))
            .map(|(value, _)| value)
    }

    /// Get a mutable reference to a value if it exists and hasn't expired.
    pub fn get_mut(&mut self, key: &K, now: u64) -> Option<&mut V> {
        let ttl_ms = self.ttl_ms;
        self.cache.get_mut(key).and_then(|(value, stamped_at)| {
            if now.saturating_sub(*stamped_at) < ttl_ms {
                Some(value)
            } else {
                None
            }
        })
    }

    /// Restamp a live entry at `now`, extending its lifetime.
    ///
    /// Returns `false` if the key doesn't exist or has expired.
    pub fn refresh(&mut self, key: &K, now: u64) -> bool {
        let ttl_ms = self.ttl_ms;
        match self.cache.get_mut(key) {
            Some((_, stamped_at)) if now.saturating_sub(*stamped_at) < ttl_ms => {
                *stamped_at = now;
                true
            }
            _ => false,
        }
    }

    /// Get the age of a live entry.
    pub fn get_age(&self, key: &K, now: u64) -> Option<Duration> {
        self.cache.get(key).and_then(|(_, stamped_at)| {
            if self.is_live(*stamped_at, now) {
                Some(Duration::from_millis(now.saturating_sub(*stamped_at)))
            } else {
                None
            }
        })
    }

    /// Remove an entry.
    ///
    /// Returns the value if it existed and hadn't expired, `None` otherwise.
    pub fn remove(&mut self, key: &K, now: u64) -> Option<V> {
        let ttl_ms = self.ttl_ms;
        self.cache.remove(key).and_then(|(value, stamped_at)| {
            if now.saturating_sub(stamped_at) < ttl_ms {
                Some(value)
            } else {
                None
            }
        })
    }

    /// Check if a key exists and hasn't expired.
    pub fn contains(&self, key: &K, now: u64) -> bool {
        self.get(key, now).is_some()
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn cleanup(&mut self, now: u64) -> usize {
        let ttl_ms = self.ttl_ms;
        let before = self.cache.len();
        self.cache
            .retain(|_, (_, stamped_at)| now.saturating_sub(*stamped_at) < ttl_ms);
        before - self.cache.len()
    }

    /// Iterate mutably over live entries.
    pub fn values_mut(&mut self, now: u64) -> impl Iterator<Item = &mut V> {
        let ttl_ms = self.ttl_ms;
        self.cache
            .values_mut()
            .filter(move |(_, stamped_at)| now.saturating_sub(*stamped_at) < ttl_ms)
            .map(|(value, _)| value)
    }

    /// Get the number of entries in the cache (including expired ones).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Get the number of non-expired entries.
    pub fn active_count(&self, now: u64) -> usize {
        self.cache
            .values()
            .filter(|(_, stamped_at)| self.is_live(*stamped_at, now))
            .count()
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Get the TTL duration for this cache.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Get the size bound.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}
