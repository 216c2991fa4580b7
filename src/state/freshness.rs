use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Keyed store where staleness is a read-time label, not an eviction trigger.
///
/// Expired entries are still returned (flagged `stale`) so callers can keep
/// serving the last good value instead of going empty. Writes replace the whole
/// entry, so concurrent readers see either the previous or the new value.
pub struct FreshnessCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    written_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.written_at).num_milliseconds();
        age_ms > self.ttl.as_millis().min(i64::MAX as u128) as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub written_at: DateTime<Utc>,
    pub stale: bool,
}

impl<K, V> FreshnessCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.put_at(key, value, ttl, Utc::now());
    }

    pub fn put_at(&self, key: K, value: V, ttl: Duration, written_at: DateTime<Utc>) {
        self.entries.insert(key, CacheEntry { value, written_at, ttl });
    }

    pub fn get(&self, key: &K) -> Option<Cached<V>> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<Cached<V>> {
        self.entries.get(key).map(|e| Cached {
            value: e.value.clone(),
            written_at: e.written_at,
            stale: e.is_stale_at(now),
        })
    }

    pub fn is_fresh(&self, key: &K) -> bool {
        self.get(key).map_or(false, |c| !c.stale)
    }

    /// `(stale, total)` over every held key.
    pub fn stale_counts_at(&self, now: DateTime<Utc>) -> (usize, usize) {
        let total = self.entries.len();
        let stale = self.entries.iter().filter(|e| e.value().is_stale_at(now)).count();
        (stale, total)
    }

    /// Fraction of held keys that are stale; None when the cache is empty.
    pub fn stale_ratio(&self) -> Option<f64> {
        self.stale_ratio_at(Utc::now())
    }

    pub fn stale_ratio_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let (stale, total) = self.stale_counts_at(now);
        if total == 0 {
            None
        } else {
            Some(stale as f64 / total as f64)
        }
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<(K, Cached<V>)> {
        let now = Utc::now();
        self.entries
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    Cached { value: e.value.clone(), written_at: e.written_at, stale: e.is_stale_at(now) },
                )
            })
            .collect()
    }
}

impl<K, V> Default for FreshnessCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn entry_past_ttl_is_stale_but_still_returned() {
        let cache: FreshnessCache<&str, u32> = FreshnessCache::new();
        let now = Utc::now();
        cache.put_at("nfl", 7, Duration::from_secs(300), now - ChronoDuration::seconds(301));

        let got = cache.get_at(&"nfl", now).expect("stale entries are never dropped");
        assert!(got.stale);
        assert_eq!(got.value, 7);
    }

    #[test]
    fn entry_within_ttl_is_fresh() {
        let cache: FreshnessCache<&str, u32> = FreshnessCache::new();
        let now = Utc::now();
        cache.put_at("nba", 1, Duration::from_secs(300), now - ChronoDuration::seconds(300));
        assert!(!cache.get_at(&"nba", now).unwrap().stale);
    }

    #[test]
    fn put_overwrites_and_resets_age() {
        let cache: FreshnessCache<&str, u32> = FreshnessCache::new();
        let now = Utc::now();
        cache.put_at("mlb", 1, Duration::from_secs(60), now - ChronoDuration::seconds(600));
        cache.put_at("mlb", 2, Duration::from_secs(60), now);
        let got = cache.get_at(&"mlb", now).unwrap();
        assert_eq!(got.value, 2);
        assert!(!got.stale);
        assert_eq!(cache.stale_counts_at(now), (0, 1));
    }

    #[test]
    fn stale_ratio_counts_held_keys() {
        let cache: FreshnessCache<u8, ()> = FreshnessCache::new();
        let now = Utc::now();
        assert_eq!(cache.stale_ratio_at(now), None);

        let ttl = Duration::from_secs(10);
        cache.put_at(1, (), ttl, now - ChronoDuration::seconds(11));
        cache.put_at(2, (), ttl, now);
        cache.put_at(3, (), ttl, now - ChronoDuration::seconds(20));
        cache.put_at(4, (), ttl, now);

        assert_eq!(cache.stale_counts_at(now), (2, 4));
        assert_eq!(cache.stale_ratio_at(now), Some(0.5));
    }

    #[test]
    fn missing_key_is_none() {
        let cache: FreshnessCache<&str, u32> = FreshnessCache::new();
        assert!(cache.get(&"nhl").is_none());
        assert!(!cache.is_fresh(&"nhl"));
    }
}
