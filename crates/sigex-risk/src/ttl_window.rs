//! Time-bounded key -> last-seen cache.
//!
//! One abstraction backs every suppression window in the ledger:
//! duplicate signals, correlation-group cooldown, per-strategy failure
//! cooldown, volatility throttling and the per-minute flood buckets.
//! An entry is live while `now < stamped_at + ttl`. Expired entries are
//! ignored on read and removed by [`TtlWindow::evict_expired`].

use chrono::{DateTime, Duration, Utc};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Entry<V> {
    stamped_at: DateTime<Utc>,
    value: V,
}

/// Generic TTL cache with an optional per-key payload.
#[derive(Debug, Clone)]
pub struct TtlWindow<K, V = ()> {
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> TtlWindow<K, V>
where
    K: Eq + Hash,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `key` was stamped within the TTL.
    pub fn is_active<Q>(&self, key: &Q, now: DateTime<Utc>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .is_some_and(|e| now < e.stamped_at + self.ttl)
    }

    /// Time left until `key` expires, if live.
    pub fn remaining<Q>(&self, key: &Q, now: DateTime<Utc>) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let e = self.entries.get(key)?;
        let until = e.stamped_at + self.ttl;
        (now < until).then(|| until - now)
    }

    /// Payload of a live entry.
    pub fn get<Q>(&self, key: &Q, now: DateTime<Utc>) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .filter(|e| now < e.stamped_at + self.ttl)
            .map(|e| &e.value)
    }

    /// Stamp `key` at `now`, updating the payload in place.
    ///
    /// An expired entry starts again from `V::default()`.
    pub fn upsert(&mut self, key: K, now: DateTime<Utc>, update: impl FnOnce(&mut V)) -> &V
    where
        V: Default,
    {
        let ttl = self.ttl;
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            stamped_at: now,
            value: V::default(),
        });
        if now >= entry.stamped_at + ttl {
            entry.value = V::default();
        }
        entry.stamped_at = now;
        update(&mut entry.value);
        &entry.value
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| now < e.stamped_at + ttl);
        before - self.entries.len()
    }

    /// Forget `key`. Returns `true` if it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K> TtlWindow<K, ()>
where
    K: Eq + Hash + Clone,
{
    /// Stamp `key` at `now`.
    pub fn touch(&mut self, key: K, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            Entry {
                stamped_at: now,
                value: (),
            },
        );
    }

    /// Live keys with their stamps, for snapshots.
    pub fn active_entries(&self, now: DateTime<Utc>) -> Vec<(K, DateTime<Utc>)> {
        self.entries
            .iter()
            .filter(|(_, e)| now < e.stamped_at + self.ttl)
            .map(|(k, e)| (k.clone(), e.stamped_at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 5, 0, 0).unwrap()
    }

    #[test]
    fn test_touch_and_expire() {
        let mut w: TtlWindow<String> = TtlWindow::new(Duration::minutes(5));
        w.touch("INFY:long:orb".to_string(), t0());

        assert!(w.is_active("INFY:long:orb", t0() + Duration::minutes(4)));
        assert!(!w.is_active("INFY:long:orb", t0() + Duration::minutes(5)));
        assert!(!w.is_active("TCS:long:orb", t0()));
    }

    #[test]
    fn test_remaining() {
        let mut w: TtlWindow<String> = TtlWindow::new(Duration::minutes(5));
        w.touch("k".to_string(), t0());
        assert_eq!(
            w.remaining("k", t0() + Duration::minutes(2)),
            Some(Duration::minutes(3))
        );
        assert_eq!(w.remaining("k", t0() + Duration::minutes(6)), None);
    }

    #[test]
    fn test_upsert_counts_within_ttl_and_restarts_after() {
        let mut w: TtlWindow<i64, u32> = TtlWindow::new(Duration::seconds(60));
        w.upsert(1, t0(), |c| *c += 1);
        w.upsert(1, t0() + Duration::seconds(10), |c| *c += 1);
        assert_eq!(w.get(&1, t0() + Duration::seconds(20)), Some(&2));

        // Expired entry restarts from zero.
        let v = *w.upsert(1, t0() + Duration::seconds(200), |c| *c += 1);
        assert_eq!(v, 1);
    }

    #[test]
    fn test_evict_expired() {
        let mut w: TtlWindow<String> = TtlWindow::new(Duration::minutes(1));
        w.touch("a".to_string(), t0());
        w.touch("b".to_string(), t0() + Duration::minutes(2));
        assert_eq!(w.evict_expired(t0() + Duration::seconds(150)), 1);
        assert_eq!(w.len(), 1);
        assert_eq!(w.active_entries(t0() + Duration::seconds(150)).len(), 1);
    }
}
