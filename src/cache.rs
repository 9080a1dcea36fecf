//! In-memory TTL cache shared by the dashboard's refresh cycle.
//!
//! Entries are never evicted in the background. `get` treats an entry as absent
//! once `now - created_at >= ttl` and drops it on the spot.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

#[derive(Clone, Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36_500)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[allow(dead_code)]
    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Same as [`TtlCache::get`] but evaluated at an explicit instant.
    pub fn get_at(&mut self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let fresh = {
            let entry = self.entries.get(key)?;
            self.is_fresh(entry, now)
        };
        if fresh {
            self.entries.get(key).map(|e| e.value.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    #[allow(dead_code)]
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        self.set_at(key, value, Utc::now());
    }

    pub fn set_at(&mut self, key: impl Into<String>, value: V, now: DateTime<Utc>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> CacheStats {
        let total_entries = self.entries.len();
        let valid_entries = self.entries.values().filter(|e| self.is_fresh(e, now)).count();
        CacheStats {
            total_entries,
            valid_entries,
            expired_entries: total_entries - valid_entries,
        }
    }

    #[allow(dead_code)]
    pub fn stats(&self) -> CacheStats {
        self.stats_at(Utc::now())
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.created_at) < self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 5, 0, 0).unwrap()
    }

    fn cache() -> TtlCache<String> {
        TtlCache::new(std::time::Duration::from_secs(300))
    }

    #[test]
    fn test_returns_value_before_ttl() {
        let mut c = cache();
        c.set_at("HBL_30", "payload".to_string(), t0());
        assert_eq!(c.get_at("HBL_30", t0()), Some("payload".to_string()));
        assert_eq!(
            c.get_at("HBL_30", t0() + Duration::seconds(299)),
            Some("payload".to_string())
        );
    }

    #[test]
    fn test_absent_after_ttl() {
        let mut c = cache();
        c.set_at("HBL_30", "payload".to_string(), t0());
        assert_eq!(c.get_at("HBL_30", t0() + Duration::seconds(301)), None);
        // the expired read dropped the entry
        assert_eq!(c.stats_at(t0()).total_entries, 0);
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let mut c = cache();
        c.set_at("k", "v".to_string(), t0());
        assert_eq!(c.get_at("k", t0() + Duration::seconds(300)), None);
    }

    #[test]
    fn test_missing_key() {
        let mut c = cache();
        assert_eq!(c.get_at("nope", t0()), None);
    }

    #[test]
    fn test_set_overwrites_and_resets_age() {
        let mut c = cache();
        c.set_at("k", "old".to_string(), t0());
        c.set_at("k", "new".to_string(), t0() + Duration::seconds(200));
        assert_eq!(
            c.get_at("k", t0() + Duration::seconds(400)),
            Some("new".to_string())
        );
    }

    #[test]
    fn test_stats_count_expired_without_evicting() {
        let mut c = cache();
        c.set_at("a", "1".to_string(), t0());
        c.set_at("b", "2".to_string(), t0() + Duration::seconds(250));
        let stats = c.stats_at(t0() + Duration::seconds(310));
        assert_eq!(
            stats,
            CacheStats {
                total_entries: 2,
                valid_entries: 1,
                expired_entries: 1
            }
        );
        c.clear();
        assert_eq!(c.stats_at(t0()).total_entries, 0);
    }

    #[test]
    fn test_wall_clock_get_and_set() {
        let mut c = cache();
        c.set("KSE-100_30", "series".to_string());
        assert_eq!(c.get("KSE-100_30"), Some("series".to_string()));
        assert_eq!(c.get("HBL_30"), None);
        assert_eq!(c.stats().valid_entries, 1);

        let mut stale: TtlCache<String> = TtlCache::new(std::time::Duration::ZERO);
        stale.set("k", "v".to_string());
        assert_eq!(stale.get("k"), None);
        assert_eq!(stale.stats().total_entries, 0);
    }

    #[test]
    fn test_zero_ttl_never_serves() {
        let mut c: TtlCache<u32> = TtlCache::new(std::time::Duration::ZERO);
        c.set_at("k", 1, t0());
        assert_eq!(c.get_at("k", t0()), None);
    }
}
