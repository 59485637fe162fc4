//! TTL-keyed result store.
//!
//! Expiration is lazy: `read` treats an expired entry as absent without
//! removing it, and `write` sweeps all expired entries as a side effect.
//! There is no background process.

use chrono::{DateTime, Duration, Utc};
use hashbrown::HashMap;

use crate::record::Record;

/// A cached result set and the instant it stops being served.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub value: Vec<Record>,
    pub expire_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }
}

/// Fingerprint-keyed store with per-entry expiry.
#[derive(Debug)]
pub struct Store {
    entries: HashMap<String, CacheEntry>,
    default_longevity: Duration,
}

impl Store {
    /// Entries written without an explicit expiry live this long.
    pub fn default_longevity() -> Duration {
        Duration::minutes(5)
    }

    pub fn new(default_longevity: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_longevity,
        }
    }

    pub fn longevity(&self) -> Duration {
        self.default_longevity
    }

    /// Inserts an entry, sweeping every already-expired entry first.
    /// `expire_at` defaults to now plus the store's longevity.
    pub fn write(
        &mut self,
        key: impl Into<String>,
        value: Vec<Record>,
        expire_at: Option<DateTime<Utc>>,
    ) {
        let now = Utc::now();
        self.entries.retain(|_, entry| !entry.expired(now));
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expire_at: expire_at.unwrap_or(now + self.default_longevity),
            },
        );
    }

    /// Returns the entry's value if present and not expired. An expired
    /// entry is left in place for the next sweep.
    pub fn read(&self, key: &str) -> Option<&Vec<Record>> {
        let now = Utc::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.expired(now))
            .map(|entry| &entry.value)
    }

    /// With a key, removes that entry unconditionally regardless of expiry.
    /// Without one, removes only the expired entries.
    pub fn clear(&mut self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.entries.remove(key);
            }
            None => {
                let now = Utc::now();
                self.entries.retain(|_, entry| !entry.expired(now));
            }
        }
    }

    /// Raw presence check, ignoring expiry. Useful for observing sweeps.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Self::default_longevity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Vec<Record> {
        vec![Record::default()]
    }

    #[test]
    fn write_then_read_within_longevity() {
        let mut store = Store::default();
        store.write("foo", record(), None);
        assert!(store.read("foo").is_some());
        assert!(store.read("baz").is_none());
    }

    #[test]
    fn expired_entry_is_absent_but_not_removed() {
        let mut store = Store::default();
        store.write("foo", record(), Some(Utc::now()));
        assert!(store.read("foo").is_none());
        assert!(store.contains_key("foo"));
    }

    #[test]
    fn write_sweeps_expired_entries() {
        let mut store = Store::default();
        store.write("duck", record(), Some(Utc::now()));
        store.write("happy", record(), None);
        assert!(!store.contains_key("duck"));
        assert!(store.contains_key("happy"));
    }

    #[test]
    fn keyed_clear_ignores_expiry_and_keyless_clear_respects_it() {
        let mut store = Store::default();
        store.write("foo", record(), None);
        store.entries.insert(
            "expired".into(),
            CacheEntry {
                value: record(),
                expire_at: Utc::now(),
            },
        );

        store.clear(Some("foo"));
        assert!(!store.contains_key("foo"));
        assert!(store.contains_key("expired"));

        store.write("foo", record(), None);
        store.entries.insert(
            "expired".into(),
            CacheEntry {
                value: record(),
                expire_at: Utc::now(),
            },
        );
        store.clear(None);
        assert!(!store.contains_key("expired"));
        assert!(store.contains_key("foo"));
    }
}
