//! TTL-based result caching keyed by a canonical query fingerprint.
//!
//! [`CacheMiddleware`] is a pipeline stage: it fingerprints the relation,
//! consults its own [`Store`], and on a miss delegates downstream then
//! writes back. Caching is a performance layer only: a failing downstream
//! call fails identically with or without it. [`CachePolicy`] holds the
//! shared lookup/write-back logic so the fetcher-level decorator behaves
//! the same way.

mod store;

pub use store::{CacheEntry, Store};

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::adapter::{CallOptions, Handler, MiddlewareFactory, Mode, Payload};
use crate::error::Result;
use crate::record::Record;
use crate::relation::{Relation, truthy};
use crate::trestle_trace_cache;

/// Deterministic cache key: SHA-256 over the source identity and the
/// canonical query hash. The hash map orders fields by full field name, so
/// serialization is canonical without an explicit sort.
pub fn fingerprint(relation: &Relation) -> String {
    let canonical = Value::Object(relation.to_hash()).to_string();
    let mut hasher = Sha256::new();
    hasher.update(relation.source_name().as_bytes());
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing to a String cannot fail.
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// Write-back and freshness rules shared by the middleware and the
/// fetcher-level caching decorator.
#[derive(Clone, Debug)]
pub struct CachePolicy {
    /// Result sets larger than this are never written back. Unset means
    /// unlimited.
    pub record_count_threshold: Option<usize>,
    /// Expiry for entries whose records carry no expires-at attribute.
    pub default_longevity: Duration,
    /// Record attribute holding a per-record expiry (RFC 3339 or epoch
    /// seconds), consulted on the first record of a result set.
    pub expires_attribute: Option<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            record_count_threshold: None,
            default_longevity: Store::default_longevity(),
            expires_attribute: None,
        }
    }
}

impl CachePolicy {
    /// Reads a policy from a middleware registration's options map.
    /// Recognized keys: `record_count_threshold`, `longevity_secs`,
    /// `expires_attribute`.
    pub fn from_options(options: &Map<String, Value>) -> Self {
        let mut policy = Self::default();
        if let Some(threshold) = options.get("record_count_threshold").and_then(Value::as_u64) {
            policy.record_count_threshold = Some(threshold as usize);
        }
        if let Some(secs) = options.get("longevity_secs").and_then(Value::as_u64) {
            policy.default_longevity = Duration::seconds(secs as i64);
        }
        if let Some(attr) = options.get("expires_attribute").and_then(Value::as_str) {
            policy.expires_attribute = Some(attr.into());
        }
        policy
    }

    pub fn store(&self) -> Store {
        Store::new(self.default_longevity)
    }

    /// The cache state machine for one read: fresh-check, store-lookup,
    /// then hit (records marked stale) or miss (delegate, conditional
    /// write-back, records marked fresh).
    ///
    /// A truthy `fresh` modifier bypasses the read without invalidating the
    /// stored entry; `reset_cache` clears the entry first. Empty results
    /// and results over the count threshold are never written back.
    pub fn fetch_through(
        &self,
        store: &Mutex<Store>,
        relation: &Relation,
        downstream: impl FnOnce() -> Result<Vec<Record>>,
    ) -> Result<Vec<Record>> {
        let modifiers = relation.modifiers_value()?;
        let key = fingerprint(relation);

        if truthy(modifiers.get("reset_cache")) {
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear(Some(&key));
        } else if !truthy(modifiers.get("fresh")) {
            let hit = store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read(&key)
                .cloned();
            if let Some(mut records) = hit {
                trestle_trace_cache!("hit", relation.source_name());
                for record in &mut records {
                    record.fresh = Some(false);
                }
                return Ok(records);
            }
        }

        let mut records = downstream()?;
        trestle_trace_cache!("miss", relation.source_name());

        let within_threshold = self
            .record_count_threshold
            .is_none_or(|threshold| records.len() <= threshold);
        if !records.is_empty() && within_threshold {
            let expire_at = self
                .expires_attribute
                .as_deref()
                .and_then(|attr| records[0].get(attr))
                .and_then(parse_expiry);
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write(key, records.clone(), expire_at);
        }
        for record in &mut records {
            record.fresh = Some(true);
        }
        Ok(records)
    }
}

/// A per-record expiry attribute is either an RFC 3339 timestamp or epoch
/// seconds. Unparseable values fall back to the default longevity.
fn parse_expiry(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Caching pipeline stage. Each instance owns an independent store, so
/// resetting one adapter's cache never affects a sibling adapter's.
pub struct CacheMiddleware {
    inner: Arc<dyn Handler>,
    store: Mutex<Store>,
    policy: CachePolicy,
}

impl CacheMiddleware {
    pub fn new(inner: Arc<dyn Handler>, policy: CachePolicy) -> Self {
        let store = Mutex::new(policy.store());
        Self {
            inner,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Replaces the store, optionally with a different longevity. Sibling
    /// middleware instances are unaffected.
    pub fn reset_store(&self, longevity: Option<Duration>) {
        let longevity = longevity.unwrap_or(self.policy.default_longevity);
        *self.store.lock().unwrap_or_else(PoisonError::into_inner) = Store::new(longevity);
    }

    /// Number of entries currently held, expired or not.
    pub fn store_len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Handler for CacheMiddleware {
    fn call(&self, options: CallOptions) -> Result<Payload> {
        // Only relation-bearing reads are cacheable; everything else passes
        // straight through. No-op calls reach the downstream region
        // uncached; the inner execute stage is what intercepts them.
        if options.mode != Mode::Read || options.noop() {
            return self.inner.call(options);
        }
        let Some(relation) = options.relation.clone() else {
            return self.inner.call(options);
        };
        let inner = &self.inner;
        let records = self
            .policy
            .fetch_through(&self.store, &relation, move || {
                inner.call(options).map(Payload::into_records)
            })?;
        Ok(Payload::Records(records))
    }
}

/// Registers the cache middleware in an [`AdapterConfig`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheMiddlewareFactory;

impl MiddlewareFactory for CacheMiddlewareFactory {
    fn name(&self) -> &str {
        "cache_records"
    }

    fn build(&self, inner: Arc<dyn Handler>, options: &Map<String, Value>) -> Arc<dyn Handler> {
        Arc::new(CacheMiddleware::new(
            inner,
            CachePolicy::from_options(options),
        ))
    }
}
