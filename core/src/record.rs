//! The uniform result row handed back by every backend.
//!
//! A [`Record`] is an attribute map plus a cache-freshness flag. Materializing
//! records into richer application objects is the model layer's concern; this
//! carrier is the only shape the pipeline itself understands.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single result row: named attributes and an optional freshness flag.
///
/// `fresh` is `None` until a cache-aware stage has seen the record:
/// `Some(true)` means it came straight from the backend, `Some(false)` means
/// it was served from the cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fresh: Option<bool>,
}

impl Record {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self {
            attributes,
            fresh: None,
        }
    }

    /// Returns the named attribute, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns the value of the given primary-key attribute.
    pub fn id(&self, primary_key: &str) -> Option<&Value> {
        self.attributes.get(primary_key)
    }

    /// Whether this record was fetched from the backend rather than the cache.
    /// `None` when no cache-aware stage has processed the record.
    pub fn is_fresh(&self) -> Option<bool> {
        self.fresh
    }
}

impl From<Map<String, Value>> for Record {
    fn from(attributes: Map<String, Value>) -> Self {
        Self::new(attributes)
    }
}
