//! Out-of-band per-call flags layered onto a relation.
//!
//! Modifiers ride alongside the query fields but are excluded from the
//! canonical hash, so they never affect a cache fingerprint. Assignment is
//! always accepted; type validation happens when the set is finalized.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::{Result, TrestleError};

/// One modifier assignment. `Raw` holds a value that is neither a map nor a
/// deferred call; it is kept verbatim and rejected only at finalization.
#[derive(Clone)]
pub enum ModifierArg {
    Map(Map<String, Value>),
    Deferred(Arc<dyn Fn() -> Value + Send + Sync>),
    Raw(Value),
    /// Clears every previously assigned entry.
    Reset,
}

impl ModifierArg {
    pub fn deferred(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::Deferred(Arc::new(f))
    }
}

impl fmt::Debug for ModifierArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Self::Deferred(_) => f.debug_tuple("Deferred").field(&"<fn>").finish(),
            Self::Raw(value) => f.debug_tuple("Raw").field(value).finish(),
            Self::Reset => f.write_str("Reset"),
        }
    }
}

impl From<Map<String, Value>> for ModifierArg {
    fn from(map: Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

/// A null value resets the set, mirroring a `modifiers(nil)`-style clear.
impl From<Value> for ModifierArg {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Reset,
            Value::Object(map) => Self::Map(map),
            other => Self::Raw(other),
        }
    }
}

/// Ordered collection of modifier entries for one relation.
#[derive(Clone, Debug, Default)]
pub struct ModifierSet {
    entries: SmallVec<[ModifierArg; 2]>,
}

impl ModifierSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry, or clears the set for a `Reset` argument.
    pub fn push(&mut self, arg: ModifierArg) {
        match arg {
            ModifierArg::Reset => self.entries.clear(),
            other => self.entries.push(other),
        }
    }

    /// Concatenates another set's entries after this set's, so the other
    /// set wins key conflicts at finalization.
    pub fn append(&mut self, other: &ModifierSet) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Merges every entry in insertion order into a single map, later keys
    /// winning. Fails if an entry is neither a map nor a deferred call
    /// returning a map; this is where lazy validation surfaces.
    pub fn finalize(&self) -> Result<Map<String, Value>> {
        let mut merged = Map::new();
        for entry in &self.entries {
            let map = match entry {
                ModifierArg::Map(map) => map.clone(),
                ModifierArg::Deferred(f) => match f() {
                    Value::Object(map) => map,
                    other => {
                        return Err(TrestleError::ModifierType(other.to_string()));
                    }
                },
                ModifierArg::Raw(value) => {
                    return Err(TrestleError::ModifierType(value.to_string()));
                }
                ModifierArg::Reset => unreachable!("push never stores Reset"),
            };
            for (key, value) in map {
                merged.insert(key, value);
            }
        }
        Ok(merged)
    }
}

/// Ruby-style truthiness for modifier flags: anything but absent, null, or
/// `false` counts as set.
pub fn truthy(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn merges_entries_in_insertion_order() {
        let mut set = ModifierSet::default();
        set.push(ModifierArg::deferred(|| json!({"foo": "boo"})));
        set.push(map(json!({"foo": "bar"})).into());
        set.push(map(json!({"biz": "baz"})).into());

        assert_eq!(set.finalize().unwrap(), map(json!({"foo": "bar", "biz": "baz"})));
    }

    #[test]
    fn reset_clears_prior_entries() {
        let mut set = ModifierSet::default();
        set.push(map(json!({"foo": "bar"})).into());
        set.push(Value::Null.into());

        assert!(set.is_empty());
        assert_eq!(set.finalize().unwrap(), Map::new());
    }

    #[test]
    fn non_map_value_fails_at_finalize_only() {
        let mut set = ModifierSet::default();
        set.push(json!("errk").into());

        assert!(matches!(
            set.finalize(),
            Err(TrestleError::ModifierType(_))
        ));
    }

    #[test]
    fn deferred_must_return_a_map() {
        let mut set = ModifierSet::default();
        set.push(ModifierArg::deferred(|| json!("gah")));

        assert!(matches!(
            set.finalize(),
            Err(TrestleError::ModifierType(_))
        ));
    }

    #[test]
    fn truthiness() {
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!(1))));
        assert!(!truthy(Some(&json!(false))));
        assert!(!truthy(Some(&Value::Null)));
        assert!(!truthy(None));
    }
}
