//! Canonical query intent: the structured fields a relation accumulates and
//! the finalization rules that turn them into a hashable map.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use super::modifiers::ModifierSet;

/// A query field value: either a literal, or a deferred computation resolved
/// at canonicalization time. Deferred values let callers embed expressions
/// that are evaluated when the query executes rather than when it is built.
#[derive(Clone)]
pub enum FieldValue {
    Literal(Value),
    Deferred(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl FieldValue {
    /// Wraps a closure to be invoked at `to_hash` time.
    pub fn deferred(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::Deferred(Arc::new(f))
    }

    /// Resolves the value, invoking a deferred computation if necessary.
    /// This is the only place a deferred value is ever called.
    pub fn resolve(&self) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Deferred(f) => f(),
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Deferred(_) => f.debug_tuple("Deferred").field(&"<fn>").finish(),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.into()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<Map<String, Value>> for FieldValue {
    fn from(value: Map<String, Value>) -> Self {
        Self::Literal(Value::Object(value))
    }
}

/// Nested association tree accumulated by `includes`.
///
/// Repeated calls union their sub-trees: `includes({foo: bar})` followed by
/// `includes({foo: poo})` yields `{foo: {bar: {}, poo: {}}}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncludesTree(pub BTreeMap<String, IncludesTree>);

impl IncludesTree {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unions `other` into `self`, recursively merging overlapping keys.
    pub fn merge(&mut self, other: &IncludesTree) {
        for (key, subtree) in &other.0 {
            self.0.entry(key.clone()).or_default().merge(subtree);
        }
    }

    /// Builds a tree from a dynamic value: a string is a leaf association,
    /// an array unions its entries, an object maps keys to sub-trees.
    /// Anything else produces an empty tree.
    pub fn from_value(value: &Value) -> Self {
        let mut tree = IncludesTree::default();
        match value {
            Value::String(name) => {
                tree.0.insert(name.clone(), IncludesTree::default());
            }
            Value::Array(entries) => {
                for entry in entries {
                    tree.merge(&IncludesTree::from_value(entry));
                }
            }
            Value::Object(map) => {
                for (key, sub) in map {
                    tree.0
                        .entry(key.clone())
                        .or_default()
                        .merge(&IncludesTree::from_value(sub));
                }
            }
            _ => {}
        }
        tree
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(key, subtree)| (key.clone(), subtree.to_value()))
                .collect(),
        )
    }
}

/// The accumulating per-relation field lists are short in practice.
pub(crate) type FieldList = SmallVec<[FieldValue; 4]>;

/// Accumulated query intent for one relation.
///
/// Single-valued fields replace on every write; multi-valued fields append
/// preserving order. The spec stays cheap to clone so every chained mutator
/// can copy-on-write it.
#[derive(Clone, Debug, Default)]
pub struct QuerySpec {
    pub(crate) limit: Option<FieldValue>,
    pub(crate) offset: Option<FieldValue>,
    pub(crate) from: Option<FieldValue>,
    pub(crate) includes: IncludesTree,
    pub(crate) raw_sql: Option<FieldValue>,
    pub(crate) select: FieldList,
    pub(crate) group: FieldList,
    pub(crate) order: FieldList,
    pub(crate) joins: FieldList,
    pub(crate) wheres: FieldList,
    pub(crate) having: FieldList,
    pub(crate) modifiers: ModifierSet,
}

impl QuerySpec {
    /// Finalizes the spec into its canonical map.
    ///
    /// A raw-SQL override trumps everything else: the result is exactly
    /// `{"sql": <value>}`. Otherwise set single-valued fields and non-empty
    /// multi-valued fields are emitted, deferred values resolved, multi
    /// values deduplicated preserving first occurrence. Modifiers never
    /// appear in the output.
    pub fn to_hash(&self) -> Map<String, Value> {
        let mut hash = Map::new();

        if let Some(sql) = &self.raw_sql {
            hash.insert("sql".into(), sql.resolve());
            return hash;
        }

        for (key, value) in [
            ("limit", &self.limit),
            ("offset", &self.offset),
            ("from", &self.from),
        ] {
            if let Some(value) = value {
                hash.insert(key.into(), value.resolve());
            }
        }

        if !self.includes.is_empty() {
            hash.insert("includes".into(), self.includes.to_value());
        }

        for (key, values) in [
            ("group", &self.group),
            ("order", &self.order),
            ("joins", &self.joins),
            ("where", &self.wheres),
            ("having", &self.having),
        ] {
            let resolved = resolve_unique(values);
            if !resolved.is_empty() {
                hash.insert(key.into(), Value::Array(resolved));
            }
        }

        // A select entry ending in a wildcard means "select everything";
        // the whole select list is dropped when one is present.
        let select = resolve_unique(&self.select);
        if !select.is_empty() && !select.iter().any(has_trailing_wildcard) {
            hash.insert("select".into(), Value::Array(select));
        }

        hash
    }
}

/// Resolves a multi-value list, removing duplicates while preserving the
/// first occurrence of each value.
fn resolve_unique(values: &FieldList) -> Vec<Value> {
    let mut resolved: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.resolve();
        if !resolved.contains(&value) {
            resolved.push(value);
        }
    }
    resolved
}

fn has_trailing_wildcard(value: &Value) -> bool {
    match value {
        Value::String(s) => s.ends_with('*'),
        other => other.to_string().ends_with('*'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn includes_tree_unions_overlapping_keys() {
        let mut tree = IncludesTree::from_value(&json!({"posts": "comments", "site": "owner"}));
        tree.merge(&IncludesTree::from_value(&json!({"posts": "author"})));
        tree.merge(&IncludesTree::from_value(&json!("posts")));

        assert_eq!(
            tree.to_value(),
            json!({"posts": {"comments": {}, "author": {}}, "site": {"owner": {}}})
        );
    }

    #[test]
    fn raw_sql_trumps_other_fields() {
        let mut spec = QuerySpec::default();
        spec.wheres.push("name = 'x'".into());
        spec.limit = Some(5u64.into());
        spec.raw_sql = Some("select * from sites".into());

        let hash = spec.to_hash();
        assert_eq!(hash.len(), 1);
        assert_eq!(hash["sql"], json!("select * from sites"));
    }

    #[test]
    fn multi_values_deduplicate_in_order() {
        let mut spec = QuerySpec::default();
        spec.wheres.push("a".into());
        spec.wheres.push("b".into());
        spec.wheres.push("a".into());

        assert_eq!(spec.to_hash()["where"], json!(["a", "b"]));
    }

    #[test]
    fn trailing_wildcard_drops_select_entirely() {
        let mut spec = QuerySpec::default();
        spec.select.push("foo".into());
        assert_eq!(spec.to_hash()["select"], json!(["foo"]));

        spec.select.push("*bar".into());
        assert_eq!(spec.to_hash()["select"], json!(["foo", "*bar"]));

        spec.select.push("baz*".into());
        assert!(!spec.to_hash().contains_key("select"));
    }

    #[test]
    fn deferred_values_resolve_at_hash_time() {
        let mut spec = QuerySpec::default();
        spec.order.push(FieldValue::deferred(|| json!("created_at")));
        spec.limit = Some(FieldValue::deferred(|| json!(10)));

        let hash = spec.to_hash();
        assert_eq!(hash["order"], json!(["created_at"]));
        assert_eq!(hash["limit"], json!(10));
    }
}
