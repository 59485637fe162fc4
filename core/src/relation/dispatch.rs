//! Dynamic method dispatch for relations.
//!
//! An ordered chain of capability checks replaces implicit language
//! fallback: result-array delegate, then dynamic finder, then named scope,
//! then source-delegated method. A call matching none of them fails with a
//! typed no-method error.

use serde_json::{Map, Value};

use super::Relation;
use crate::error::{Result, TrestleError};
use crate::record::Record;

/// The possible shapes a dynamically dispatched call can produce.
#[derive(Clone, Debug)]
pub enum Dispatched {
    Records(Vec<Record>),
    Record(Option<Record>),
    Relation(Relation),
    Value(Value),
}

const ARRAY_METHODS: &[&str] = &["first", "last", "len", "size", "is_empty", "at"];

#[derive(Clone, Copy, Debug, PartialEq)]
enum FinderKind {
    One,
    All,
}

impl Relation {
    /// Dispatches a dynamic call through the capability chain.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Dispatched> {
        if ARRAY_METHODS.contains(&method) {
            return self.array_delegate(method, args);
        }
        if let Some((kind, attribute)) = self.dynamic_finder_method(method) {
            return self.dynamic_find(kind, &attribute, args);
        }
        if let Some(scope) = self.source().scope(method) {
            let fragment = scope(self.source().relation(), args);
            return Ok(Dispatched::Relation(self.merge(&fragment)));
        }
        if let Some(delegate) = self.source().delegate(method) {
            return self.scoping(|| delegate(self.source(), args));
        }
        Err(TrestleError::NoMethod {
            method: method.into(),
            source_name: self.source_name().into(),
        })
    }

    /// Mirrors the dispatch chain without executing anything.
    pub fn responds_to(&self, method: &str) -> bool {
        ARRAY_METHODS.contains(&method)
            || self.dynamic_finder_method(method).is_some()
            || self.source().scope(method).is_some()
            || self.source().delegate(method).is_some()
    }

    /// Matches `find_by_<attr>` / `find_all_by_<attr>` against the source's
    /// attribute registry.
    fn dynamic_finder_method(&self, method: &str) -> Option<(FinderKind, String)> {
        let (kind, attribute) = if let Some(rest) = method.strip_prefix("find_all_by_") {
            (FinderKind::All, rest)
        } else if let Some(rest) = method.strip_prefix("find_by_") {
            (FinderKind::One, rest)
        } else {
            return None;
        };
        self.source()
            .has_attribute(attribute)
            .then(|| (kind, attribute.to_string()))
    }

    fn dynamic_find(&self, kind: FinderKind, attribute: &str, args: &[Value]) -> Result<Dispatched> {
        let mut condition = Map::new();
        condition.insert(
            attribute.to_string(),
            args.first().cloned().unwrap_or(Value::Null),
        );
        let options = match args.get(1) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let relation = self.r#where(condition);
        match kind {
            FinderKind::One => Ok(Dispatched::Record(relation.first_with(&options)?)),
            FinderKind::All => Ok(Dispatched::Records(relation.all_with(&options)?)),
        }
    }

    fn array_delegate(&self, method: &str, args: &[Value]) -> Result<Dispatched> {
        let records = self.to_a()?;
        match method {
            "first" => Ok(Dispatched::Record(records.into_iter().next())),
            "last" => Ok(Dispatched::Record(records.into_iter().next_back())),
            "len" | "size" => Ok(Dispatched::Value(Value::from(records.len()))),
            "is_empty" => Ok(Dispatched::Value(Value::Bool(records.is_empty()))),
            "at" => {
                let index = args.first().and_then(Value::as_u64).ok_or_else(|| {
                    TrestleError::Argument("`at` expects a non-negative index".into())
                })?;
                Ok(Dispatched::Record(records.into_iter().nth(index as usize)))
            }
            _ => unreachable!("array delegate called with unknown method"),
        }
    }
}
