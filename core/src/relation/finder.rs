//! Finder surface: `first`/`all`/`find` and finder-option application.

use serde_json::{Map, Value};

use super::{ModifierArg, Relation};
use crate::error::{Result, TrestleError};
use crate::record::Record;

/// What a `find` call is asking for: a single id, a set of ids, or one of
/// the whole-result markers.
#[derive(Clone, Debug, PartialEq)]
pub enum FindTarget {
    Id(Value),
    Ids(Vec<Value>),
    All,
    First,
}

fn id_like(value: &Value) -> bool {
    match value {
        Value::String(_) => true,
        Value::Number(n) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}

/// Validates a dynamic value as a find target. Integers and strings are
/// ids, arrays of those are id sets; anything else (floats, objects, ...)
/// fails fast with an argument error.
impl TryFrom<&Value> for FindTarget {
    type Error = TrestleError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            v if id_like(v) => Ok(Self::Id(v.clone())),
            Value::Array(items) if items.iter().all(id_like) => Ok(Self::Ids(items.clone())),
            other => Err(TrestleError::Argument(format!(
                "expected an id, a list of ids, or a find marker, got {other}"
            ))),
        }
    }
}

impl TryFrom<Value> for FindTarget {
    type Error = TrestleError;

    fn try_from(value: Value) -> Result<Self> {
        Self::try_from(&value)
    }
}

impl From<i64> for FindTarget {
    fn from(id: i64) -> Self {
        Self::Id(Value::from(id))
    }
}

impl From<&str> for FindTarget {
    fn from(id: &str) -> Self {
        Self::Id(Value::String(id.into()))
    }
}

impl From<Vec<i64>> for FindTarget {
    fn from(ids: Vec<i64>) -> Self {
        Self::Ids(ids.into_iter().map(Value::from).collect())
    }
}

/// Result of a `find` call. `One(None)` only occurs for the `First` marker;
/// a missing id raises instead of returning an empty result.
#[derive(Clone, Debug, PartialEq)]
pub enum Found {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl Found {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::One(record) => record.into_iter().collect(),
            Self::Many(records) => records,
        }
    }
}

impl Relation {
    /// Materializes every record of the relation.
    pub fn all(&self) -> Result<Vec<Record>> {
        self.to_a()
    }

    /// Applies finder options, then materializes.
    pub fn all_with(&self, options: &Map<String, Value>) -> Result<Vec<Record>> {
        self.apply_finder_options(options).to_a()
    }

    /// Materializes at most one record.
    pub fn first(&self) -> Result<Option<Record>> {
        Ok(self.limit(1u64).to_a()?.into_iter().next())
    }

    pub fn first_with(&self, options: &Map<String, Value>) -> Result<Option<Record>> {
        self.apply_finder_options(options).first()
    }

    /// Resolves a find target. A missing id, or any missing id within a
    /// requested set, surfaces as a record-not-found error.
    pub fn find(&self, target: impl Into<FindTarget>) -> Result<Found> {
        self.find_with(target, &Map::new())
    }

    pub fn find_with(
        &self,
        target: impl Into<FindTarget>,
        options: &Map<String, Value>,
    ) -> Result<Found> {
        let pk = self.primary_key().to_string();
        match target.into() {
            FindTarget::All => Ok(Found::Many(self.all_with(options)?)),
            FindTarget::First => Ok(Found::One(self.first_with(options)?)),
            FindTarget::Id(id) => {
                let mut condition = Map::new();
                condition.insert(pk.clone(), id.clone());
                match self.r#where(condition).first_with(options)? {
                    Some(record) => Ok(Found::One(Some(record))),
                    None => Err(TrestleError::RecordNotFound(format!(
                        "could not find {} with {pk}={id}",
                        self.source_name()
                    ))),
                }
            }
            FindTarget::Ids(ids) => {
                let mut unique: Vec<Value> = Vec::with_capacity(ids.len());
                for id in &ids {
                    if !unique.contains(id) {
                        unique.push(id.clone());
                    }
                }
                let mut condition = Map::new();
                condition.insert(pk.clone(), Value::Array(ids));
                let records = self.r#where(condition).all_with(options)?;
                if records.len() < unique.len() {
                    return Err(TrestleError::RecordNotFound(format!(
                        "could not find every {} with {pk} in {:?} (found {}, expected {})",
                        self.source_name(),
                        unique,
                        records.len(),
                        unique.len()
                    )));
                }
                Ok(Found::Many(records))
            }
        }
    }

    /// Applies a finder-options map as chained query methods. Recognizes
    /// every query-method key plus the aliases `conditions` (where) and
    /// `include` (includes); `sql` and `modifiers` pass through. Unknown
    /// keys are ignored.
    pub fn apply_finder_options(&self, options: &Map<String, Value>) -> Relation {
        let mut relation = self.clone();
        for (key, value) in options {
            relation = match key.as_str() {
                "limit" => relation.limit(value.clone()),
                "offset" => relation.offset(value.clone()),
                "from" => relation.from(value.clone()),
                "includes" | "include" => relation.includes(value.clone()),
                "sql" => relation.sql(value.clone()),
                "modifiers" => relation.modifiers(ModifierArg::from(value.clone())),
                "select" => append_multi(relation, value, |r, v| r.select(v)),
                "group" => append_multi(relation, value, |r, v| r.group(v)),
                "order" => append_multi(relation, value, |r, v| r.order(v)),
                "joins" => append_multi(relation, value, |r, v| r.joins(v)),
                "where" | "conditions" => append_multi(relation, value, |r, v| r.r#where(v)),
                "having" => append_multi(relation, value, |r, v| r.having(v)),
                _ => relation,
            };
        }
        relation
    }
}

/// Multi-valued finder options accept either a single value or an array of
/// values to append in order.
fn append_multi(
    relation: Relation,
    value: &Value,
    method: impl Fn(&Relation, Value) -> Relation,
) -> Relation {
    match value {
        Value::Array(items) => items
            .iter()
            .fold(relation, |relation, item| method(&relation, item.clone())),
        other => method(&relation, other.clone()),
    }
}
