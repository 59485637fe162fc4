//! Chainable, immutable-per-step query builder.
//!
//! A [`Relation`] accumulates query intent against one [`Source`] without
//! executing anything. Every query-shaping method returns a new relation;
//! the receiver is never mutated. Execution is pull-based: [`Relation::to_a`]
//! triggers exactly one fetch per instance and memoizes the result.

mod dispatch;
mod finder;
mod modifiers;
mod spec;

pub use dispatch::Dispatched;
pub use finder::{FindTarget, Found};
pub use modifiers::{ModifierArg, ModifierSet, truthy};
pub use spec::{FieldValue, IncludesTree, QuerySpec};

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde_json::{Map, Value};

use crate::error::Result;
use crate::record::Record;
use crate::source::Source;

/// Lazy, chainable query-specification builder bound to one source.
pub struct Relation {
    source: Arc<Source>,
    spec: QuerySpec,
    hash: OnceLock<Map<String, Value>>,
    records: Mutex<Option<Vec<Record>>>,
}

impl Relation {
    pub fn new(source: Arc<Source>) -> Self {
        Self {
            source,
            spec: QuerySpec::default(),
            hash: OnceLock::new(),
            records: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn primary_key(&self) -> &str {
        self.source.primary_key()
    }

    pub(crate) fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Copy-on-write step: clones the spec, applies one change, and wraps it
    /// in a fresh relation with empty memo cells.
    fn fork(&self, apply: impl FnOnce(&mut QuerySpec)) -> Relation {
        let mut spec = self.spec.clone();
        apply(&mut spec);
        Relation {
            source: self.source.clone(),
            spec,
            hash: OnceLock::new(),
            records: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Query methods
    // ------------------------------------------------------------------

    /// Appends a select entry. An entry whose string form ends in `*` marks
    /// the whole list as "select everything" at finalization.
    pub fn select(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.select.push(value))
    }

    pub fn group(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.group.push(value))
    }

    pub fn order(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.order.push(value))
    }

    pub fn joins(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.joins.push(value))
    }

    pub fn r#where(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.wheres.push(value))
    }

    pub fn having(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.having.push(value))
    }

    pub fn limit(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.limit = Some(value))
    }

    pub fn offset(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.offset = Some(value))
    }

    pub fn from(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.from = Some(value))
    }

    /// Merges a nested-association tree into the existing one; overlapping
    /// keys union their sub-trees rather than overwriting them.
    pub fn includes(&self, value: impl Into<Value>) -> Relation {
        let tree = IncludesTree::from_value(&value.into());
        self.fork(|spec| spec.includes.merge(&tree))
    }

    /// Sets the raw-SQL override. When present it alone defines the
    /// executable query; every other field is ignored at finalization.
    pub fn sql(&self, value: impl Into<FieldValue>) -> Relation {
        let value = value.into();
        self.fork(|spec| spec.raw_sql = Some(value))
    }

    /// Appends a modifier entry; a `Reset` (or null) argument clears the set.
    pub fn modifiers(&self, arg: impl Into<ModifierArg>) -> Relation {
        let arg = arg.into();
        self.fork(|spec| spec.modifiers.push(arg))
    }

    pub fn clear_modifiers(&self) -> Relation {
        self.modifiers(ModifierArg::Reset)
    }

    // Cache-control sugar over the modifier map.

    /// Bypasses the next cache read without invalidating the stored entry.
    pub fn fresh(&self) -> Relation {
        self.fresh_with(true)
    }

    pub fn fresh_with(&self, value: bool) -> Relation {
        self.flag_modifier("fresh", value)
    }

    /// Clears the stored cache entry for this query before fetching.
    pub fn reset_cache(&self) -> Relation {
        self.flag_modifier("reset_cache", true)
    }

    /// Marks the call as a no-op: the adapter returns a neutral result
    /// without touching any pipeline stage.
    pub fn noop(&self) -> Relation {
        self.flag_modifier("noop", true)
    }

    fn flag_modifier(&self, key: &str, value: bool) -> Relation {
        let mut map = Map::new();
        map.insert(key.into(), Value::Bool(value));
        self.modifiers(map)
    }

    // ------------------------------------------------------------------
    // Merge / finalization
    // ------------------------------------------------------------------

    /// Produces a relation taking `other`'s single-valued fields where set,
    /// concatenating multi-valued fields (self first), unioning includes
    /// trees, and concatenating modifier entries with `other`'s last so they
    /// win key conflicts.
    pub fn merge(&self, other: &Relation) -> Relation {
        self.fork(|spec| {
            let theirs = &other.spec;
            if theirs.limit.is_some() {
                spec.limit = theirs.limit.clone();
            }
            if theirs.offset.is_some() {
                spec.offset = theirs.offset.clone();
            }
            if theirs.from.is_some() {
                spec.from = theirs.from.clone();
            }
            if theirs.raw_sql.is_some() {
                spec.raw_sql = theirs.raw_sql.clone();
            }
            spec.includes.merge(&theirs.includes);
            spec.select.extend(theirs.select.iter().cloned());
            spec.group.extend(theirs.group.iter().cloned());
            spec.order.extend(theirs.order.iter().cloned());
            spec.joins.extend(theirs.joins.iter().cloned());
            spec.wheres.extend(theirs.wheres.iter().cloned());
            spec.having.extend(theirs.having.iter().cloned());
            spec.modifiers.append(&theirs.modifiers);
        })
    }

    /// The canonical projection of the accumulated query, memoized per
    /// instance. Chained mutators return fresh instances, so the memo is
    /// invalidated by construction, never by in-place mutation. Deferred
    /// field values are resolved here and nowhere else.
    pub fn to_hash(&self) -> Map<String, Value> {
        self.hash.get_or_init(|| self.spec.to_hash()).clone()
    }

    /// Finalizes the modifier map. Type validation of modifier entries is
    /// lazy and surfaces here.
    pub fn modifiers_value(&self) -> Result<Map<String, Value>> {
        self.spec.modifiers.finalize()
    }

    /// Whether the finalized modifier map carries a truthy flag under `key`.
    pub fn modifier_flag(&self, key: &str) -> Result<bool> {
        Ok(truthy(self.modifiers_value()?.get(key)))
    }

    /// Whether any nested associations were requested.
    pub fn eager_load(&self) -> bool {
        !self.spec.includes.is_empty()
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Materializes the relation, fetching at most once per instance. The
    /// fetch happens under the memo lock, so concurrent callers observe a
    /// single downstream call. Injected records short-circuit the fetch.
    pub fn to_a(&self) -> Result<Vec<Record>> {
        let mut guard = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(records) = guard.as_ref() {
            return Ok(records.clone());
        }
        let fetched = self.source.fetch_records(self)?;
        *guard = Some(fetched.clone());
        Ok(fetched)
    }

    /// Injects a result set, or clears the memo with `None` so the next
    /// `to_a` fetches again. Used for manual result injection in tests and
    /// composition.
    pub fn set_records(&self, records: Option<Vec<Record>>) {
        *self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = records;
    }

    /// The memoized or injected records, without triggering a fetch.
    pub fn records(&self) -> Option<Vec<Record>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes this relation onto the source's scope stack for the dynamic
    /// extent of `f`, so ambient queries against the source are implicitly
    /// merged with it. The stack entry is popped on every exit path,
    /// including panics.
    pub fn scoping<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.source.push_scope(self.clone());
        f()
    }
}

/// Cloning resets the memoized hash and result set; the copy re-finalizes
/// and re-fetches independently of the original.
impl Clone for Relation {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            spec: self.spec.clone(),
            hash: OnceLock::new(),
            records: Mutex::new(None),
        }
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("source", &self.source.name())
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
