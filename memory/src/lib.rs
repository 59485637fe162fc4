//! In-memory backend for trestle.
//!
//! Rows live in process-local tables keyed by source name. Reads interpret
//! the relation's canonical hash (equality conditions, ordering, paging,
//! projection); writes upsert by primary key; deletes remove matching rows.
//! Every call is journaled, which makes this backend the natural test
//! double for the pipeline: assertions can count downstream calls without
//! any network in play.

mod interpret;

use std::sync::{Mutex, PoisonError};

use hashbrown::HashMap;
use serde_json::{Map, Value};
use trestle_core::{Backend, CallOptions, Mode, Payload, Record, Relation, Result, TrestleError};

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
    journal: Mutex<Vec<(Mode, Map<String, Value>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds rows into a source's table.
    pub fn insert<I>(&self, source: impl Into<String>, rows: I)
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(source.into())
            .or_default()
            .extend(rows);
    }

    /// Current contents of a source's table.
    pub fn rows(&self, source: &str) -> Vec<Map<String, Value>> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call the backend has served, in order: the mode plus the
    /// canonical hash (reads/deletes) or the written object (writes).
    pub fn calls(&self) -> Vec<(Mode, Map<String, Value>)> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_call(&self) -> Option<(Mode, Map<String, Value>)> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn call_count(&self) -> usize {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Clears the call journal, leaving table contents in place.
    pub fn reset(&self) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drops every table.
    pub fn clear_tables(&self) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn journal_push(&self, mode: Mode, detail: Map<String, Value>) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((mode, detail));
    }

    fn relation_of<'a>(&self, options: &'a CallOptions) -> Result<&'a Relation> {
        options.relation.as_ref().ok_or_else(|| {
            TrestleError::Backend("memory backend requires a relation in the call options".into())
        })
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn read(&self, options: &CallOptions) -> Result<Vec<Record>> {
        let relation = self.relation_of(options)?;
        let hash = relation.to_hash();
        if hash.contains_key("sql") {
            return Err(TrestleError::Unsupported {
                mode: "sql".into(),
                kind: self.kind().into(),
            });
        }
        self.journal_push(Mode::Read, hash.clone());
        let rows = self.rows(relation.source_name());
        Ok(interpret::run(&hash, rows))
    }

    fn write(&self, options: &CallOptions) -> Result<Payload> {
        let relation = self.relation_of(options)?;
        let object = options
            .extra
            .get("object")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| {
                TrestleError::Backend("memory write requires an `object` attribute map".into())
            })?;
        self.journal_push(Mode::Write, object.clone());

        let pk = relation.primary_key();
        let id = object.get(pk).cloned();
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let table = tables.entry(relation.source_name().to_string()).or_default();
        let position = id
            .as_ref()
            .filter(|id| !id.is_null())
            .and_then(|id| table.iter().position(|row| row.get(pk) == Some(id)));
        match position {
            Some(index) => table[index] = object.clone(),
            None => table.push(object.clone()),
        }
        Ok(Payload::Records(vec![Record::new(object)]))
    }

    fn delete(&self, options: &CallOptions) -> Result<Payload> {
        let relation = self.relation_of(options)?;
        let hash = relation.to_hash();
        self.journal_push(Mode::Delete, hash.clone());

        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let table = tables.entry(relation.source_name().to_string()).or_default();
        let before = table.len();
        table.retain(|row| !interpret::matches(&hash, row));
        Ok(Payload::Count((before - table.len()) as u64))
    }
}
